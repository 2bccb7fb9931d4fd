#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("serialized {what} has wrong length: expected {expected}, got {got}")]
    WrongLength {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("truncated {0}")]
    Truncated(&'static str),

    #[error("invalid public address")]
    InvalidPublicAddress,

    #[error("unsupported transaction version {0}")]
    UnsupportedVersion(u8),

    #[error("transaction signature does not verify")]
    InvalidSignature,

    #[error("note encryption failed")]
    EncryptionFailed,
}
