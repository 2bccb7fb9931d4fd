use crate::frame::MessageKind;

/// Decoding failures for framed worker messages.
///
/// A `WireError` never poisons the channel it was read from; the peer answers
/// the offending frame with a `JobError` carrying the diagnostic and keeps
/// serving.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unexpected end of frame")]
    UnexpectedEof,

    #[error("unknown message kind {0}")]
    UnknownMessageKind(u8),

    #[error("unknown telemetry value tag {0}")]
    UnknownValueTag(u8),

    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),

    #[error("varint does not fit in u64")]
    VarintOverflow,

    #[error("invalid utf-8 in string field")]
    InvalidUtf8,

    #[error("message kind {0:?} is not valid in this direction")]
    UnexpectedKind(MessageKind),

    #[error("decrypt request references a shared key table but none accompanied the frame")]
    MissingKeyTable,

    #[error("shared key table holds {table} accounts but the payload declares {declared}")]
    KeyTableMismatch { declared: usize, table: usize },

    #[error("key table buffer of {len} bytes does not hold {accounts} accounts")]
    KeyTableLength { len: usize, accounts: usize },

    #[error("sparse entry index {index} is out of bounds for declared length {len}")]
    SparseIndexOutOfBounds { index: usize, len: usize },
}
