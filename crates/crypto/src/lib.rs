#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Cryptographic collaborators for the `quarry` worker pool.
//!
//! Account key derivation, note encryption/decryption with nullifiers, and
//! transaction posting/verification. The pool treats everything here as
//! opaque `execute(request) -> response` work; nothing in this crate knows
//! about jobs, workers, or framing.

mod account;
mod error;
mod note;
mod transaction;

pub use account::{
    AccountKeys, PUBLIC_ADDRESS_LENGTH, PublicAddress, SPEND_KEY_LENGTH, SpendKey,
};
pub use error::CryptoError;
pub use note::{ENCRYPTED_NOTE_LENGTH, MEMO_LENGTH, EncryptedNote, Note};
pub use transaction::{
    MintDescription, PostedTransaction, RawTransaction, TRANSACTION_VERSION_RANGE,
    create_miners_fee, post_transaction, verify_transactions,
};

/// One-time process warm-up.
///
/// Primes the lazily built hashing and signing machinery so the first real
/// job on a fresh worker thread does not pay the setup cost. Safe to call
/// repeatedly from any thread.
pub fn initialize() {
    use ed25519_dalek::Signer as _;

    let spend_key = SpendKey::from_bytes([0u8; SPEND_KEY_LENGTH]);
    let keys = AccountKeys::from_spend_key(&spend_key);
    let _ = keys.signing_key().sign(b"quarry-warmup");
    let _ = blake3::hash(b"quarry-warmup");
}
