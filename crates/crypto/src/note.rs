//! Notes and their sealed wire form.
//!
//! A note plaintext is a fixed 104-byte record. Its sealed form carries two
//! independent AEAD boxes over the same plaintext: one under a key derived
//! from the recipient's incoming view key, one under the sender's outgoing
//! view key, so either party can later recover the note with only view-level
//! key material. Decryption failure means "not my note" and is never an
//! error.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use crate::account::{PUBLIC_ADDRESS_LENGTH, PublicAddress};
use crate::error::CryptoError;

pub const MEMO_LENGTH: usize = 32;

const RANDOMNESS_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;
const PLAINTEXT_LENGTH: usize = PUBLIC_ADDRESS_LENGTH + 8 + RANDOMNESS_LENGTH + MEMO_LENGTH;
const BOX_LENGTH: usize = NONCE_LENGTH + PLAINTEXT_LENGTH + TAG_LENGTH;

/// Serialized length of an [`EncryptedNote`]: the owner box followed by the
/// spender box.
pub const ENCRYPTED_NOTE_LENGTH: usize = 2 * BOX_LENGTH;

const OWNER_BOX_CONTEXT: &str = "quarry 2025-03 note owner box key";
const SPENDER_BOX_CONTEXT: &str = "quarry 2025-03 note spender box key";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub owner: PublicAddress,
    pub value: u64,
    pub memo: [u8; MEMO_LENGTH],
    pub randomness: [u8; RANDOMNESS_LENGTH],
}

impl Note {
    /// A fresh note paying `value` to `owner`.
    pub fn new(owner: PublicAddress, value: u64, memo: [u8; MEMO_LENGTH]) -> Self {
        Note {
            owner,
            value,
            memo,
            randomness: rand::random(),
        }
    }

    fn plaintext(&self) -> [u8; PLAINTEXT_LENGTH] {
        let mut out = [0u8; PLAINTEXT_LENGTH];
        out[..32].copy_from_slice(&self.owner);
        out[32..40].copy_from_slice(&self.value.to_le_bytes());
        out[40..72].copy_from_slice(&self.randomness);
        out[72..].copy_from_slice(&self.memo);
        out
    }

    fn from_plaintext(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != PLAINTEXT_LENGTH {
            return None;
        }
        let mut owner = [0u8; 32];
        owner.copy_from_slice(&bytes[..32]);
        let mut value_bytes = [0u8; 8];
        value_bytes.copy_from_slice(&bytes[32..40]);
        let mut randomness = [0u8; RANDOMNESS_LENGTH];
        randomness.copy_from_slice(&bytes[40..72]);
        let mut memo = [0u8; MEMO_LENGTH];
        memo.copy_from_slice(&bytes[72..]);
        Some(Note {
            owner,
            value: u64::from_le_bytes(value_bytes),
            memo,
            randomness,
        })
    }

    /// The note commitment: a hash of the full plaintext.
    pub fn commitment(&self) -> [u8; 32] {
        *blake3::hash(&self.plaintext()).as_bytes()
    }

    /// Derives the note's nullifier from a 64-byte view key and the note's
    /// position in the note tree. `None` when the view key has the wrong
    /// length.
    pub fn nullifier(&self, view_key: &[u8], position: u64) -> Option<[u8; 32]> {
        let nullifier_key: &[u8; 32] = view_key.get(..32)?.try_into().ok()?;
        let mut hasher = blake3::Hasher::new_keyed(nullifier_key);
        hasher.update(&self.commitment());
        hasher.update(&position.to_le_bytes());
        Some(*hasher.finalize().as_bytes())
    }

    /// Seals the note for the wire: one box the recipient can open with
    /// their incoming view key, one the sender can open with their outgoing
    /// view key.
    pub fn encrypt(
        &self,
        recipient_incoming_view_key: &[u8; 32],
        sender_outgoing_view_key: &[u8; 32],
    ) -> Result<EncryptedNote, CryptoError> {
        let plaintext = self.plaintext();
        let mut bytes = Vec::with_capacity(ENCRYPTED_NOTE_LENGTH);
        seal_box(
            &mut bytes,
            OWNER_BOX_CONTEXT,
            recipient_incoming_view_key,
            &plaintext,
        )?;
        seal_box(
            &mut bytes,
            SPENDER_BOX_CONTEXT,
            sender_outgoing_view_key,
            &plaintext,
        )?;
        Ok(EncryptedNote { bytes })
    }
}

fn box_cipher(context: &str, view_key: &[u8]) -> Option<ChaCha20Poly1305> {
    if view_key.len() != 32 {
        return None;
    }
    let key = blake3::derive_key(context, view_key);
    Some(ChaCha20Poly1305::new(Key::from_slice(&key)))
}

fn seal_box(
    out: &mut Vec<u8>,
    context: &str,
    view_key: &[u8; 32],
    plaintext: &[u8],
) -> Result<(), CryptoError> {
    let cipher = box_cipher(context, view_key).ok_or(CryptoError::EncryptionFailed)?;
    let nonce_bytes: [u8; NONCE_LENGTH] = rand::random();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(())
}

fn open_box(context: &str, view_key: &[u8], sealed: &[u8]) -> Option<Vec<u8>> {
    let cipher = box_cipher(context, view_key)?;
    let (nonce, ciphertext) = sealed.split_at(NONCE_LENGTH);
    cipher.decrypt(Nonce::from_slice(nonce), ciphertext).ok()
}

/// A sealed note as carried inside transactions and decrypt requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedNote {
    bytes: Vec<u8>,
}

impl EncryptedNote {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != ENCRYPTED_NOTE_LENGTH {
            return Err(CryptoError::WrongLength {
                what: "encrypted note",
                expected: ENCRYPTED_NOTE_LENGTH,
                got: bytes.len(),
            });
        }
        Ok(EncryptedNote {
            bytes: bytes.to_vec(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Opens the owner box. `None` when the key is not the recipient's or
    /// has the wrong length.
    pub fn decrypt_as_owner(&self, incoming_view_key: &[u8]) -> Option<Note> {
        let sealed = &self.bytes[..BOX_LENGTH];
        Note::from_plaintext(&open_box(OWNER_BOX_CONTEXT, incoming_view_key, sealed)?)
    }

    /// Opens the spender box with the sender's outgoing view key.
    pub fn decrypt_as_spender(&self, outgoing_view_key: &[u8]) -> Option<Note> {
        let sealed = &self.bytes[BOX_LENGTH..];
        Note::from_plaintext(&open_box(SPENDER_BOX_CONTEXT, outgoing_view_key, sealed)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountKeys, SpendKey};

    fn keys(fill: u8) -> AccountKeys {
        AccountKeys::from_spend_key(&SpendKey::from_bytes([fill; 32]))
    }

    #[test]
    fn owner_can_decrypt_and_strangers_cannot() {
        let owner = keys(1);
        let sender = keys(2);
        let stranger = keys(3);

        let note = Note::new(owner.public_address(), 42, [b'm'; MEMO_LENGTH]);
        let encrypted = note
            .encrypt(owner.incoming_view_key(), sender.outgoing_view_key())
            .unwrap();
        assert_eq!(encrypted.as_bytes().len(), ENCRYPTED_NOTE_LENGTH);

        let decrypted = encrypted
            .decrypt_as_owner(owner.incoming_view_key())
            .unwrap();
        assert_eq!(decrypted, note);

        assert!(encrypted.decrypt_as_owner(stranger.incoming_view_key()).is_none());
        assert!(encrypted.decrypt_as_owner(&[0u8; 16]).is_none());
    }

    #[test]
    fn spender_box_opens_with_the_outgoing_view_key() {
        let owner = keys(4);
        let sender = keys(5);
        let note = Note::new(owner.public_address(), 7, [0; MEMO_LENGTH]);
        let encrypted = note
            .encrypt(owner.incoming_view_key(), sender.outgoing_view_key())
            .unwrap();

        let for_spender = encrypted
            .decrypt_as_spender(sender.outgoing_view_key())
            .unwrap();
        assert_eq!(for_spender, note);
        assert!(encrypted.decrypt_as_spender(owner.outgoing_view_key()).is_none());
    }

    #[test]
    fn nullifiers_are_deterministic_per_position_and_key() {
        let owner = keys(6);
        let note = Note::new(owner.public_address(), 1, [0; MEMO_LENGTH]);
        let view_key = owner.view_key();

        assert_eq!(note.nullifier(&view_key, 9), note.nullifier(&view_key, 9));
        assert_ne!(note.nullifier(&view_key, 9), note.nullifier(&view_key, 10));
        assert_ne!(
            note.nullifier(&view_key, 9),
            note.nullifier(&keys(7).view_key(), 9)
        );
        assert!(note.nullifier(&view_key[..10], 9).is_none());
    }

    #[test]
    fn malformed_ciphertext_is_rejected() {
        let owner = keys(8);
        let note = Note::new(owner.public_address(), 5, [0; MEMO_LENGTH]);
        let encrypted = note
            .encrypt(owner.incoming_view_key(), keys(9).outgoing_view_key())
            .unwrap();

        let mut tampered = encrypted.as_bytes().to_vec();
        tampered[NONCE_LENGTH + 3] ^= 0x01;
        let tampered = EncryptedNote::from_bytes(&tampered).unwrap();
        assert!(tampered.decrypt_as_owner(owner.incoming_view_key()).is_none());

        assert!(EncryptedNote::from_bytes(&[0u8; 5]).is_err());
    }
}
