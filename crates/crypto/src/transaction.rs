//! Raw and posted transactions.
//!
//! A raw transaction is the unsigned body: outputs (sealed notes), mint
//! descriptions, fee, and expiration. Posting signs the serialized body with
//! the account's spend key. Verification is deliberately total: any malformed
//! input is an unverified transaction, never an error.

use std::ops::RangeInclusive;

use bytes::{Buf, BufMut};
use ed25519_dalek::{Signature, Signer as _, Verifier as _, VerifyingKey};

use crate::account::{AccountKeys, PUBLIC_ADDRESS_LENGTH, PublicAddress, SpendKey};
use crate::error::CryptoError;
use crate::note::{ENCRYPTED_NOTE_LENGTH, MEMO_LENGTH, EncryptedNote, Note};

/// Transaction versions this node understands.
pub const TRANSACTION_VERSION_RANGE: RangeInclusive<u8> = 1..=2;

const SIGNATURE_LENGTH: usize = 64;
const MINT_LENGTH: usize = 32 + PUBLIC_ADDRESS_LENGTH + 8;

/// Creation of `value` units of `asset_id`, authorized by `owner`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintDescription {
    pub asset_id: [u8; 32],
    pub owner: PublicAddress,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    pub version: u8,
    pub fee: i64,
    pub expiration: u32,
    pub outputs: Vec<EncryptedNote>,
    pub mints: Vec<MintDescription>,
}

fn read_exact<'a>(buf: &mut &'a [u8], len: usize, what: &'static str) -> Result<&'a [u8], CryptoError> {
    if buf.remaining() < len {
        return Err(CryptoError::Truncated(what));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn read_array<const N: usize>(buf: &mut &[u8], what: &'static str) -> Result<[u8; N], CryptoError> {
    let mut out = [0u8; N];
    out.copy_from_slice(read_exact(buf, N, what)?);
    Ok(out)
}

impl RawTransaction {
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            1 + 8
                + 4
                + 4
                + self.outputs.len() * ENCRYPTED_NOTE_LENGTH
                + 4
                + self.mints.len() * MINT_LENGTH,
        );
        out.put_u8(self.version);
        out.put_i64_le(self.fee);
        out.put_u32_le(self.expiration);
        out.put_u32_le(self.outputs.len() as u32);
        for output in &self.outputs {
            out.put_slice(output.as_bytes());
        }
        out.put_u32_le(self.mints.len() as u32);
        for mint in &self.mints {
            out.put_slice(&mint.asset_id);
            out.put_slice(&mint.owner);
            out.put_u64_le(mint.value);
        }
        out
    }

    /// Parses a raw transaction from the front of `buf`, leaving any
    /// remainder in place.
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, CryptoError> {
        let version = read_array::<1>(buf, "transaction header")?[0];
        let fee = i64::from_le_bytes(read_array::<8>(buf, "transaction fee")?);
        let expiration = u32::from_le_bytes(read_array::<4>(buf, "transaction expiration")?);

        let output_count = u32::from_le_bytes(read_array::<4>(buf, "output count")?) as usize;
        let mut outputs = Vec::with_capacity(output_count.min(1024));
        for _ in 0..output_count {
            let bytes = read_exact(buf, ENCRYPTED_NOTE_LENGTH, "output note")?;
            outputs.push(EncryptedNote::from_bytes(bytes)?);
        }

        let mint_count = u32::from_le_bytes(read_array::<4>(buf, "mint count")?) as usize;
        let mut mints = Vec::with_capacity(mint_count.min(1024));
        for _ in 0..mint_count {
            mints.push(MintDescription {
                asset_id: read_array::<32>(buf, "mint asset id")?,
                owner: read_array::<PUBLIC_ADDRESS_LENGTH>(buf, "mint owner")?,
                value: u64::from_le_bytes(read_array::<8>(buf, "mint value")?),
            });
        }

        Ok(RawTransaction {
            version,
            fee,
            expiration,
            outputs,
            mints,
        })
    }
}

/// A raw transaction plus the signature that posted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedTransaction {
    pub raw: RawTransaction,
    pub signer: PublicAddress,
    pub signature: [u8; SIGNATURE_LENGTH],
}

impl PostedTransaction {
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = self.raw.serialize();
        out.extend_from_slice(&self.signer);
        out.extend_from_slice(&self.signature);
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, CryptoError> {
        let mut buf = bytes;
        let raw = RawTransaction::deserialize(&mut buf)?;
        let signer = read_array::<PUBLIC_ADDRESS_LENGTH>(&mut buf, "signer")?;
        let signature = read_array::<SIGNATURE_LENGTH>(&mut buf, "signature")?;
        if !buf.is_empty() {
            return Err(CryptoError::WrongLength {
                what: "posted transaction",
                expected: bytes.len() - buf.len(),
                got: bytes.len(),
            });
        }
        Ok(PostedTransaction {
            raw,
            signer,
            signature,
        })
    }

    /// Checks the posting signature and that every mint in the body names an
    /// owner from `mint_owners`. Total: malformed key material is simply
    /// unverified.
    pub fn verify(&self, mint_owners: &[PublicAddress]) -> bool {
        if !TRANSACTION_VERSION_RANGE.contains(&self.raw.version) {
            return false;
        }
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.signer) else {
            return false;
        };
        let signature = Signature::from_bytes(&self.signature);
        if verifying_key
            .verify(&self.raw.serialize(), &signature)
            .is_err()
        {
            return false;
        }
        self.raw
            .mints
            .iter()
            .all(|mint| mint_owners.contains(&mint.owner))
    }
}

/// Signs a raw transaction with the spend key.
pub fn post_transaction(
    raw: &RawTransaction,
    spend_key: &SpendKey,
) -> Result<PostedTransaction, CryptoError> {
    if !TRANSACTION_VERSION_RANGE.contains(&raw.version) {
        return Err(CryptoError::UnsupportedVersion(raw.version));
    }
    let keys = AccountKeys::from_spend_key(spend_key);
    let signature = keys.signing_key().sign(&raw.serialize());
    Ok(PostedTransaction {
        raw: raw.clone(),
        signer: keys.public_address(),
        signature: signature.to_bytes(),
    })
}

/// Builds and posts a miner's-fee transaction: one output note paying
/// `amount` to the spender's own address, with `fee = -amount`.
pub fn create_miners_fee(
    amount: u64,
    memo: [u8; MEMO_LENGTH],
    spend_key: &SpendKey,
    version: u8,
) -> Result<PostedTransaction, CryptoError> {
    if !TRANSACTION_VERSION_RANGE.contains(&version) {
        return Err(CryptoError::UnsupportedVersion(version));
    }
    let keys = AccountKeys::from_spend_key(spend_key);
    let note = Note::new(keys.public_address(), amount, memo);
    let output = note.encrypt(keys.incoming_view_key(), keys.outgoing_view_key())?;
    let raw = RawTransaction {
        version,
        fee: -(amount.min(i64::MAX as u64) as i64),
        expiration: 0,
        outputs: vec![output],
        mints: Vec::new(),
    };
    post_transaction(&raw, spend_key)
}

/// Batch verification over serialized posted transactions.
///
/// Any parse or signature failure makes the whole batch unverified; this
/// function does not error.
pub fn verify_transactions<T: AsRef<[u8]>>(
    transactions: &[T],
    mint_owners: &[PublicAddress],
) -> bool {
    transactions.iter().all(|bytes| {
        PostedTransaction::deserialize(bytes.as_ref())
            .map(|posted| posted.verify(mint_owners))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mint_transaction(keys: &AccountKeys) -> PostedTransaction {
        let raw = RawTransaction {
            version: 2,
            fee: 1,
            expiration: 1000,
            outputs: Vec::new(),
            mints: vec![MintDescription {
                asset_id: [0xaa; 32],
                owner: keys.public_address(),
                value: 500,
            }],
        };
        post_transaction(&raw, keys.spend_key()).unwrap()
    }

    #[test]
    fn posted_transaction_round_trips_and_verifies() {
        let keys = AccountKeys::from_spend_key(&SpendKey::from_bytes([1; 32]));
        let posted = mint_transaction(&keys);
        let bytes = posted.serialize();
        let parsed = PostedTransaction::deserialize(&bytes).unwrap();
        assert_eq!(parsed, posted);
        assert!(parsed.verify(&[keys.public_address()]));
    }

    #[test]
    fn wrong_mint_owner_fails_verification() {
        let keys = AccountKeys::from_spend_key(&SpendKey::from_bytes([2; 32]));
        let other = AccountKeys::from_spend_key(&SpendKey::from_bytes([3; 32]));
        let posted = mint_transaction(&keys);

        assert!(!posted.verify(&[other.public_address()]));
        assert!(!posted.verify(&[]));
        assert!(posted.verify(&[other.public_address(), keys.public_address()]));
    }

    #[test]
    fn tampered_body_or_garbage_is_unverified_not_an_error() {
        let keys = AccountKeys::from_spend_key(&SpendKey::from_bytes([4; 32]));
        let posted = mint_transaction(&keys);

        let mut tampered = posted.serialize();
        tampered[1] ^= 0x01;
        assert!(!verify_transactions(&[tampered], &[keys.public_address()]));
        assert!(!verify_transactions(&[vec![0u8; 3]], &[keys.public_address()]));
        assert!(verify_transactions::<Vec<u8>>(&[], &[]));
    }

    #[test]
    fn miners_fee_pays_the_spender() {
        let keys = AccountKeys::from_spend_key(&SpendKey::from_bytes([5; 32]));
        let posted = create_miners_fee(2_000_000_000, [0; MEMO_LENGTH], keys.spend_key(), 2).unwrap();

        assert_eq!(posted.raw.fee, -2_000_000_000);
        assert_eq!(posted.raw.outputs.len(), 1);
        assert!(posted.verify(&[]));

        let note = posted.raw.outputs[0]
            .decrypt_as_owner(keys.incoming_view_key())
            .unwrap();
        assert_eq!(note.value, 2_000_000_000);
        assert_eq!(note.owner, keys.public_address());

        assert!(matches!(
            create_miners_fee(1, [0; MEMO_LENGTH], keys.spend_key(), 0),
            Err(CryptoError::UnsupportedVersion(0))
        ));
    }
}
