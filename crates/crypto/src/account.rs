//! Account key material.
//!
//! Every account hangs off a 32-byte spend key. The spend key seeds the
//! ed25519 signing key (whose verifying key is the account's public address)
//! and, through domain-separated derivations, the view keys handed to the
//! decryption workers:
//!
//! - incoming view key: reads notes sent *to* the account
//! - outgoing view key: reads notes sent *by* the account
//! - view key (64 bytes): nullifier-derivation key followed by the public
//!   address

use ed25519_dalek::SigningKey;

pub const SPEND_KEY_LENGTH: usize = 32;
pub const PUBLIC_ADDRESS_LENGTH: usize = 32;

/// An account's public address: its ed25519 verifying key bytes.
pub type PublicAddress = [u8; PUBLIC_ADDRESS_LENGTH];

const INCOMING_VIEW_KEY_CONTEXT: &str = "quarry 2025-03 account incoming view key";
const OUTGOING_VIEW_KEY_CONTEXT: &str = "quarry 2025-03 account outgoing view key";
const NULLIFIER_KEY_CONTEXT: &str = "quarry 2025-03 account nullifier key";

/// The root secret for an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendKey([u8; SPEND_KEY_LENGTH]);

impl SpendKey {
    pub fn from_bytes(bytes: [u8; SPEND_KEY_LENGTH]) -> Self {
        SpendKey(bytes)
    }

    pub fn random() -> Self {
        SpendKey(rand::random())
    }

    pub fn as_bytes(&self) -> &[u8; SPEND_KEY_LENGTH] {
        &self.0
    }
}

/// Everything derivable from a spend key.
#[derive(Debug, Clone)]
pub struct AccountKeys {
    spend_key: SpendKey,
    signing_key: SigningKey,
    public_address: PublicAddress,
    incoming_view_key: [u8; 32],
    outgoing_view_key: [u8; 32],
    nullifier_key: [u8; 32],
}

impl AccountKeys {
    pub fn from_spend_key(spend_key: &SpendKey) -> Self {
        let signing_key = SigningKey::from_bytes(spend_key.as_bytes());
        let public_address = signing_key.verifying_key().to_bytes();
        AccountKeys {
            spend_key: spend_key.clone(),
            signing_key,
            public_address,
            incoming_view_key: blake3::derive_key(INCOMING_VIEW_KEY_CONTEXT, spend_key.as_bytes()),
            outgoing_view_key: blake3::derive_key(OUTGOING_VIEW_KEY_CONTEXT, spend_key.as_bytes()),
            nullifier_key: blake3::derive_key(NULLIFIER_KEY_CONTEXT, spend_key.as_bytes()),
        }
    }

    pub fn generate() -> Self {
        Self::from_spend_key(&SpendKey::random())
    }

    pub fn spend_key(&self) -> &SpendKey {
        &self.spend_key
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn public_address(&self) -> PublicAddress {
        self.public_address
    }

    pub fn incoming_view_key(&self) -> &[u8; 32] {
        &self.incoming_view_key
    }

    pub fn outgoing_view_key(&self) -> &[u8; 32] {
        &self.outgoing_view_key
    }

    /// The 64-byte view key shipped to decryption workers: the
    /// nullifier-derivation key followed by the public address.
    pub fn view_key(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.nullifier_key);
        out[32..].copy_from_slice(&self.public_address);
        out
    }
}
