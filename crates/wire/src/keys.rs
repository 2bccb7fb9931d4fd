//! Shared, read-only table of account view keys.
//!
//! Bulk note decryption is the hottest and largest-payload request, so the
//! account key block is built once per account-set change and handed to every
//! request by reference instead of being re-serialized each time. The table is
//! one contiguous buffer of three parallel column blocks:
//!
//! ```text
//! incoming-view-key[N] | outgoing-view-key[N] | view-key[N]
//! ```
//!
//! The buffer is logically immutable for the lifetime of any request that
//! references it; producers replace the whole table when the account set
//! changes, they never mutate it in place.

use std::sync::Arc;

use crate::error::WireError;

/// Length of an incoming view key column entry.
pub const INCOMING_VIEW_KEY_LENGTH: usize = 32;
/// Length of an outgoing view key column entry.
pub const OUTGOING_VIEW_KEY_LENGTH: usize = 32;
/// Length of a view key column entry.
pub const VIEW_KEY_LENGTH: usize = 64;

/// Bytes one account contributes across the three columns.
pub const ACCOUNT_KEY_STRIDE: usize =
    INCOMING_VIEW_KEY_LENGTH + OUTGOING_VIEW_KEY_LENGTH + VIEW_KEY_LENGTH;

/// One account's keys in row form, used to build a table and to encode the
/// inline key block of small decrypt requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountKeyRow {
    pub incoming_view_key: [u8; INCOMING_VIEW_KEY_LENGTH],
    pub outgoing_view_key: [u8; OUTGOING_VIEW_KEY_LENGTH],
    pub view_key: [u8; VIEW_KEY_LENGTH],
}

/// Borrowed per-account key slices, produced by offset arithmetic over the
/// column blocks.
#[derive(Debug, Clone, Copy)]
pub struct AccountKeyView<'a> {
    pub incoming_view_key: &'a [u8],
    pub outgoing_view_key: &'a [u8],
    pub view_key: &'a [u8],
}

/// An immutable column-block key table shared across requests.
#[derive(Debug, Clone)]
pub struct KeyTable {
    buf: Arc<[u8]>,
    accounts: usize,
}

impl KeyTable {
    /// Packs account rows into the column-block layout.
    pub fn from_accounts(rows: &[AccountKeyRow]) -> Self {
        let accounts = rows.len();
        let mut buf = Vec::with_capacity(accounts * ACCOUNT_KEY_STRIDE);
        for row in rows {
            buf.extend_from_slice(&row.incoming_view_key);
        }
        for row in rows {
            buf.extend_from_slice(&row.outgoing_view_key);
        }
        for row in rows {
            buf.extend_from_slice(&row.view_key);
        }
        KeyTable {
            buf: buf.into(),
            accounts,
        }
    }

    /// Wraps an existing buffer, validating that it holds exactly `accounts`
    /// column entries.
    pub fn from_raw(buf: Arc<[u8]>, accounts: usize) -> Result<Self, WireError> {
        if buf.len() != accounts * ACCOUNT_KEY_STRIDE {
            return Err(WireError::KeyTableLength {
                len: buf.len(),
                accounts,
            });
        }
        Ok(KeyTable { buf, accounts })
    }

    pub fn accounts(&self) -> usize {
        self.accounts
    }

    pub fn is_empty(&self) -> bool {
        self.accounts == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Returns the key slices for account `index`, or `None` past the end.
    pub fn at(&self, index: usize) -> Option<AccountKeyView<'_>> {
        if index >= self.accounts {
            return None;
        }
        let ivk_start = index * INCOMING_VIEW_KEY_LENGTH;
        let ovk_base = self.accounts * INCOMING_VIEW_KEY_LENGTH;
        let ovk_start = ovk_base + index * OUTGOING_VIEW_KEY_LENGTH;
        let vk_base = ovk_base + self.accounts * OUTGOING_VIEW_KEY_LENGTH;
        let vk_start = vk_base + index * VIEW_KEY_LENGTH;
        Some(AccountKeyView {
            incoming_view_key: &self.buf[ivk_start..ivk_start + INCOMING_VIEW_KEY_LENGTH],
            outgoing_view_key: &self.buf[ovk_start..ovk_start + OUTGOING_VIEW_KEY_LENGTH],
            view_key: &self.buf[vk_start..vk_start + VIEW_KEY_LENGTH],
        })
    }

    /// Iterates the table back out as rows (the inline wire encoding).
    pub fn rows(&self) -> impl Iterator<Item = AccountKeyView<'_>> {
        (0..self.accounts).filter_map(|i| self.at(i))
    }
}

impl PartialEq for KeyTable {
    fn eq(&self, other: &Self) -> bool {
        self.accounts == other.accounts && self.buf == other.buf
    }
}

impl Eq for KeyTable {}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fill: u8) -> AccountKeyRow {
        AccountKeyRow {
            incoming_view_key: [fill; INCOMING_VIEW_KEY_LENGTH],
            outgoing_view_key: [fill.wrapping_add(1); OUTGOING_VIEW_KEY_LENGTH],
            view_key: [fill.wrapping_add(2); VIEW_KEY_LENGTH],
        }
    }

    #[test]
    fn columns_are_parallel_and_contiguous() {
        let table = KeyTable::from_accounts(&[row(1), row(10), row(20)]);
        assert_eq!(table.accounts(), 3);
        assert_eq!(table.as_bytes().len(), 3 * ACCOUNT_KEY_STRIDE);

        let view = table.at(1).unwrap();
        assert_eq!(view.incoming_view_key, &[10u8; 32][..]);
        assert_eq!(view.outgoing_view_key, &[11u8; 32][..]);
        assert_eq!(view.view_key, &[12u8; 64][..]);

        // The second incoming view key sits immediately after the first,
        // not interleaved with other columns.
        assert_eq!(&table.as_bytes()[32..64], &[10u8; 32][..]);
    }

    #[test]
    fn out_of_bounds_and_bad_lengths_are_rejected() {
        let table = KeyTable::from_accounts(&[row(1)]);
        assert!(table.at(1).is_none());

        let raw: Arc<[u8]> = vec![0u8; ACCOUNT_KEY_STRIDE - 1].into();
        assert!(matches!(
            KeyTable::from_raw(raw, 1),
            Err(WireError::KeyTableLength { .. })
        ));
    }
}
