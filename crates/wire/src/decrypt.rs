//! Payloads for the bulk note decryption request and its sparse response.

use std::sync::Arc;

use bytes::BufMut;

use crate::codec;
use crate::error::WireError;
use crate::keys::{
    ACCOUNT_KEY_STRIDE, AccountKeyRow, INCOMING_VIEW_KEY_LENGTH, KeyTable,
    OUTGOING_VIEW_KEY_LENGTH, VIEW_KEY_LENGTH,
};

/// Where a decrypt request's account keys live.
///
/// Small account sets inline the key block into the payload; large ones move
/// it to a [`KeyTable`] that accompanies the frame on the port. The first
/// payload byte selects which form the decoder should expect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptKeys {
    Inline(KeyTable),
    Shared(Arc<KeyTable>),
}

impl DecryptKeys {
    pub fn table(&self) -> &KeyTable {
        match self {
            DecryptKeys::Inline(table) => table,
            DecryptKeys::Shared(table) => table,
        }
    }

    pub fn accounts(&self) -> usize {
        self.table().accounts()
    }

    /// The table to ship on the port next to the frame, if any.
    pub fn sidecar(&self) -> Option<Arc<KeyTable>> {
        match self {
            DecryptKeys::Inline(_) => None,
            DecryptKeys::Shared(table) => Some(table.clone()),
        }
    }
}

/// One encrypted note to try against every account in the key block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedNoteItem {
    pub serialized: Vec<u8>,
    /// Position of the note in the note tree, when the caller knows it.
    /// Without it no nullifier can be derived.
    pub current_note_index: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecryptNotesOptions {
    /// Also try each account's outgoing view key, surfacing notes the
    /// account sent rather than received.
    pub for_spender: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptNotesRequest {
    pub keys: DecryptKeys,
    pub notes: Vec<EncryptedNoteItem>,
    pub options: DecryptNotesOptions,
}

const KEYS_INLINE: u8 = 0;
const KEYS_SHARED: u8 = 1;

impl DecryptNotesRequest {
    pub(crate) fn payload_size(&self) -> usize {
        let accounts = self.keys.accounts();
        let keys_size = match &self.keys {
            DecryptKeys::Inline(_) => accounts * ACCOUNT_KEY_STRIDE,
            DecryptKeys::Shared(_) => 0,
        };
        1 + codec::varint_len(accounts as u64)
            + keys_size
            + codec::varint_len(self.notes.len() as u64)
            + self
                .notes
                .iter()
                .map(|note| {
                    codec::varbytes_len(&note.serialized)
                        + codec::opt_u32_len(note.current_note_index)
                })
                .sum::<usize>()
            + 1
    }

    pub(crate) fn write_payload(&self, out: &mut Vec<u8>) {
        match &self.keys {
            DecryptKeys::Inline(table) => {
                out.put_u8(KEYS_INLINE);
                codec::put_varint(out, table.accounts() as u64);
                for view in table.rows() {
                    out.put_slice(view.incoming_view_key);
                    out.put_slice(view.outgoing_view_key);
                    out.put_slice(view.view_key);
                }
            }
            DecryptKeys::Shared(table) => {
                out.put_u8(KEYS_SHARED);
                codec::put_varint(out, table.accounts() as u64);
            }
        }
        codec::put_varint(out, self.notes.len() as u64);
        for note in &self.notes {
            codec::put_varbytes(out, &note.serialized);
            codec::put_opt_u32(out, note.current_note_index);
        }
        out.put_u8(self.options.for_spender as u8);
    }

    pub(crate) fn read_payload(
        buf: &mut &[u8],
        shared_keys: Option<Arc<KeyTable>>,
    ) -> Result<Self, WireError> {
        let flag = codec::get_u8(buf)?;
        let accounts = codec::get_varint(buf)? as usize;
        let keys = match flag {
            KEYS_SHARED => {
                let table = shared_keys.ok_or(WireError::MissingKeyTable)?;
                if table.accounts() != accounts {
                    return Err(WireError::KeyTableMismatch {
                        declared: accounts,
                        table: table.accounts(),
                    });
                }
                DecryptKeys::Shared(table)
            }
            _ => {
                let mut rows = Vec::with_capacity(accounts);
                for _ in 0..accounts {
                    rows.push(AccountKeyRow {
                        incoming_view_key: codec::get_array::<INCOMING_VIEW_KEY_LENGTH>(buf)?,
                        outgoing_view_key: codec::get_array::<OUTGOING_VIEW_KEY_LENGTH>(buf)?,
                        view_key: codec::get_array::<VIEW_KEY_LENGTH>(buf)?,
                    });
                }
                DecryptKeys::Inline(KeyTable::from_accounts(&rows))
            }
        };

        let note_count = codec::get_varint(buf)? as usize;
        let mut notes = Vec::with_capacity(note_count.min(1024));
        for _ in 0..note_count {
            notes.push(EncryptedNoteItem {
                serialized: codec::get_varbytes(buf)?,
                current_note_index: codec::get_opt_u32(buf)?,
            });
        }
        let options = DecryptNotesOptions {
            for_spender: codec::get_bool(buf)?,
        };
        Ok(DecryptNotesRequest {
            keys,
            notes,
            options,
        })
    }
}

/// A note an account could read, as reported by the decryption handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedNote {
    /// Note commitment.
    pub hash: [u8; 32],
    pub value: u64,
    pub memo: [u8; 32],
    /// True when the note was read with the outgoing view key (the account
    /// sent it) rather than received.
    pub for_spender: bool,
    /// Derived only when the request carried the note's tree position and the
    /// note was read as the owner.
    pub nullifier: Option<[u8; 32]>,
}

/// Logically a fixed-length array of `accounts * notes` slots, almost all of
/// which are empty: in the common case no account can read any given note.
///
/// The encoding is therefore sparse. The declared length comes first, then
/// only the occupied slots, each prefixed by its index in the logical array.
/// A dense encoding would cost a byte per slot; this costs a handful of bytes
/// total when nothing decrypts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptNotesResponse {
    pub notes: Vec<Option<DecryptedNote>>,
}

impl DecryptNotesResponse {
    pub(crate) fn payload_size(&self) -> usize {
        let present = self.notes.iter().flatten().count();
        let mut size =
            codec::varint_len(self.notes.len() as u64) + codec::varint_len(present as u64);
        for (index, note) in self
            .notes
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|n| (i, n)))
        {
            size += codec::varint_len(index as u64) + Self::entry_size(note);
        }
        size
    }

    fn entry_size(note: &DecryptedNote) -> usize {
        32 + 8 + 32 + 1 + 1 + if note.nullifier.is_some() { 32 } else { 0 }
    }

    pub(crate) fn write_payload(&self, out: &mut Vec<u8>) {
        codec::put_varint(out, self.notes.len() as u64);
        let present = self.notes.iter().flatten().count();
        codec::put_varint(out, present as u64);
        for (index, note) in self
            .notes
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|n| (i, n)))
        {
            codec::put_varint(out, index as u64);
            out.put_slice(&note.hash);
            out.put_u64_le(note.value);
            out.put_slice(&note.memo);
            out.put_u8(note.for_spender as u8);
            match &note.nullifier {
                Some(nullifier) => {
                    out.put_u8(1);
                    out.put_slice(nullifier);
                }
                None => out.put_u8(0),
            }
        }
    }

    pub(crate) fn read_payload(buf: &mut &[u8]) -> Result<Self, WireError> {
        let len = codec::get_varint(buf)? as usize;
        let present = codec::get_varint(buf)? as usize;
        let mut notes: Vec<Option<DecryptedNote>> = vec![None; len];
        for _ in 0..present {
            let index = codec::get_varint(buf)? as usize;
            if index >= len {
                return Err(WireError::SparseIndexOutOfBounds { index, len });
            }
            let hash = codec::get_array::<32>(buf)?;
            let value = codec::get_u64(buf)?;
            let memo = codec::get_array::<32>(buf)?;
            let for_spender = codec::get_bool(buf)?;
            let nullifier = match codec::get_u8(buf)? {
                0 => None,
                _ => Some(codec::get_array::<32>(buf)?),
            };
            notes[index] = Some(DecryptedNote {
                hash,
                value,
                memo,
                for_spender,
                nullifier,
            });
        }
        Ok(DecryptNotesResponse { notes })
    }
}
