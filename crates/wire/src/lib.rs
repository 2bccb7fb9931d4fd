#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Framed message catalogue for the `quarry` worker pool.
//!
//! Every message crossing a worker port is a single byte frame: a 9-byte
//! header (`u64` job id, `u8` kind) followed by a variant-specific payload.
//! Integers are little-endian; variable-length fields are size-prefixed
//! (`varbytes`/`varstring`). One variant (`DecryptNotes`) may move its key
//! block out of the payload and into a [`KeyTable`] that rides the port next
//! to the frame.

pub mod codec;
pub mod decrypt;
mod error;
mod frame;
pub mod keys;
mod request;
mod response;
pub mod telemetry;

pub use decrypt::{
    DecryptKeys, DecryptNotesOptions, DecryptNotesRequest, DecryptNotesResponse, DecryptedNote,
    EncryptedNoteItem,
};
pub use error::WireError;
pub use frame::{FrameHeader, MessageKind, WORKER_MESSAGE_HEADER_SIZE, WORKER_PROTOCOL_VERSION};
pub use keys::{AccountKeyRow, AccountKeyView, KeyTable};
pub use request::{
    CreateMinersFeeRequest, PostTransactionRequest, SleepRequest, SubmitTelemetryRequest,
    VerifyTransactionsRequest, WorkerRequest,
};
pub use response::{JobErrorPayload, SleepResponse, VerifyTransactionsResponse, WorkerResponse};
pub use telemetry::{TelemetryField, TelemetryPoint, TelemetryTag, TelemetryValue};
