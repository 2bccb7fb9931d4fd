//! Worker-to-pool response frames.

use bytes::BufMut;

use crate::codec;
use crate::decrypt::DecryptNotesResponse;
use crate::error::WireError;
use crate::frame::{FrameHeader, MessageKind, WORKER_MESSAGE_HEADER_SIZE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SleepResponse {
    /// True when the sleep observed its abort flag and returned early.
    pub aborted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyTransactionsResponse {
    pub verified: bool,
}

/// Serialized form of a worker-side failure.
///
/// Sent in place of the normal response for the failed job; the pool rebuilds
/// it into the error the caller observes through the job's promise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobErrorPayload {
    /// Failure class, e.g. `JobError` for handler failures or `panic` for a
    /// caught unwind.
    pub error_type: String,
    pub code: Option<String>,
    pub message: String,
    pub stack: Option<String>,
}

/// A response frame, one variant per executable request kind plus
/// [`JobErrorPayload`].
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerResponse {
    CreateMinersFee { transaction: Vec<u8> },
    PostTransaction { transaction: Vec<u8> },
    VerifyTransactions(VerifyTransactionsResponse),
    DecryptNotes(DecryptNotesResponse),
    Sleep(SleepResponse),
    SubmitTelemetry,
    JobError(JobErrorPayload),
}

impl WorkerResponse {
    pub fn kind(&self) -> MessageKind {
        match self {
            WorkerResponse::CreateMinersFee { .. } => MessageKind::CreateMinersFee,
            WorkerResponse::PostTransaction { .. } => MessageKind::PostTransaction,
            WorkerResponse::VerifyTransactions(_) => MessageKind::VerifyTransactions,
            WorkerResponse::DecryptNotes(_) => MessageKind::DecryptNotes,
            WorkerResponse::Sleep(_) => MessageKind::Sleep,
            WorkerResponse::SubmitTelemetry => MessageKind::SubmitTelemetry,
            WorkerResponse::JobError(_) => MessageKind::JobError,
        }
    }

    fn payload_size(&self) -> usize {
        match self {
            WorkerResponse::CreateMinersFee { transaction }
            | WorkerResponse::PostTransaction { transaction } => codec::varbytes_len(transaction),
            WorkerResponse::VerifyTransactions(_) => 1,
            WorkerResponse::DecryptNotes(response) => response.payload_size(),
            WorkerResponse::Sleep(_) => 1,
            WorkerResponse::SubmitTelemetry => 0,
            WorkerResponse::JobError(payload) => {
                codec::varstring_len(&payload.error_type)
                    + codec::opt_varstring_len(payload.code.as_deref())
                    + codec::varstring_len(&payload.message)
                    + codec::opt_varstring_len(payload.stack.as_deref())
            }
        }
    }

    /// Frames the response into an exact-sized buffer.
    pub fn serialize(&self, job_id: u64) -> Vec<u8> {
        let size = WORKER_MESSAGE_HEADER_SIZE + self.payload_size();
        let mut out = Vec::with_capacity(size);
        FrameHeader {
            job_id,
            kind: self.kind(),
        }
        .write(&mut out);

        match self {
            WorkerResponse::CreateMinersFee { transaction }
            | WorkerResponse::PostTransaction { transaction } => {
                codec::put_varbytes(&mut out, transaction);
            }
            WorkerResponse::VerifyTransactions(response) => {
                out.put_u8(response.verified as u8);
            }
            WorkerResponse::DecryptNotes(response) => response.write_payload(&mut out),
            WorkerResponse::Sleep(response) => {
                out.put_u8(response.aborted as u8);
            }
            WorkerResponse::SubmitTelemetry => {}
            WorkerResponse::JobError(payload) => {
                codec::put_varstring(&mut out, &payload.error_type);
                codec::put_opt_varstring(&mut out, payload.code.as_deref());
                codec::put_varstring(&mut out, &payload.message);
                codec::put_opt_varstring(&mut out, payload.stack.as_deref());
            }
        }

        debug_assert_eq!(out.len(), size);
        out
    }

    pub fn deserialize(frame: &[u8]) -> Result<(u64, Self), WireError> {
        let mut buf = frame;
        let header = FrameHeader::read(&mut buf)?;
        let response = match header.kind {
            MessageKind::CreateMinersFee => WorkerResponse::CreateMinersFee {
                transaction: codec::get_varbytes(&mut buf)?,
            },
            MessageKind::PostTransaction => WorkerResponse::PostTransaction {
                transaction: codec::get_varbytes(&mut buf)?,
            },
            MessageKind::VerifyTransactions => {
                WorkerResponse::VerifyTransactions(VerifyTransactionsResponse {
                    verified: codec::get_bool(&mut buf)?,
                })
            }
            MessageKind::DecryptNotes => {
                WorkerResponse::DecryptNotes(DecryptNotesResponse::read_payload(&mut buf)?)
            }
            MessageKind::Sleep => WorkerResponse::Sleep(SleepResponse {
                aborted: codec::get_bool(&mut buf)?,
            }),
            MessageKind::SubmitTelemetry => WorkerResponse::SubmitTelemetry,
            MessageKind::JobError => WorkerResponse::JobError(JobErrorPayload {
                error_type: codec::get_varstring(&mut buf)?,
                code: codec::get_opt_varstring(&mut buf)?,
                message: codec::get_varstring(&mut buf)?,
                stack: codec::get_opt_varstring(&mut buf)?,
            }),
            MessageKind::JobAborted => return Err(WireError::UnexpectedKind(header.kind)),
        };
        codec::expect_end(buf)?;
        Ok((header.job_id, response))
    }
}
