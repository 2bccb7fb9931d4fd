//! Pool-to-worker request frames.

use std::sync::Arc;

use bytes::BufMut;

use crate::codec;
use crate::decrypt::DecryptNotesRequest;
use crate::error::WireError;
use crate::frame::{FrameHeader, MessageKind, WORKER_MESSAGE_HEADER_SIZE};
use crate::keys::KeyTable;
use crate::telemetry::TelemetryPoint;

/// Builds a miner's-fee transaction paying `amount` to the spender's own
/// address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateMinersFeeRequest {
    pub amount: u64,
    pub memo: [u8; 32],
    pub spend_key: [u8; 32],
    pub transaction_version: u8,
}

/// Proves and signs a raw transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostTransactionRequest {
    pub transaction: Vec<u8>,
    pub spend_key: [u8; 32],
}

/// Batch-verifies posted transactions against an authorized mint owner set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyTransactionsRequest {
    pub transactions: Vec<Vec<u8>>,
    pub mint_owners: Vec<[u8; 32]>,
}

/// Test and diagnostic request: hold a worker for `duration_ms`, honoring
/// aborts, optionally failing with `error` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SleepRequest {
    pub duration_ms: u64,
    /// Empty string means no error.
    pub error: String,
}

/// Uploads a batch of telemetry points to `api_host`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitTelemetryRequest {
    pub points: Vec<TelemetryPoint>,
    pub graffiti: Vec<u8>,
    pub api_host: String,
}

/// A request frame, one variant per executable [`MessageKind`] plus the
/// `JobAborted` control message.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerRequest {
    CreateMinersFee(CreateMinersFeeRequest),
    PostTransaction(PostTransactionRequest),
    VerifyTransactions(VerifyTransactionsRequest),
    DecryptNotes(DecryptNotesRequest),
    Sleep(SleepRequest),
    SubmitTelemetry(SubmitTelemetryRequest),
    /// Control: the pool has aborted the identified job. Carries no payload;
    /// the job id in the header is the whole message.
    JobAborted,
}

impl WorkerRequest {
    pub fn kind(&self) -> MessageKind {
        match self {
            WorkerRequest::CreateMinersFee(_) => MessageKind::CreateMinersFee,
            WorkerRequest::PostTransaction(_) => MessageKind::PostTransaction,
            WorkerRequest::VerifyTransactions(_) => MessageKind::VerifyTransactions,
            WorkerRequest::DecryptNotes(_) => MessageKind::DecryptNotes,
            WorkerRequest::Sleep(_) => MessageKind::Sleep,
            WorkerRequest::SubmitTelemetry(_) => MessageKind::SubmitTelemetry,
            WorkerRequest::JobAborted => MessageKind::JobAborted,
        }
    }

    /// The shared key table that must accompany this frame on the port, if
    /// any.
    pub fn key_sidecar(&self) -> Option<Arc<KeyTable>> {
        match self {
            WorkerRequest::DecryptNotes(request) => request.keys.sidecar(),
            _ => None,
        }
    }

    fn payload_size(&self) -> usize {
        match self {
            WorkerRequest::CreateMinersFee(_) => 8 + 32 + 32 + 1,
            WorkerRequest::PostTransaction(request) => {
                codec::varbytes_len(&request.transaction) + 32
            }
            WorkerRequest::VerifyTransactions(request) => {
                codec::varint_len(request.transactions.len() as u64)
                    + request
                        .transactions
                        .iter()
                        .map(|tx| codec::varbytes_len(tx))
                        .sum::<usize>()
                    + codec::varint_len(request.mint_owners.len() as u64)
                    + request.mint_owners.len() * 32
            }
            WorkerRequest::DecryptNotes(request) => request.payload_size(),
            WorkerRequest::Sleep(request) => 8 + codec::varstring_len(&request.error),
            WorkerRequest::SubmitTelemetry(request) => {
                codec::varint_len(request.points.len() as u64)
                    + request.points.iter().map(TelemetryPoint::size).sum::<usize>()
                    + codec::varbytes_len(&request.graffiti)
                    + codec::varstring_len(&request.api_host)
            }
            WorkerRequest::JobAborted => 0,
        }
    }

    /// Frames the request into an exact-sized buffer.
    pub fn serialize(&self, job_id: u64) -> Vec<u8> {
        let size = WORKER_MESSAGE_HEADER_SIZE + self.payload_size();
        let mut out = Vec::with_capacity(size);
        FrameHeader {
            job_id,
            kind: self.kind(),
        }
        .write(&mut out);

        match self {
            WorkerRequest::CreateMinersFee(request) => {
                out.put_u64_le(request.amount);
                out.put_slice(&request.memo);
                out.put_slice(&request.spend_key);
                out.put_u8(request.transaction_version);
            }
            WorkerRequest::PostTransaction(request) => {
                codec::put_varbytes(&mut out, &request.transaction);
                out.put_slice(&request.spend_key);
            }
            WorkerRequest::VerifyTransactions(request) => {
                codec::put_varint(&mut out, request.transactions.len() as u64);
                for transaction in &request.transactions {
                    codec::put_varbytes(&mut out, transaction);
                }
                codec::put_varint(&mut out, request.mint_owners.len() as u64);
                for owner in &request.mint_owners {
                    out.put_slice(owner);
                }
            }
            WorkerRequest::DecryptNotes(request) => request.write_payload(&mut out),
            WorkerRequest::Sleep(request) => {
                out.put_u64_le(request.duration_ms);
                codec::put_varstring(&mut out, &request.error);
            }
            WorkerRequest::SubmitTelemetry(request) => {
                codec::put_varint(&mut out, request.points.len() as u64);
                for point in &request.points {
                    point.write(&mut out);
                }
                codec::put_varbytes(&mut out, &request.graffiti);
                codec::put_varstring(&mut out, &request.api_host);
            }
            WorkerRequest::JobAborted => {}
        }

        debug_assert_eq!(out.len(), size);
        out
    }

    /// Decodes a request frame. A `DecryptNotes` frame whose key flag says
    /// "shared" needs the table that rode the port next to it.
    pub fn deserialize(
        frame: &[u8],
        shared_keys: Option<Arc<KeyTable>>,
    ) -> Result<(u64, Self), WireError> {
        let mut buf = frame;
        let header = FrameHeader::read(&mut buf)?;
        let request = match header.kind {
            MessageKind::CreateMinersFee => WorkerRequest::CreateMinersFee(CreateMinersFeeRequest {
                amount: codec::get_u64(&mut buf)?,
                memo: codec::get_array::<32>(&mut buf)?,
                spend_key: codec::get_array::<32>(&mut buf)?,
                transaction_version: codec::get_u8(&mut buf)?,
            }),
            MessageKind::PostTransaction => WorkerRequest::PostTransaction(PostTransactionRequest {
                transaction: codec::get_varbytes(&mut buf)?,
                spend_key: codec::get_array::<32>(&mut buf)?,
            }),
            MessageKind::VerifyTransactions => {
                let tx_count = codec::get_varint(&mut buf)? as usize;
                let mut transactions = Vec::with_capacity(tx_count.min(1024));
                for _ in 0..tx_count {
                    transactions.push(codec::get_varbytes(&mut buf)?);
                }
                let owner_count = codec::get_varint(&mut buf)? as usize;
                let mut mint_owners = Vec::with_capacity(owner_count.min(1024));
                for _ in 0..owner_count {
                    mint_owners.push(codec::get_array::<32>(&mut buf)?);
                }
                WorkerRequest::VerifyTransactions(VerifyTransactionsRequest {
                    transactions,
                    mint_owners,
                })
            }
            MessageKind::DecryptNotes => WorkerRequest::DecryptNotes(
                DecryptNotesRequest::read_payload(&mut buf, shared_keys)?,
            ),
            MessageKind::Sleep => WorkerRequest::Sleep(SleepRequest {
                duration_ms: codec::get_u64(&mut buf)?,
                error: codec::get_varstring(&mut buf)?,
            }),
            MessageKind::SubmitTelemetry => {
                let point_count = codec::get_varint(&mut buf)? as usize;
                let mut points = Vec::with_capacity(point_count.min(1024));
                for _ in 0..point_count {
                    points.push(TelemetryPoint::read(&mut buf)?);
                }
                WorkerRequest::SubmitTelemetry(SubmitTelemetryRequest {
                    points,
                    graffiti: codec::get_varbytes(&mut buf)?,
                    api_host: codec::get_varstring(&mut buf)?,
                })
            }
            MessageKind::JobAborted => WorkerRequest::JobAborted,
            MessageKind::JobError => return Err(WireError::UnexpectedKind(header.kind)),
        };
        codec::expect_end(buf)?;
        Ok((header.job_id, request))
    }
}
