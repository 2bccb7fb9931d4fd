use bytes::BufMut;

use crate::codec;
use crate::error::WireError;

/// Size of the fixed frame header: `u64` job id plus `u8` kind.
pub const WORKER_MESSAGE_HEADER_SIZE: usize = 9;

/// Out-of-band catalogue version.
///
/// Never serialized: both sides of a port are deployed together, so the pool
/// checks this against its configured expectation at start-up and refuses to
/// run on a mismatch. Any change to [`MessageKind`] or to a payload layout
/// bumps it.
pub const WORKER_PROTOCOL_VERSION: u32 = 3;

/// The closed set of one-byte frame discriminants.
///
/// Adding a kind is backward-incompatible and bumps
/// [`WORKER_PROTOCOL_VERSION`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Sent by a worker in place of any response to signal failure.
    JobError = 0,
    CreateMinersFee = 1,
    PostTransaction = 2,
    VerifyTransactions = 3,
    DecryptNotes = 4,
    Sleep = 5,
    /// Control message; travels on the same port as ordinary requests.
    JobAborted = 6,
    SubmitTelemetry = 7,
}

impl MessageKind {
    pub const ALL: [MessageKind; 8] = [
        MessageKind::JobError,
        MessageKind::CreateMinersFee,
        MessageKind::PostTransaction,
        MessageKind::VerifyTransactions,
        MessageKind::DecryptNotes,
        MessageKind::Sleep,
        MessageKind::JobAborted,
        MessageKind::SubmitTelemetry,
    ];

    pub fn from_u8(byte: u8) -> Result<Self, WireError> {
        match byte {
            0 => Ok(MessageKind::JobError),
            1 => Ok(MessageKind::CreateMinersFee),
            2 => Ok(MessageKind::PostTransaction),
            3 => Ok(MessageKind::VerifyTransactions),
            4 => Ok(MessageKind::DecryptNotes),
            5 => Ok(MessageKind::Sleep),
            6 => Ok(MessageKind::JobAborted),
            7 => Ok(MessageKind::SubmitTelemetry),
            other => Err(WireError::UnknownMessageKind(other)),
        }
    }
}

/// The fixed header present on every frame in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub job_id: u64,
    pub kind: MessageKind,
}

impl FrameHeader {
    pub fn write(&self, out: &mut Vec<u8>) {
        out.put_u64_le(self.job_id);
        out.put_u8(self.kind as u8);
    }

    pub fn read(buf: &mut &[u8]) -> Result<Self, WireError> {
        let job_id = codec::get_u64(buf)?;
        let kind = MessageKind::from_u8(codec::get_u8(buf)?)?;
        Ok(FrameHeader { job_id, kind })
    }

    /// Reads only the job id, for correlating frames whose payload (or even
    /// kind byte) fails to decode.
    pub fn peek_job_id(frame: &[u8]) -> Option<u64> {
        let mut cursor = frame;
        codec::get_u64(&mut cursor).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_nine_bytes() {
        let header = FrameHeader {
            job_id: 0x1122_3344_5566_7788,
            kind: MessageKind::Sleep,
        };
        let mut out = Vec::new();
        header.write(&mut out);
        assert_eq!(out.len(), WORKER_MESSAGE_HEADER_SIZE);
        // Little-endian id first, kind byte last.
        assert_eq!(out[0], 0x88);
        assert_eq!(out[8], MessageKind::Sleep as u8);

        let mut cursor = out.as_slice();
        assert_eq!(FrameHeader::read(&mut cursor), Ok(header));
        assert_eq!(FrameHeader::peek_job_id(&out), Some(header.job_id));
    }

    #[test]
    fn kind_bytes_round_trip_and_unknowns_fail() {
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::from_u8(kind as u8), Ok(kind));
        }
        assert_eq!(
            MessageKind::from_u8(0x7f),
            Err(WireError::UnknownMessageKind(0x7f))
        );
    }
}
