use quarry_wire::{JobErrorPayload, MessageKind};

/// A worker-side failure, reconstructed from its [`JobErrorPayload`] frame.
///
/// Handler errors are serialized, not re-thrown: the worker renders whatever
/// its handler produced into a frame, and the pool rebuilds this error for
/// the caller's promise.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{error_type}: {message}")]
pub struct JobError {
    pub error_type: String,
    pub code: Option<String>,
    pub message: String,
    pub stack: Option<String>,
}

impl JobError {
    /// A pool- or worker-side dispatch failure (malformed frame, unknown
    /// kind) rather than a handler failure.
    pub(crate) fn dispatch(message: impl Into<String>) -> Self {
        JobError {
            error_type: "DispatchError".to_string(),
            code: None,
            message: message.into(),
            stack: None,
        }
    }
}

impl From<JobErrorPayload> for JobError {
    fn from(payload: JobErrorPayload) -> Self {
        JobError {
            error_type: payload.error_type,
            code: payload.code,
            message: payload.message,
            stack: payload.stack,
        }
    }
}

impl From<JobError> for JobErrorPayload {
    fn from(error: JobError) -> Self {
        JobErrorPayload {
            error_type: error.error_type,
            code: error.code,
            message: error.message,
            stack: error.stack,
        }
    }
}

/// Rejection delivered for an aborted job when the pool was configured with
/// `enable_job_abort_error`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, thiserror::Error)]
#[error("job aborted")]
pub struct JobAbortedError;

/// Everything a caller can observe through a job's promise or the pool's
/// public operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Aborted(#[from] JobAbortedError),

    /// The owning worker thread died with the job in flight.
    #[error("worker connection lost")]
    ConnectionLost,

    #[error("worker answered a {request:?} request with a {response:?} response")]
    UnexpectedResponse {
        request: MessageKind,
        response: MessageKind,
    },

    /// `Job::result()` was already consumed.
    #[error("job result already taken")]
    ResultTaken,

    #[error("worker protocol version mismatch: pool expects {expected}, wire speaks {found}")]
    ProtocolVersion { expected: u32, found: u32 },

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}
