//! Job handles and their status machine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::oneshot;

use quarry_wire::{MessageKind, WorkerResponse};

use crate::error::PoolError;
use crate::pool::PoolShared;

/// Lifecycle of a job.
///
/// ```text
///          submit
/// Init  ──────────► Queued ── dispatch ──► Executing ──► Success
///                     │                        │
///                     │                        ├────────► Error
///                     └──────── abort ─────────┴────────► Aborted
/// ```
///
/// Terminal states are permanent; once a job is `Aborted`, late `Success`
/// or `Error` messages for the same id are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Init,
    Queued,
    Executing,
    Success,
    Error,
    Aborted,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Error | JobStatus::Aborted)
    }
}

pub(crate) type JobResult = Result<WorkerResponse, PoolError>;

/// Pool-side job record, shared between the caller's [`Job`] handle and the
/// pool's queue / worker bookkeeping.
pub(crate) struct JobInner {
    pub(crate) id: u64,
    pub(crate) kind: MessageKind,
    status: Mutex<JobStatus>,
    /// Shared with the owning worker's sidecar; abort-aware handlers poll it.
    pub(crate) abort_flag: Arc<AtomicBool>,
    /// Index of the worker currently running the job, if any.
    worker: Mutex<Option<usize>>,
    result_tx: Mutex<Option<oneshot::Sender<JobResult>>>,
}

impl JobInner {
    pub(crate) fn new(
        id: u64,
        kind: MessageKind,
    ) -> (Arc<JobInner>, oneshot::Receiver<JobResult>) {
        let (result_tx, result_rx) = oneshot::channel();
        let inner = Arc::new(JobInner {
            id,
            kind,
            status: Mutex::new(JobStatus::Init),
            abort_flag: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            result_tx: Mutex::new(Some(result_tx)),
        });
        (inner, result_rx)
    }

    pub(crate) fn status(&self) -> JobStatus {
        *self.status.lock().expect("job status lock poisoned")
    }

    /// Applies a status transition, returning the old status when it was
    /// legal and actually changed anything. Terminal states are sticky, so a
    /// late transition against a finished job returns `None` and the caller
    /// drops whatever prompted it.
    pub(crate) fn set_status(&self, to: JobStatus) -> Option<JobStatus> {
        let mut status = self.status.lock().expect("job status lock poisoned");
        let from = *status;
        let legal = matches!(
            (from, to),
            (JobStatus::Init, JobStatus::Queued)
                | (JobStatus::Init, JobStatus::Aborted)
                | (JobStatus::Queued, JobStatus::Executing)
                | (JobStatus::Queued, JobStatus::Aborted)
                | (
                    JobStatus::Executing,
                    JobStatus::Success | JobStatus::Error | JobStatus::Aborted
                )
        );
        if !legal {
            return None;
        }
        *status = to;
        Some(from)
    }

    pub(crate) fn worker(&self) -> Option<usize> {
        *self.worker.lock().expect("job worker lock poisoned")
    }

    pub(crate) fn set_worker(&self, index: Option<usize>) {
        *self.worker.lock().expect("job worker lock poisoned") = index;
    }

    /// Delivers the result, if nobody has yet. A second resolve is a no-op,
    /// as is resolving after the caller dropped its handle.
    pub(crate) fn resolve(&self, result: JobResult) {
        let sender = self
            .result_tx
            .lock()
            .expect("job result lock poisoned")
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(result);
        }
    }
}

/// Caller-side handle for one submitted request.
///
/// Dropping the handle does not cancel the job; call [`Job::abort`] for
/// that.
pub struct Job {
    pub(crate) inner: Arc<JobInner>,
    pub(crate) pool: Weak<PoolShared>,
    pub(crate) result_rx: Option<oneshot::Receiver<JobResult>>,
}

impl Job {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn kind(&self) -> MessageKind {
        self.inner.kind
    }

    pub fn status(&self) -> JobStatus {
        self.inner.status()
    }

    /// Requests cancellation. Legal at any time and idempotent: aborting a
    /// finished (or already aborted) job does nothing.
    pub fn abort(&self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.abort_job(&self.inner);
        } else {
            self.inner.abort_flag.store(true, Ordering::Relaxed);
        }
    }

    /// Awaits the worker's response.
    ///
    /// Rejects with the reconstructed [`crate::JobError`] when the handler
    /// failed, and with [`crate::JobAbortedError`] when the job was aborted
    /// on a pool configured with `enable_job_abort_error`. Without that
    /// option an aborted job's promise is simply never settled.
    pub async fn result(&mut self) -> Result<WorkerResponse, PoolError> {
        let Some(result_rx) = self.result_rx.take() else {
            return Err(PoolError::ResultTaken);
        };
        match result_rx.await {
            Ok(result) => result,
            // The pool dropped the job without settling it.
            Err(_) => Err(PoolError::ConnectionLost),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_follow_the_dag() {
        let (job, _rx) = JobInner::new(1, MessageKind::Sleep);
        assert_eq!(job.status(), JobStatus::Init);

        // Skipping Queued is illegal.
        assert_eq!(job.set_status(JobStatus::Executing), None);

        assert_eq!(job.set_status(JobStatus::Queued), Some(JobStatus::Init));
        assert_eq!(job.set_status(JobStatus::Executing), Some(JobStatus::Queued));
        assert_eq!(job.set_status(JobStatus::Success), Some(JobStatus::Executing));

        // Terminal states are sticky.
        assert_eq!(job.set_status(JobStatus::Error), None);
        assert_eq!(job.set_status(JobStatus::Aborted), None);
        assert_eq!(job.status(), JobStatus::Success);
    }

    #[test]
    fn abort_is_legal_from_queued_and_executing_only_once() {
        let (job, _rx) = JobInner::new(2, MessageKind::Sleep);
        job.set_status(JobStatus::Queued);
        assert_eq!(job.set_status(JobStatus::Aborted), Some(JobStatus::Queued));
        assert_eq!(job.set_status(JobStatus::Aborted), None);

        let (job, _rx) = JobInner::new(3, MessageKind::Sleep);
        job.set_status(JobStatus::Queued);
        job.set_status(JobStatus::Executing);
        assert_eq!(job.set_status(JobStatus::Aborted), Some(JobStatus::Executing));
        // A late success is dropped.
        assert_eq!(job.set_status(JobStatus::Success), None);
    }

    #[test]
    fn resolve_settles_the_promise_once() {
        let (job, mut rx) = JobInner::new(4, MessageKind::Sleep);
        job.resolve(Ok(WorkerResponse::SubmitTelemetry));
        job.resolve(Err(PoolError::ConnectionLost));
        let delivered = rx.try_recv().expect("first resolve delivered");
        assert!(matches!(delivered, Ok(WorkerResponse::SubmitTelemetry)));
    }
}
