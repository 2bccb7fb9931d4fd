//! One worker: an OS thread behind a message port.
//!
//! Requests travel into the thread as framed bytes (ownership moved), with an
//! optional sidecar next to the frame: the job's abort flag, and the shared
//! key table for decrypt requests that did not inline their keys. Responses
//! travel back as framed bytes over the pool's response channel, tagged with
//! the worker index.
//!
//! The pool-side [`WorkerHandle`] keeps the `job_id -> job` map; the thread
//! itself is stateless between frames.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use tokio::sync::mpsc;

use quarry_wire::{FrameHeader, JobErrorPayload, KeyTable, WorkerRequest, WorkerResponse};

use crate::job::JobInner;
use crate::tasks::{self, TaskContext};

/// State that rides the port next to a request frame.
pub(crate) struct FrameSidecar {
    pub(crate) abort: Arc<AtomicBool>,
    pub(crate) keys: Option<Arc<KeyTable>>,
}

pub(crate) enum PortMessage {
    Frame {
        bytes: Vec<u8>,
        sidecar: Option<FrameSidecar>,
    },
    Stop,
}

/// A response frame tagged with the index of the worker that produced it.
pub(crate) type ResponseFrame = (usize, Vec<u8>);

/// Pool-side record of one spawned worker.
pub(crate) struct WorkerHandle {
    pub(crate) port: Sender<PortMessage>,
    pub(crate) thread: Option<JoinHandle<()>>,
    pub(crate) jobs: HashMap<u64, Arc<JobInner>>,
    max_jobs: usize,
    /// Set when a port send fails; the thread is gone and takes no new work.
    pub(crate) lost: bool,
}

impl WorkerHandle {
    pub(crate) fn spawn(
        index: usize,
        max_jobs: usize,
        responses: mpsc::UnboundedSender<ResponseFrame>,
    ) -> std::io::Result<Self> {
        let (port, receiver) = crossbeam_channel::unbounded();
        let thread = std::thread::Builder::new()
            .name(format!("quarry-worker-{index}"))
            .spawn(move || worker_main(index, receiver, responses))?;
        Ok(WorkerHandle {
            port,
            thread: Some(thread),
            jobs: HashMap::new(),
            max_jobs,
            lost: false,
        })
    }

    pub(crate) fn can_take_jobs(&self) -> bool {
        !self.lost && self.jobs.len() < self.max_jobs
    }
}

fn worker_main(
    index: usize,
    receiver: Receiver<PortMessage>,
    responses: mpsc::UnboundedSender<ResponseFrame>,
) {
    // Startup ritual: pay the one-time setup cost before taking work. The
    // pool does not gate on this; the first job's latency absorbs it.
    quarry_crypto::initialize();
    tracing::debug!(worker = index, "worker thread ready");

    while let Ok(message) = receiver.recv() {
        let (bytes, sidecar) = match message {
            PortMessage::Stop => break,
            PortMessage::Frame { bytes, sidecar } => (bytes, sidecar),
        };
        if let Some(frame) = handle_frame(&bytes, sidecar)
            && responses.send((index, frame)).is_err()
        {
            // The pool side is gone; nothing left to serve.
            break;
        }
    }
    tracing::debug!(worker = index, "worker thread stopped");
}

/// Decodes and executes one request frame, returning the response frame to
/// post back, or `None` when the frame needs no answer.
fn handle_frame(bytes: &[u8], sidecar: Option<FrameSidecar>) -> Option<Vec<u8>> {
    let shared_keys = sidecar.as_ref().and_then(|s| s.keys.clone());
    let (job_id, request) = match WorkerRequest::deserialize(bytes, shared_keys) {
        Ok(decoded) => decoded,
        Err(err) => {
            // Malformed frame: answer with the diagnostic, keep the channel.
            let job_id = FrameHeader::peek_job_id(bytes).unwrap_or(0);
            tracing::warn!(job_id, error = %err, "malformed request frame");
            let payload = JobErrorPayload {
                error_type: "DispatchError".to_string(),
                code: None,
                message: format!("malformed request frame: {err}"),
                stack: None,
            };
            return Some(WorkerResponse::JobError(payload).serialize(job_id));
        }
    };

    if matches!(request, WorkerRequest::JobAborted) {
        // The abort flag rode with the original request and the pool has
        // already dropped the job; there is nothing to cancel here beyond
        // what abort-aware handlers observe themselves.
        tracing::debug!(job_id, "abort notice received");
        return None;
    }

    let abort = match sidecar {
        Some(sidecar) => sidecar.abort,
        None => Arc::new(AtomicBool::new(false)),
    };
    if abort.load(Ordering::Relaxed) {
        // Aborted while waiting on the port; the output would be dropped.
        tracing::debug!(job_id, "skipping aborted request");
        return None;
    }

    let kind = request.kind();
    let ctx = TaskContext { abort: &abort };
    let outcome = catch_unwind(AssertUnwindSafe(|| tasks::handle_request(request, &ctx)));
    let frame = match outcome {
        Ok(Ok(response)) => response.serialize(job_id),
        Ok(Err(err)) => {
            tracing::debug!(job_id, kind = ?kind, error = %err, "handler failed");
            WorkerResponse::JobError(JobErrorPayload {
                error_type: "JobError".to_string(),
                code: None,
                message: format!("{err:#}"),
                stack: None,
            })
            .serialize(job_id)
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::warn!(job_id, kind = ?kind, message, "handler panicked");
            WorkerResponse::JobError(JobErrorPayload {
                error_type: "panic".to_string(),
                code: None,
                message: message.to_string(),
                stack: None,
            })
            .serialize(job_id)
        }
    };
    Some(frame)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "worker handler panicked"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_wire::{MessageKind, SleepRequest, SleepResponse};

    #[test]
    fn frames_execute_and_answer_in_kind() {
        let request = WorkerRequest::Sleep(SleepRequest {
            duration_ms: 0,
            error: String::new(),
        });
        let frame = handle_frame(&request.serialize(5), None).expect("response frame");
        let (job_id, response) = WorkerResponse::deserialize(&frame).unwrap();
        assert_eq!(job_id, 5);
        assert_eq!(
            response,
            WorkerResponse::Sleep(SleepResponse { aborted: false })
        );
    }

    #[test]
    fn malformed_frames_answer_with_a_dispatch_error() {
        let mut frame = WorkerRequest::JobAborted.serialize(9);
        frame[8] = 0x55;
        let reply = handle_frame(&frame, None).expect("error frame");
        let (job_id, response) = WorkerResponse::deserialize(&reply).unwrap();
        assert_eq!(job_id, 9);
        let WorkerResponse::JobError(payload) = response else {
            panic!("expected a job error");
        };
        assert_eq!(payload.error_type, "DispatchError");
        assert!(payload.message.contains("unknown message kind"));
    }

    #[test]
    fn aborted_and_control_frames_are_silent() {
        assert!(handle_frame(&WorkerRequest::JobAborted.serialize(3), None).is_none());

        let request = WorkerRequest::Sleep(SleepRequest {
            duration_ms: u64::MAX,
            error: String::new(),
        });
        let sidecar = FrameSidecar {
            abort: Arc::new(AtomicBool::new(true)),
            keys: None,
        };
        assert!(handle_frame(&request.serialize(4), Some(sidecar)).is_none());
    }

    #[test]
    fn worker_thread_serves_the_port_until_stopped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut worker = WorkerHandle::spawn(0, 1, tx).unwrap();
        assert!(worker.can_take_jobs());

        let request = WorkerRequest::Sleep(SleepRequest {
            duration_ms: 0,
            error: String::new(),
        });
        worker
            .port
            .send(PortMessage::Frame {
                bytes: request.serialize(1),
                sidecar: Some(FrameSidecar {
                    abort: Arc::new(AtomicBool::new(false)),
                    keys: None,
                }),
            })
            .unwrap();

        let (index, frame) = rx.blocking_recv().expect("response");
        assert_eq!(index, 0);
        assert_eq!(
            WorkerResponse::deserialize(&frame).unwrap().1.kind(),
            MessageKind::Sleep
        );

        worker.port.send(PortMessage::Stop).unwrap();
        worker.thread.take().unwrap().join().unwrap();
    }
}
