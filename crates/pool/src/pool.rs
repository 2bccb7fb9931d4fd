//! The pool: owns the workers, the submission queue, and the per-kind
//! statistics, and routes every submitted job to a worker, the queue, or an
//! inline execution on the caller.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tokio::sync::{broadcast, mpsc};

use quarry_crypto::{MEMO_LENGTH, PublicAddress, SPEND_KEY_LENGTH};
use quarry_wire::{
    CreateMinersFeeRequest, DecryptKeys, DecryptNotesOptions, DecryptNotesRequest, DecryptedNote,
    EncryptedNoteItem, FrameHeader, MessageKind, PostTransactionRequest, SleepRequest,
    SubmitTelemetryRequest, TelemetryPoint, VerifyTransactionsRequest, WORKER_PROTOCOL_VERSION,
    WorkerRequest, WorkerResponse,
};

use crate::error::{JobAbortedError, JobError, PoolError};
use crate::job::{Job, JobInner, JobStatus};
use crate::tasks::{self, TaskContext};
use crate::worker::{FrameSidecar, PortMessage, ResponseFrame, WorkerHandle};

/// Pool construction options.
///
/// `num_workers` is the only knob the host is expected to set; zero means
/// every request runs inline on the submitting task.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub num_workers: usize,
    /// Concurrent jobs per worker.
    pub max_jobs: usize,
    /// Queue depth at which [`WorkerPool::saturated`] reports back-pressure.
    pub max_queue: usize,
    /// Reject aborted jobs' promises with [`JobAbortedError`] instead of
    /// leaving them unsettled.
    pub enable_job_abort_error: bool,
    /// Catalogue version this pool was built against; [`WorkerPool::start`]
    /// refuses to run when it disagrees with the wire crate.
    pub protocol_version: u32,
}

impl PoolConfig {
    pub const DEFAULT_MAX_JOBS: usize = 1;
    pub const DEFAULT_MAX_QUEUE: usize = 500;

    pub fn new(num_workers: usize) -> Self {
        PoolConfig {
            num_workers,
            max_jobs: Self::DEFAULT_MAX_JOBS,
            max_queue: Self::DEFAULT_MAX_QUEUE,
            enable_job_abort_error: false,
            protocol_version: WORKER_PROTOCOL_VERSION,
        }
    }

    fn normalize(mut self) -> Self {
        if self.max_jobs == 0 {
            self.max_jobs = Self::DEFAULT_MAX_JOBS;
        }
        if self.max_queue == 0 {
            self.max_queue = Self::DEFAULT_MAX_QUEUE;
        }
        self
    }
}

/// Observable pool activity, in the order it happened.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    Started,
    Stopped,
    JobChanged {
        job_id: u64,
        kind: MessageKind,
        from: JobStatus,
        to: JobStatus,
    },
    JobEnded {
        job_id: u64,
        kind: MessageKind,
        status: JobStatus,
    },
}

/// Per-kind counters, maintained from job status transitions.
///
/// `complete` counts `Success` and `Aborted` terminals; `error` counts
/// `Error`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindStats {
    pub queue: u64,
    pub execute: u64,
    pub complete: u64,
    pub error: u64,
}

struct QueuedJob {
    job: Arc<JobInner>,
    request: WorkerRequest,
}

struct PoolState {
    workers: Vec<WorkerHandle>,
    queue: VecDeque<QueuedJob>,
    stats: HashMap<MessageKind, KindStats>,
    completed: u64,
    started: bool,
}

pub(crate) struct PoolShared {
    config: PoolConfig,
    state: Mutex<PoolState>,
    events: broadcast::Sender<PoolEvent>,
    next_job_id: AtomicU64,
    response_tx: Mutex<Option<mpsc::UnboundedSender<ResponseFrame>>>,
}

impl PoolShared {
    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().expect("pool state lock poisoned")
    }

    fn emit(&self, event: PoolEvent) {
        let _ = self.events.send(event);
    }

    /// Applies a status transition and keeps counters and events in sync.
    /// Returns false when the job was already terminal and the transition
    /// was dropped.
    fn transition(&self, state: &mut PoolState, job: &JobInner, to: JobStatus) -> bool {
        let Some(from) = job.set_status(to) else {
            return false;
        };
        let stats = state.stats.entry(job.kind).or_default();
        match from {
            JobStatus::Queued => stats.queue = stats.queue.saturating_sub(1),
            JobStatus::Executing => stats.execute = stats.execute.saturating_sub(1),
            _ => {}
        }
        match to {
            JobStatus::Queued => stats.queue += 1,
            JobStatus::Executing => stats.execute += 1,
            JobStatus::Success | JobStatus::Aborted => stats.complete += 1,
            JobStatus::Error => stats.error += 1,
            JobStatus::Init => {}
        }
        self.emit(PoolEvent::JobChanged {
            job_id: job.id,
            kind: job.kind,
            from,
            to,
        });
        if to.is_terminal() {
            state.completed += 1;
            self.emit(PoolEvent::JobEnded {
                job_id: job.id,
                kind: job.kind,
                status: to,
            });
        }
        true
    }

    /// Hands a job to worker `index`. The job leaves in `Executing` state
    /// even if the port turns out to be dead, in which case it immediately
    /// fails with a lost connection.
    fn dispatch(&self, state: &mut PoolState, index: usize, job: Arc<JobInner>, request: WorkerRequest) {
        self.transition(state, &job, JobStatus::Executing);
        job.set_worker(Some(index));

        let bytes = request.serialize(job.id);
        let sidecar = FrameSidecar {
            abort: job.abort_flag.clone(),
            keys: request.key_sidecar(),
        };
        let worker = &mut state.workers[index];
        worker.jobs.insert(job.id, job.clone());
        let sent = worker
            .port
            .send(PortMessage::Frame {
                bytes,
                sidecar: Some(sidecar),
            })
            .is_ok();
        if !sent {
            tracing::warn!(worker = index, job_id = job.id, "worker port is dead");
            worker.lost = true;
            worker.jobs.remove(&job.id);
            job.set_worker(None);
            if self.transition(state, &job, JobStatus::Error) {
                job.resolve(Err(PoolError::ConnectionLost));
            }
        }
    }

    /// Moves queued jobs onto workers until one side runs out.
    fn drain_queue(&self, state: &mut PoolState) {
        loop {
            if state.queue.is_empty() {
                return;
            }
            let Some(index) = state.workers.iter().position(WorkerHandle::can_take_jobs) else {
                return;
            };
            let Some(queued) = state.queue.pop_front() else {
                return;
            };
            self.dispatch(state, index, queued.job, queued.request);
        }
    }

    /// Handles one response frame from worker `index`: correlate by job id,
    /// settle the job, then give the freed capacity to the queue.
    fn handle_response(&self, worker_index: usize, frame: Vec<u8>) {
        let decoded = WorkerResponse::deserialize(&frame);
        let job_id = match &decoded {
            Ok((job_id, _)) => *job_id,
            Err(_) => FrameHeader::peek_job_id(&frame).unwrap_or(0),
        };

        let mut state = self.lock();
        let job = state
            .workers
            .get_mut(worker_index)
            .and_then(|worker| worker.jobs.remove(&job_id));
        let Some(job) = job else {
            // Aborted (or otherwise unknown) job: late response, drop it.
            tracing::debug!(job_id, worker = worker_index, "dropping unmatched response");
            return;
        };
        job.set_worker(None);

        match decoded {
            Ok((_, WorkerResponse::JobError(payload))) => {
                if self.transition(&mut state, &job, JobStatus::Error) {
                    job.resolve(Err(PoolError::Job(JobError::from(payload))));
                }
            }
            Ok((_, response)) if response.kind() != job.kind => {
                if self.transition(&mut state, &job, JobStatus::Error) {
                    job.resolve(Err(PoolError::UnexpectedResponse {
                        request: job.kind,
                        response: response.kind(),
                    }));
                }
            }
            Ok((_, response)) => {
                if self.transition(&mut state, &job, JobStatus::Success) {
                    job.resolve(Ok(response));
                }
            }
            Err(err) => {
                tracing::warn!(job_id, error = %err, "malformed response frame");
                if self.transition(&mut state, &job, JobStatus::Error) {
                    job.resolve(Err(PoolError::Job(JobError::dispatch(format!(
                        "malformed response frame: {err}"
                    )))));
                }
            }
        }

        self.drain_queue(&mut state);
    }

    /// Caller-driven cancellation; always legal, idempotent.
    pub(crate) fn abort_job(&self, job: &Arc<JobInner>) {
        let mut state = self.lock();
        let status = job.status();
        if status.is_terminal() {
            return;
        }
        job.abort_flag.store(true, Ordering::Relaxed);

        match status {
            JobStatus::Queued => {
                // Not dispatched yet: no worker to signal.
                state.queue.retain(|queued| queued.job.id != job.id);
            }
            JobStatus::Executing => {
                if let Some(index) = job.worker()
                    && let Some(worker) = state.workers.get_mut(index)
                {
                    worker.jobs.remove(&job.id);
                    let _ = worker.port.send(PortMessage::Frame {
                        bytes: WorkerRequest::JobAborted.serialize(job.id),
                        sidecar: None,
                    });
                }
                job.set_worker(None);
            }
            _ => {}
        }

        if self.transition(&mut state, job, JobStatus::Aborted)
            && self.config.enable_job_abort_error
        {
            job.resolve(Err(PoolError::Aborted(JobAbortedError)));
        }

        // Aborting an executing job frees capacity.
        self.drain_queue(&mut state);
    }
}

/// A bounded set of worker threads behind a single submission queue.
///
/// The pool never blocks and never drops: `execute` always accepts, and the
/// only back-pressure signal is the advisory [`WorkerPool::saturated`].
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    router: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        let config = config.normalize();
        let (events, _) = broadcast::channel(1024);
        WorkerPool {
            shared: Arc::new(PoolShared {
                config,
                state: Mutex::new(PoolState {
                    workers: Vec::new(),
                    queue: VecDeque::new(),
                    stats: HashMap::new(),
                    completed: 0,
                    started: false,
                }),
                events,
                next_job_id: AtomicU64::new(0),
                response_tx: Mutex::new(None),
            }),
            router: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Spawns the configured workers. Idempotent; fails only on a protocol
    /// version mismatch or a thread spawn failure.
    pub fn start(&self) -> Result<(), PoolError> {
        let config = &self.shared.config;
        if config.protocol_version != WORKER_PROTOCOL_VERSION {
            return Err(PoolError::ProtocolVersion {
                expected: config.protocol_version,
                found: WORKER_PROTOCOL_VERSION,
            });
        }

        let mut state = self.shared.lock();
        if state.started {
            return Ok(());
        }
        state.started = true;

        if config.num_workers > 0 {
            let (response_tx, response_rx) = mpsc::unbounded_channel();
            for index in 0..config.num_workers {
                let worker = WorkerHandle::spawn(index, config.max_jobs, response_tx.clone())
                    .map_err(|err| PoolError::Spawn(err.to_string()))?;
                state.workers.push(worker);
            }
            *self
                .shared
                .response_tx
                .lock()
                .expect("response sender lock poisoned") = Some(response_tx);

            let shared = self.shared.clone();
            let router = tokio::spawn(route_responses(shared, response_rx));
            *self.router.lock().expect("router lock poisoned") = Some(router);
        }

        tracing::debug!(workers = config.num_workers, "worker pool started");
        self.shared.emit(PoolEvent::Started);

        // Jobs submitted before start wait in the queue.
        self.shared.drain_queue(&mut state);
        Ok(())
    }

    /// Stops all workers, aborting everything queued or executing, and joins
    /// the threads. Idempotent.
    pub async fn stop(&self) {
        let (threads, router) = {
            let mut state = self.shared.lock();
            if !state.started {
                return;
            }
            state.started = false;

            // Queued jobs first: cheap, no port traffic.
            let queued: Vec<QueuedJob> = state.queue.drain(..).collect();
            for entry in queued {
                entry.job.abort_flag.store(true, Ordering::Relaxed);
                if self.shared.transition(&mut state, &entry.job, JobStatus::Aborted)
                    && self.shared.config.enable_job_abort_error
                {
                    entry.job.resolve(Err(PoolError::Aborted(JobAbortedError)));
                }
            }

            // Then the in-flight jobs, signaled through their ports.
            let mut workers = std::mem::take(&mut state.workers);
            let mut threads = Vec::with_capacity(workers.len());
            for worker in &mut workers {
                let jobs: Vec<Arc<JobInner>> = worker.jobs.drain().map(|(_, job)| job).collect();
                for job in jobs {
                    job.abort_flag.store(true, Ordering::Relaxed);
                    let _ = worker.port.send(PortMessage::Frame {
                        bytes: WorkerRequest::JobAborted.serialize(job.id),
                        sidecar: None,
                    });
                    job.set_worker(None);
                    if self.shared.transition(&mut state, &job, JobStatus::Aborted)
                        && self.shared.config.enable_job_abort_error
                    {
                        job.resolve(Err(PoolError::Aborted(JobAbortedError)));
                    }
                }
                let _ = worker.port.send(PortMessage::Stop);
                if let Some(thread) = worker.thread.take() {
                    threads.push(thread);
                }
            }

            // Dropping the pool's sender lets the router drain and finish
            // once every worker clone is gone too.
            self.shared
                .response_tx
                .lock()
                .expect("response sender lock poisoned")
                .take();
            let router = self.router.lock().expect("router lock poisoned").take();

            self.shared.emit(PoolEvent::Stopped);
            (threads, router)
        };

        if !threads.is_empty() {
            let _ = tokio::task::spawn_blocking(move || join_threads(threads)).await;
        }
        if let Some(router) = router {
            let _ = router.await;
        }
        tracing::debug!("worker pool stopped");
    }

    /// Submits a request. Never blocks; the job lands on a free worker, in
    /// the queue, or — with no workers configured — runs inline before this
    /// returns.
    pub fn execute(&self, request: WorkerRequest) -> Job {
        let job_id = self.shared.next_job_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (inner, result_rx) = JobInner::new(job_id, request.kind());
        let job = Job {
            inner: inner.clone(),
            pool: Arc::downgrade(&self.shared),
            result_rx: Some(result_rx),
        };

        let inline = self.shared.config.num_workers == 0
            || matches!(request, WorkerRequest::JobAborted);
        if inline {
            self.execute_inline(inner, request);
            return job;
        }

        let mut state = self.shared.lock();
        self.shared.transition(&mut state, &inner, JobStatus::Queued);
        if !state.started || !state.queue.is_empty() {
            state.queue.push_back(QueuedJob {
                job: inner,
                request,
            });
            return job;
        }
        match state.workers.iter().position(WorkerHandle::can_take_jobs) {
            Some(index) => self.shared.dispatch(&mut state, index, inner, request),
            None => state.queue.push_back(QueuedJob {
                job: inner,
                request,
            }),
        }
        job
    }

    /// No-worker path: the full lifecycle runs on the caller, handler
    /// included.
    fn execute_inline(&self, inner: Arc<JobInner>, request: WorkerRequest) {
        {
            let mut state = self.shared.lock();
            self.shared.transition(&mut state, &inner, JobStatus::Queued);
            self.shared
                .transition(&mut state, &inner, JobStatus::Executing);
        }

        let ctx = TaskContext {
            abort: &inner.abort_flag,
        };
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tasks::handle_request(request, &ctx)
        }));

        let mut state = self.shared.lock();
        match outcome {
            Ok(Ok(response)) => {
                if self.shared.transition(&mut state, &inner, JobStatus::Success) {
                    inner.resolve(Ok(response));
                }
            }
            Ok(Err(err)) => {
                if self.shared.transition(&mut state, &inner, JobStatus::Error) {
                    inner.resolve(Err(PoolError::Job(JobError {
                        error_type: "JobError".to_string(),
                        code: None,
                        message: format!("{err:#}"),
                        stack: None,
                    })));
                }
            }
            Err(_) => {
                if self.shared.transition(&mut state, &inner, JobStatus::Error) {
                    inner.resolve(Err(PoolError::Job(JobError {
                        error_type: "panic".to_string(),
                        code: None,
                        message: "handler panicked".to_string(),
                        stack: None,
                    })));
                }
            }
        }
    }

    /// Advisory back-pressure: true once the queue has reached `max_queue`.
    /// The pool still accepts; callers observing this throttle themselves.
    pub fn saturated(&self) -> bool {
        self.shared.lock().queue.len() >= self.shared.config.max_queue
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.shared.events.subscribe()
    }

    pub fn stats(&self, kind: MessageKind) -> KindStats {
        self.shared
            .lock()
            .stats
            .get(&kind)
            .copied()
            .unwrap_or_default()
    }

    pub fn queued_count(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn executing_count(&self) -> usize {
        self.shared
            .lock()
            .stats
            .values()
            .map(|stats| stats.execute as usize)
            .sum()
    }

    pub fn completed_count(&self) -> u64 {
        self.shared.lock().completed
    }

    /// Number of live worker threads.
    pub fn worker_count(&self) -> usize {
        self.shared.lock().workers.len()
    }

    /// In-flight jobs assigned to worker `index`.
    pub fn worker_job_count(&self, index: usize) -> Option<usize> {
        self.shared
            .lock()
            .workers
            .get(index)
            .map(|worker| worker.jobs.len())
    }

    // Typed convenience wrappers. Each validates the response kind against
    // the request kind before surfacing the payload.

    pub async fn create_miners_fee(
        &self,
        amount: u64,
        memo: [u8; MEMO_LENGTH],
        spend_key: [u8; SPEND_KEY_LENGTH],
        transaction_version: u8,
    ) -> Result<Vec<u8>, PoolError> {
        let mut job = self.execute(WorkerRequest::CreateMinersFee(CreateMinersFeeRequest {
            amount,
            memo,
            spend_key,
            transaction_version,
        }));
        match job.result().await? {
            WorkerResponse::CreateMinersFee { transaction } => Ok(transaction),
            other => Err(unexpected(MessageKind::CreateMinersFee, &other)),
        }
    }

    pub async fn post_transaction(
        &self,
        transaction: Vec<u8>,
        spend_key: [u8; SPEND_KEY_LENGTH],
    ) -> Result<Vec<u8>, PoolError> {
        let mut job = self.execute(WorkerRequest::PostTransaction(PostTransactionRequest {
            transaction,
            spend_key,
        }));
        match job.result().await? {
            WorkerResponse::PostTransaction { transaction } => Ok(transaction),
            other => Err(unexpected(MessageKind::PostTransaction, &other)),
        }
    }

    pub async fn verify_transactions(
        &self,
        transactions: Vec<Vec<u8>>,
        mint_owners: Vec<PublicAddress>,
    ) -> Result<bool, PoolError> {
        let mut job = self.execute(WorkerRequest::VerifyTransactions(
            VerifyTransactionsRequest {
                transactions,
                mint_owners,
            },
        ));
        match job.result().await? {
            WorkerResponse::VerifyTransactions(response) => Ok(response.verified),
            other => Err(unexpected(MessageKind::VerifyTransactions, &other)),
        }
    }

    pub async fn decrypt_notes(
        &self,
        keys: DecryptKeys,
        notes: Vec<EncryptedNoteItem>,
        options: DecryptNotesOptions,
    ) -> Result<Vec<Option<DecryptedNote>>, PoolError> {
        let mut job = self.execute(WorkerRequest::DecryptNotes(DecryptNotesRequest {
            keys,
            notes,
            options,
        }));
        match job.result().await? {
            WorkerResponse::DecryptNotes(response) => Ok(response.notes),
            other => Err(unexpected(MessageKind::DecryptNotes, &other)),
        }
    }

    /// Returns whether the sleep was aborted.
    pub async fn sleep(&self, duration_ms: u64, error: Option<String>) -> Result<bool, PoolError> {
        let mut job = self.execute(WorkerRequest::Sleep(SleepRequest {
            duration_ms,
            error: error.unwrap_or_default(),
        }));
        match job.result().await? {
            WorkerResponse::Sleep(response) => Ok(response.aborted),
            other => Err(unexpected(MessageKind::Sleep, &other)),
        }
    }

    pub async fn submit_telemetry(
        &self,
        points: Vec<TelemetryPoint>,
        graffiti: Vec<u8>,
        api_host: String,
    ) -> Result<(), PoolError> {
        let mut job = self.execute(WorkerRequest::SubmitTelemetry(SubmitTelemetryRequest {
            points,
            graffiti,
            api_host,
        }));
        match job.result().await? {
            WorkerResponse::SubmitTelemetry => Ok(()),
            other => Err(unexpected(MessageKind::SubmitTelemetry, &other)),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Best-effort: unblock worker threads so they exit; no joining here.
        let mut state = self.shared.lock();
        for worker in &mut state.workers {
            let _ = worker.port.send(PortMessage::Stop);
        }
        state.workers.clear();
    }
}

fn unexpected(request: MessageKind, response: &WorkerResponse) -> PoolError {
    PoolError::UnexpectedResponse {
        request,
        response: response.kind(),
    }
}

fn join_threads(threads: Vec<JoinHandle<()>>) {
    for thread in threads {
        if thread.join().is_err() {
            tracing::warn!("worker thread panicked during shutdown");
        }
    }
}

async fn route_responses(
    shared: Arc<PoolShared>,
    mut responses: mpsc::UnboundedReceiver<ResponseFrame>,
) {
    while let Some((worker_index, frame)) = responses.recv().await {
        shared.handle_response(worker_index, frame);
    }
}
