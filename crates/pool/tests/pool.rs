//! End-to-end pool behavior: routing, abort semantics, shutdown, and the
//! typed request surface.

use quarry_crypto::{AccountKeys, MintDescription, Note, RawTransaction};
use quarry_pool::{
    DecryptKeys, DecryptNotesOptions, EncryptedNoteItem, JobStatus, KeyTable, MessageKind,
    PoolConfig, PoolError, PoolEvent, WorkerPool, WorkerRequest,
};
use quarry_wire::{AccountKeyRow, SleepRequest};

fn sleep_request(duration_ms: u64) -> WorkerRequest {
    WorkerRequest::Sleep(SleepRequest {
        duration_ms,
        error: String::new(),
    })
}

fn abortable_pool(num_workers: usize) -> WorkerPool {
    let mut config = PoolConfig::new(num_workers);
    config.enable_job_abort_error = true;
    WorkerPool::new(config)
}

fn account_row(keys: &AccountKeys) -> AccountKeyRow {
    AccountKeyRow {
        incoming_view_key: *keys.incoming_view_key(),
        outgoing_view_key: *keys.outgoing_view_key(),
        view_key: keys.view_key(),
    }
}

#[tokio::test]
async fn empty_pool_executes_inline() {
    let pool = WorkerPool::new(PoolConfig::new(0));
    pool.start().unwrap();
    assert_eq!(pool.worker_count(), 0);

    let aborted = pool.sleep(0, None).await.unwrap();
    assert!(!aborted);

    assert_eq!(pool.worker_count(), 0);
    assert_eq!(pool.completed_count(), 1);
    assert_eq!(pool.queued_count(), 0);
    assert_eq!(pool.executing_count(), 0);

    pool.stop().await;
}

#[tokio::test]
async fn abort_collapses_an_executing_job() {
    let pool = abortable_pool(1);
    pool.start().unwrap();

    let mut job = pool.execute(sleep_request(u64::MAX));
    assert_eq!(job.status(), JobStatus::Executing);
    assert_eq!(pool.executing_count(), 1);
    assert_eq!(pool.worker_job_count(0), Some(1));

    job.abort();
    assert_eq!(job.status(), JobStatus::Aborted);
    assert_eq!(pool.worker_job_count(0), Some(0));
    assert_eq!(pool.executing_count(), 0);
    assert_eq!(pool.queued_count(), 0);

    let err = job.result().await.unwrap_err();
    assert!(matches!(err, PoolError::Aborted(_)));

    // Re-abort is a no-op.
    job.abort();
    assert_eq!(pool.completed_count(), 1);

    pool.stop().await;
}

#[tokio::test]
async fn second_job_queues_behind_a_busy_worker() {
    let pool = abortable_pool(1);
    pool.start().unwrap();

    let job1 = pool.execute(sleep_request(u64::MAX));
    let job2 = pool.execute(sleep_request(u64::MAX));

    assert_eq!(job1.status(), JobStatus::Executing);
    assert_eq!(job2.status(), JobStatus::Queued);
    assert_eq!(pool.worker_job_count(0), Some(1));
    assert_eq!(pool.executing_count(), 1);
    assert_eq!(pool.queued_count(), 1);

    pool.stop().await;

    assert_eq!(job1.status(), JobStatus::Aborted);
    assert_eq!(job2.status(), JobStatus::Aborted);
    assert_eq!(pool.completed_count(), 2);
    assert_eq!(pool.queued_count(), 0);
    assert_eq!(pool.executing_count(), 0);
}

#[tokio::test]
async fn handler_errors_surface_through_the_promise() {
    let pool = WorkerPool::new(PoolConfig::new(1));
    pool.start().unwrap();

    let err = pool.sleep(0, Some("boom".to_string())).await.unwrap_err();
    let PoolError::Job(job_error) = err else {
        panic!("expected a job error, got {err:?}");
    };
    assert_eq!(job_error.message, "boom");
    assert_eq!(job_error.error_type, "JobError");

    assert_eq!(pool.completed_count(), 1);
    assert_eq!(pool.stats(MessageKind::Sleep).error, 1);
    assert_eq!(pool.stats(MessageKind::Sleep).complete, 0);

    pool.stop().await;
}

#[tokio::test]
async fn decrypt_notes_finds_the_owner_and_skips_strangers() {
    let owner = AccountKeys::generate();
    let sender = AccountKeys::generate();
    let note = Note::new(owner.public_address(), 1_000, [7; 32]);
    let encrypted = note
        .encrypt(owner.incoming_view_key(), sender.outgoing_view_key())
        .unwrap();
    let note_item = EncryptedNoteItem {
        serialized: encrypted.as_bytes().to_vec(),
        current_note_index: Some(0),
    };

    let pool = WorkerPool::new(PoolConfig::new(1));
    pool.start().unwrap();

    // One owner account: exactly one decrypted entry at index 0.
    let table = KeyTable::from_accounts(&[account_row(&owner)]);
    let decrypted = pool
        .decrypt_notes(
            DecryptKeys::Shared(table.into()),
            vec![note_item.clone()],
            DecryptNotesOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(decrypted.len(), 1);
    let entry = decrypted[0].as_ref().expect("owner decrypts at index 0");
    assert!(entry.value > 0);
    assert_eq!(entry.value, 1_000);
    assert!(entry.nullifier.is_some());

    // Adding an unrelated account widens each note's row; the stranger's
    // slot stays empty.
    let unrelated = AccountKeys::generate();
    let table = KeyTable::from_accounts(&[account_row(&owner), account_row(&unrelated)]);
    let decrypted = pool
        .decrypt_notes(
            DecryptKeys::Shared(table.into()),
            vec![note_item],
            DecryptNotesOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(decrypted.len(), 2);
    assert!(decrypted[0].is_some());
    assert!(decrypted[1].is_none());

    pool.stop().await;
}

#[tokio::test]
async fn verify_transactions_enforces_mint_owners() {
    let minter = AccountKeys::generate();
    let other = AccountKeys::generate();
    let raw = RawTransaction {
        version: 2,
        fee: 1,
        expiration: 100,
        outputs: Vec::new(),
        mints: vec![MintDescription {
            asset_id: [9; 32],
            owner: minter.public_address(),
            value: 10,
        }],
    };

    let pool = WorkerPool::new(PoolConfig::new(1));
    pool.start().unwrap();

    let posted = pool
        .post_transaction(raw.serialize(), *minter.spend_key().as_bytes())
        .await
        .unwrap();

    let verified = pool
        .verify_transactions(vec![posted.clone()], vec![other.public_address()])
        .await
        .unwrap();
    assert!(!verified);

    let verified = pool
        .verify_transactions(vec![posted], vec![minter.public_address()])
        .await
        .unwrap();
    assert!(verified);

    pool.stop().await;
}

#[tokio::test]
async fn miners_fee_round_trips_through_a_worker() {
    let keys = AccountKeys::generate();
    let pool = WorkerPool::new(PoolConfig::new(1));
    pool.start().unwrap();

    let transaction = pool
        .create_miners_fee(500, [0; 32], *keys.spend_key().as_bytes(), 2)
        .await
        .unwrap();
    let verified = pool
        .verify_transactions(vec![transaction], vec![])
        .await
        .unwrap();
    assert!(verified);

    pool.stop().await;
}

#[tokio::test]
async fn accounting_identity_holds_at_every_observation() {
    let pool = abortable_pool(1);
    pool.start().unwrap();

    let _long = pool.execute(sleep_request(u64::MAX));
    let _queued_a = pool.execute(sleep_request(0));
    let _queued_b = pool.execute(sleep_request(0));

    // Three submitted: one executing, two queued, none complete.
    assert_eq!(
        pool.queued_count() + pool.executing_count() + pool.completed_count() as usize,
        3
    );

    pool.stop().await;
    assert_eq!(pool.queued_count(), 0);
    assert_eq!(pool.executing_count(), 0);
    assert_eq!(pool.completed_count(), 3);
}

#[tokio::test]
async fn queue_preserves_submission_order() {
    let pool = WorkerPool::new(PoolConfig::new(1));
    let mut events = pool.subscribe();
    pool.start().unwrap();

    let first = pool.execute(sleep_request(20));
    let second = pool.execute(sleep_request(0));
    let mut third = pool.execute(sleep_request(0));

    // Capacity is one; the rest wait in FIFO order.
    assert_eq!(pool.queued_count(), 2);
    let _ = third.result().await.unwrap();

    let mut ended = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let PoolEvent::JobEnded { job_id, .. } = event {
            ended.push(job_id);
        }
    }
    assert_eq!(ended, vec![first.id(), second.id(), third.id()]);

    pool.stop().await;
}

#[tokio::test]
async fn saturated_is_advisory_and_never_rejects() {
    let mut config = PoolConfig::new(1);
    config.max_queue = 1;
    let pool = WorkerPool::new(config);
    pool.start().unwrap();

    let _busy = pool.execute(sleep_request(u64::MAX));
    assert!(!pool.saturated());
    let _queued = pool.execute(sleep_request(u64::MAX));
    assert!(pool.saturated());

    // Still accepted past the advisory limit.
    let overflow = pool.execute(sleep_request(u64::MAX));
    assert_eq!(overflow.status(), JobStatus::Queued);
    assert_eq!(pool.queued_count(), 2);

    pool.stop().await;
}

#[tokio::test]
async fn jobs_submitted_before_start_run_after_it() {
    let pool = WorkerPool::new(PoolConfig::new(1));
    let mut job = pool.execute(sleep_request(0));
    assert_eq!(job.status(), JobStatus::Queued);

    pool.start().unwrap();
    let response = job.result().await.unwrap();
    assert_eq!(response.kind(), MessageKind::Sleep);

    pool.stop().await;
}

#[tokio::test]
async fn status_events_arrive_in_dag_order() {
    let pool = WorkerPool::new(PoolConfig::new(1));
    let mut events = pool.subscribe();
    pool.start().unwrap();

    let mut job = pool.execute(sleep_request(0));
    let _ = job.result().await.unwrap();
    pool.stop().await;

    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let PoolEvent::JobChanged { from, to, .. } = event {
            transitions.push((from, to));
        }
    }
    assert_eq!(
        transitions,
        vec![
            (JobStatus::Init, JobStatus::Queued),
            (JobStatus::Queued, JobStatus::Executing),
            (JobStatus::Executing, JobStatus::Success),
        ]
    );
}

#[tokio::test]
async fn empty_telemetry_batches_skip_the_upload() {
    let pool = WorkerPool::new(PoolConfig::new(1));
    pool.start().unwrap();

    pool.submit_telemetry(vec![], b"graffiti".to_vec(), "http://127.0.0.1:9".to_string())
        .await
        .unwrap();
    assert_eq!(pool.stats(MessageKind::SubmitTelemetry).complete, 1);

    pool.stop().await;
}

#[tokio::test]
async fn start_refuses_a_protocol_version_mismatch() {
    let mut config = PoolConfig::new(1);
    config.protocol_version = 999;
    let pool = WorkerPool::new(config);
    assert!(matches!(
        pool.start(),
        Err(PoolError::ProtocolVersion { expected: 999, .. })
    ));
    assert_eq!(pool.worker_count(), 0);
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let pool = WorkerPool::new(PoolConfig::new(2));
    pool.start().unwrap();
    pool.start().unwrap();
    assert_eq!(pool.worker_count(), 2);

    pool.stop().await;
    pool.stop().await;
    assert_eq!(pool.worker_count(), 0);
}
