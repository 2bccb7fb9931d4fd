//! The task registry: the compile-time-closed mapping from request kind to
//! handler.
//!
//! Handlers are plain functions from a decoded request to a response. They
//! run to completion unless documented as interruption-tolerant (`sleep`,
//! `decrypt_notes`), which poll the job's abort flag and bail out early; the
//! pool discards whatever an aborted handler returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::DateTime;

use quarry_crypto::{EncryptedNote, RawTransaction, SpendKey};
use quarry_wire::{
    CreateMinersFeeRequest, DecryptNotesRequest, DecryptNotesResponse, DecryptedNote,
    PostTransactionRequest, SleepRequest, SleepResponse, SubmitTelemetryRequest,
    VerifyTransactionsRequest, VerifyTransactionsResponse, WorkerRequest, WorkerResponse,
};

/// Per-job state a handler may consult while running.
pub(crate) struct TaskContext<'a> {
    pub(crate) abort: &'a AtomicBool,
}

impl TaskContext<'_> {
    pub(crate) fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }
}

/// Dispatches a decoded request to its handler.
pub(crate) fn handle_request(
    request: WorkerRequest,
    ctx: &TaskContext<'_>,
) -> anyhow::Result<WorkerResponse> {
    match request {
        WorkerRequest::CreateMinersFee(request) => create_miners_fee(request),
        WorkerRequest::PostTransaction(request) => post_transaction(request),
        WorkerRequest::VerifyTransactions(request) => Ok(verify_transactions(request)),
        WorkerRequest::DecryptNotes(request) => Ok(decrypt_notes(request, ctx)),
        WorkerRequest::Sleep(request) => sleep(request, ctx),
        WorkerRequest::SubmitTelemetry(request) => submit_telemetry(request),
        WorkerRequest::JobAborted => {
            anyhow::bail!("JobAborted is a control message, not an executable request")
        }
    }
}

fn create_miners_fee(request: CreateMinersFeeRequest) -> anyhow::Result<WorkerResponse> {
    let spend_key = SpendKey::from_bytes(request.spend_key);
    let posted = quarry_crypto::create_miners_fee(
        request.amount,
        request.memo,
        &spend_key,
        request.transaction_version,
    )
    .context("create miners fee")?;
    Ok(WorkerResponse::CreateMinersFee {
        transaction: posted.serialize(),
    })
}

fn post_transaction(request: PostTransactionRequest) -> anyhow::Result<WorkerResponse> {
    let mut buf = request.transaction.as_slice();
    let raw = RawTransaction::deserialize(&mut buf).context("parse raw transaction")?;
    if !buf.is_empty() {
        anyhow::bail!("raw transaction has {} trailing bytes", buf.len());
    }
    let spend_key = SpendKey::from_bytes(request.spend_key);
    let posted = quarry_crypto::post_transaction(&raw, &spend_key).context("post transaction")?;
    Ok(WorkerResponse::PostTransaction {
        transaction: posted.serialize(),
    })
}

fn verify_transactions(request: VerifyTransactionsRequest) -> WorkerResponse {
    // Verification is total: malformed input is unverified, never an error.
    let verified =
        quarry_crypto::verify_transactions(&request.transactions, &request.mint_owners);
    WorkerResponse::VerifyTransactions(VerifyTransactionsResponse { verified })
}

/// Tries every note against every account key, producing the logical
/// `notes x accounts` array with `None` in every slot that did not decrypt.
fn decrypt_notes(request: DecryptNotesRequest, ctx: &TaskContext<'_>) -> WorkerResponse {
    let table = request.keys.table();
    let accounts = table.accounts();
    let mut out: Vec<Option<DecryptedNote>> = vec![None; accounts * request.notes.len()];

    'notes: for (note_index, item) in request.notes.iter().enumerate() {
        let Ok(encrypted) = EncryptedNote::from_bytes(&item.serialized) else {
            // Malformed note: its whole row stays empty.
            continue;
        };
        for account_index in 0..accounts {
            if ctx.is_aborted() {
                // Partial output; the pool drops it anyway.
                break 'notes;
            }
            let Some(keys) = table.at(account_index) else {
                continue;
            };
            let slot = note_index * accounts + account_index;
            if let Some(note) = encrypted.decrypt_as_owner(keys.incoming_view_key) {
                let nullifier = item
                    .current_note_index
                    .and_then(|position| note.nullifier(keys.view_key, u64::from(position)));
                out[slot] = Some(DecryptedNote {
                    hash: note.commitment(),
                    value: note.value,
                    memo: note.memo,
                    for_spender: false,
                    nullifier,
                });
                continue;
            }
            if request.options.for_spender
                && let Some(note) = encrypted.decrypt_as_spender(keys.outgoing_view_key)
            {
                out[slot] = Some(DecryptedNote {
                    hash: note.commitment(),
                    value: note.value,
                    memo: note.memo,
                    for_spender: true,
                    nullifier: None,
                });
            }
        }
    }

    WorkerResponse::DecryptNotes(DecryptNotesResponse { notes: out })
}

const SLEEP_POLL: Duration = Duration::from_millis(5);

/// Diagnostic handler: holds the worker for the requested duration, checking
/// the abort flag on a short cadence.
fn sleep(request: SleepRequest, ctx: &TaskContext<'_>) -> anyhow::Result<WorkerResponse> {
    let deadline = Instant::now().checked_add(Duration::from_millis(request.duration_ms));
    loop {
        if ctx.is_aborted() {
            return Ok(WorkerResponse::Sleep(SleepResponse { aborted: true }));
        }
        match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                std::thread::sleep(SLEEP_POLL.min(deadline - now));
            }
            // Durations past the clock's range never wake on their own.
            None => std::thread::sleep(SLEEP_POLL),
        }
    }
    if !request.error.is_empty() {
        anyhow::bail!("{}", request.error);
    }
    Ok(WorkerResponse::Sleep(SleepResponse { aborted: false }))
}

fn submit_telemetry(request: SubmitTelemetryRequest) -> anyhow::Result<WorkerResponse> {
    if request.points.is_empty() {
        return Ok(WorkerResponse::SubmitTelemetry);
    }

    let points: Vec<serde_json::Value> = request
        .points
        .iter()
        .map(|point| {
            let timestamp = DateTime::from_timestamp_millis(point.timestamp_ms)
                .unwrap_or(DateTime::UNIX_EPOCH);
            serde_json::json!({
                "measurement": point.measurement,
                "timestamp": timestamp.to_rfc3339(),
                "tags": point.tags,
                "fields": point.fields,
            })
        })
        .collect();
    let body = serde_json::json!({
        "points": points,
        "graffiti": B64.encode(&request.graffiti),
    });

    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("build telemetry http client")?;
    let url = format!(
        "{}/api/v1/telemetry",
        request.api_host.trim_end_matches('/')
    );
    let res = client
        .post(url)
        .json(&body)
        .send()
        .context("submit telemetry")?;
    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().unwrap_or_default();
        anyhow::bail!("telemetry http {status}: {body}");
    }
    Ok(WorkerResponse::SubmitTelemetry)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    use super::*;
    use quarry_crypto::AccountKeys;
    use quarry_wire::{DecryptKeys, DecryptNotesOptions, EncryptedNoteItem, KeyTable};

    fn ctx_with(abort: &AtomicBool) -> TaskContext<'_> {
        TaskContext { abort }
    }

    fn account_row(keys: &AccountKeys) -> quarry_wire::AccountKeyRow {
        quarry_wire::AccountKeyRow {
            incoming_view_key: *keys.incoming_view_key(),
            outgoing_view_key: *keys.outgoing_view_key(),
            view_key: keys.view_key(),
        }
    }

    #[test]
    fn sleep_zero_completes_and_error_surfaces() {
        let abort = AtomicBool::new(false);
        let response = sleep(
            SleepRequest {
                duration_ms: 0,
                error: String::new(),
            },
            &ctx_with(&abort),
        )
        .unwrap();
        assert_eq!(
            response,
            WorkerResponse::Sleep(SleepResponse { aborted: false })
        );

        let err = sleep(
            SleepRequest {
                duration_ms: 0,
                error: "boom".to_string(),
            },
            &ctx_with(&abort),
        )
        .unwrap_err();
        assert_eq!(format!("{err:#}"), "boom");
    }

    #[test]
    fn sleep_observes_a_preset_abort_flag() {
        let abort = AtomicBool::new(true);
        let response = sleep(
            SleepRequest {
                duration_ms: u64::MAX,
                error: String::new(),
            },
            &ctx_with(&abort),
        )
        .unwrap();
        assert_eq!(
            response,
            WorkerResponse::Sleep(SleepResponse { aborted: true })
        );
    }

    #[test]
    fn decrypt_marks_owned_notes_and_leaves_strangers_empty() {
        let owner = AccountKeys::generate();
        let stranger = AccountKeys::generate();
        let note = quarry_crypto::Note::new(owner.public_address(), 50, [1; 32]);
        let encrypted = note
            .encrypt(owner.incoming_view_key(), stranger.outgoing_view_key())
            .unwrap();

        let table = KeyTable::from_accounts(&[account_row(&owner), account_row(&stranger)]);
        let abort = AtomicBool::new(false);
        let response = decrypt_notes(
            DecryptNotesRequest {
                keys: DecryptKeys::Shared(Arc::new(table)),
                notes: vec![EncryptedNoteItem {
                    serialized: encrypted.as_bytes().to_vec(),
                    current_note_index: Some(3),
                }],
                options: DecryptNotesOptions { for_spender: false },
            },
            &ctx_with(&abort),
        );

        let WorkerResponse::DecryptNotes(response) = response else {
            panic!("wrong response kind");
        };
        assert_eq!(response.notes.len(), 2);
        let decrypted = response.notes[0].as_ref().expect("owner slot filled");
        assert_eq!(decrypted.value, 50);
        assert!(!decrypted.for_spender);
        assert!(decrypted.nullifier.is_some());
        assert!(response.notes[1].is_none());
    }

    #[test]
    fn decrypt_for_spender_uses_the_outgoing_key() {
        let owner = AccountKeys::generate();
        let sender = AccountKeys::generate();
        let note = quarry_crypto::Note::new(owner.public_address(), 9, [0; 32]);
        let encrypted = note
            .encrypt(owner.incoming_view_key(), sender.outgoing_view_key())
            .unwrap();

        let table = KeyTable::from_accounts(&[account_row(&sender)]);
        let abort = AtomicBool::new(false);
        let response = decrypt_notes(
            DecryptNotesRequest {
                keys: DecryptKeys::Inline(table),
                notes: vec![EncryptedNoteItem {
                    serialized: encrypted.as_bytes().to_vec(),
                    current_note_index: None,
                }],
                options: DecryptNotesOptions { for_spender: true },
            },
            &ctx_with(&abort),
        );

        let WorkerResponse::DecryptNotes(response) = response else {
            panic!("wrong response kind");
        };
        let decrypted = response.notes[0].as_ref().expect("spender slot filled");
        assert!(decrypted.for_spender);
        assert!(decrypted.nullifier.is_none());
    }

    #[test]
    fn malformed_notes_yield_empty_rows_not_errors() {
        let owner = AccountKeys::generate();
        let table = KeyTable::from_accounts(&[account_row(&owner)]);
        let abort = AtomicBool::new(false);
        let response = decrypt_notes(
            DecryptNotesRequest {
                keys: DecryptKeys::Inline(table),
                notes: vec![EncryptedNoteItem {
                    serialized: vec![0xab; 7],
                    current_note_index: Some(0),
                }],
                options: DecryptNotesOptions::default(),
            },
            &ctx_with(&abort),
        );
        let WorkerResponse::DecryptNotes(response) = response else {
            panic!("wrong response kind");
        };
        assert_eq!(response.notes, vec![None]);
    }

    #[test]
    fn miners_fee_and_verify_handlers_agree() {
        let keys = AccountKeys::generate();
        let response = create_miners_fee(CreateMinersFeeRequest {
            amount: 100,
            memo: [2; 32],
            spend_key: *keys.spend_key().as_bytes(),
            transaction_version: 2,
        })
        .unwrap();
        let WorkerResponse::CreateMinersFee { transaction } = response else {
            panic!("wrong response kind");
        };

        let verified = verify_transactions(VerifyTransactionsRequest {
            transactions: vec![transaction],
            mint_owners: Vec::new(),
        });
        assert_eq!(
            verified,
            WorkerResponse::VerifyTransactions(VerifyTransactionsResponse { verified: true })
        );
    }
}
