#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Multi-threaded job dispatch for CPU-bound chain work.
//!
//! The host runtime is cooperative and effectively single-threaded; proving,
//! verifying, and bulk note decryption would stall all of its I/O if run in
//! place. This crate owns a bounded set of OS worker threads, a FIFO
//! submission queue, and the framed wire protocol ([`quarry_wire`]) that
//! carries requests and responses across the thread boundary.
//!
//! ```no_run
//! # async fn example() -> Result<(), quarry_pool::PoolError> {
//! use quarry_pool::{PoolConfig, WorkerPool};
//!
//! let pool = WorkerPool::new(PoolConfig::new(4));
//! pool.start()?;
//! let verified = pool.verify_transactions(vec![], vec![]).await?;
//! assert!(verified);
//! pool.stop().await;
//! # Ok(())
//! # }
//! ```

mod error;
mod job;
mod pool;
mod tasks;
mod worker;

pub use error::{JobAbortedError, JobError, PoolError};
pub use job::{Job, JobStatus};
pub use pool::{KindStats, PoolConfig, PoolEvent, WorkerPool};

pub use quarry_wire::{
    DecryptKeys, DecryptNotesOptions, DecryptedNote, EncryptedNoteItem, KeyTable, MessageKind,
    TelemetryField, TelemetryPoint, TelemetryTag, TelemetryValue, WorkerRequest, WorkerResponse,
};
