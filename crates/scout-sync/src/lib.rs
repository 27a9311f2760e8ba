//! # scout-sync
//!
//! Local-first write queue, sync engine and team projections for scout.
//!
//! - **Record Store**: durable canonical rows, pending or confirmed
//! - **Write Queue**: ordered log of local mutations, coalescing overwrites
//! - **Remote Authority**: the canonical server-side store (HTTP or in-memory)
//! - **Sync Engine**: single-flight push/pull with per-entry failure isolation
//! - **Projections**: processed team aggregates folded from confirmed runs
//!
//! ## Storage Layout
//!
//! ```text
//! {data_dir}/
//! ├── records/{table}/{field=value}/....json   # record store rows
//! ├── queue/{seq:020}.json                     # write queue entries
//! └── meta/pull_cursor.json                    # remote change feed cursor
//! ```
//!
//! The entry point is [`ScoutDb`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod db;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod outcome;
pub mod projection;
pub mod record_store;
pub mod remote;
pub mod write_queue;

pub use db::{ScoutDb, ScoutDbBuilder};
pub use engine::SyncEngine;
pub use error::{Error, Result};
pub use outcome::{SyncFailure, SyncOutcome, SyncStatus};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::db::{ScoutDb, ScoutDbBuilder};
    pub use crate::error::{Error, Result};
    pub use crate::outcome::{SyncFailure, SyncOutcome, SyncStatus};
    pub use crate::projection::{RunFold, StandardRunFold};
    pub use crate::remote::{
        Credential, HttpRemote, MemoryRemote, OfflineRemote, RemoteAuthority, RemoteError,
    };
    pub use crate::write_queue::{Enqueued, QueueEntry};
    pub use tokio_util::sync::CancellationToken;
}
