//! # scout-core
//!
//! Shared primitives for the scout local-first data store.
//!
//! - **Tables and keys**: the closed set of tables and their natural keys
//! - **Records and filters**: canonical rows and field-equality queries
//! - **Storage**: the durable backend contract with memory and filesystem
//!   implementations
//! - **Errors**: the shared error type and result alias
//! - **Configuration and logging**: device settings and tracing setup
//!
//! ## Example
//!
//! ```rust
//! use scout_core::prelude::*;
//! use serde_json::json;
//!
//! let fields = json!({"event": "e1", "team": 118});
//! let key = NaturalKey::from_fields(Table::Teams, fields.as_object().unwrap()).unwrap();
//! assert_eq!(key.to_string(), "teams[event=e1, team=118]");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod id;
pub mod key;
pub mod local_storage;
pub mod observability;
pub mod record;
pub mod storage;
pub mod table;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::ScoutConfig;
    pub use crate::error::{Error, Result};
    pub use crate::id::{DeviceId, MutationId};
    pub use crate::key::{KeyPart, NaturalKey};
    pub use crate::local_storage::LocalFsBackend;
    pub use crate::record::{Filter, Origin, Record};
    pub use crate::storage::{
        MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult,
    };
    pub use crate::table::{QueueTable, Table, TableKind, WritePolicy, queue_tables, readable_tables};
}

pub use error::{Error, Result};
