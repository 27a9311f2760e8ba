//! Error types and result aliases for scout.
//!
//! This module defines the shared error type used by every scout crate.
//! Errors are structured for programmatic handling: callers distinguish
//! malformed input (rejected before anything is queued) from local
//! durability failures (fatal to the individual call).

use std::fmt;

/// The result type used throughout scout.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in scout operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A natural key was missing a field or carried an unusable value.
    #[error("invalid natural key for {table}: {message}")]
    InvalidKey {
        /// Table the key was built for.
        table: String,
        /// Description of what made the key invalid.
        message: String,
    },

    /// A table name did not resolve to a known table.
    ///
    /// The set of tables is closed at build time, so this always indicates a
    /// programming error in the caller rather than a runtime fault.
    #[error("unknown table: {name}")]
    UnknownTable {
        /// The name that failed to resolve.
        name: String,
    },

    /// A write was attempted against a table that only the projection
    /// pipeline (or the remote authority) may populate.
    #[error("table {table} does not accept queued writes")]
    NotQueueable {
        /// The table that was targeted.
        table: String,
    },

    /// A local storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// A path or object was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new invalid key error for the given table.
    #[must_use]
    pub fn invalid_key(table: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::InvalidKey {
            table: table.to_string(),
            message: message.into(),
        }
    }

    /// Creates a serialization error from any displayable cause.
    #[must_use]
    pub fn serialization(message: impl fmt::Display) -> Self {
        Self::Serialization {
            message: message.to_string(),
        }
    }

    /// Creates an internal error for a poisoned lock.
    #[must_use]
    pub fn lock_poisoned() -> Self {
        Self::Internal {
            message: "lock poisoned".into(),
        }
    }

    /// Returns true when the error came from local durable storage.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}
