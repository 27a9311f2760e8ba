//! Error types for scout-sync operations.

use std::sync::Arc;

use thiserror::Error;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the facade, queue, store or sync engine.
///
/// Per-entry remote failures are not errors: they are reported inside
/// [`SyncOutcome`](crate::outcome::SyncOutcome).
#[derive(Debug, Error)]
pub enum Error {
    /// A shared-primitive error (invalid key, unknown table, storage).
    #[error(transparent)]
    Core(#[from] scout_core::Error),

    /// A sync pass is already in flight.
    #[error("a sync pass is already in flight")]
    SyncBusy,

    /// The engine has been shut down.
    #[error("sync engine is shut down")]
    ShutDown,

    /// A sync pass failed locally; every caller that joined it sees the same
    /// failure.
    #[error("sync pass failed: {0}")]
    PassFailed(Arc<Error>),

    /// A background task failed unexpectedly.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true when the error came from local durable storage.
    #[must_use]
    pub fn is_storage(&self) -> bool {
        match self {
            Self::Core(e) => e.is_storage(),
            Self::PassFailed(e) => e.is_storage(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Core(scout_core::Error::serialization(e))
    }
}
