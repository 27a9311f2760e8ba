//! Remote authority contract.
//!
//! The remote authority is the single server-side store treated as canonical
//! once a record is confirmed. The sync engine pushes queued mutations to it
//! one at a time and pulls changes made by other devices.
//!
//! Implementations never retry internally: a failed call is reported as a
//! [`RemoteError`] and retried by a later sync pass.

pub mod http;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use scout_core::id::{DeviceId, MutationId};
use scout_core::key::NaturalKey;
use scout_core::observability::Redacted;
use scout_core::table::QueueTable;

pub use http::HttpRemote;
pub use memory::MemoryRemote;

/// Opaque credential presented to the remote authority.
///
/// Never printed: `Debug` and `Display` are redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Redacted<String>);

impl Credential {
    /// Wraps a session token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(Redacted(token.into()))
    }

    /// Returns the raw token for transmission.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.0).finish()
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

/// A queued write presented to the remote authority.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    /// Idempotency key. Replaying the same id returns the original result.
    pub id: MutationId,
    /// Device that authored the mutation.
    pub device: DeviceId,
    /// Target table.
    pub table: QueueTable,
    /// Natural key of the target record.
    pub key: NaturalKey,
    /// Full record payload.
    pub payload: Value,
    /// Last remote version this device observed for the key.
    pub base_version: Option<u64>,
}

/// Remote answer to a push.
#[derive(Debug, Clone, PartialEq)]
pub enum PushAck {
    /// The mutation was applied.
    Accepted {
        /// Version assigned by the remote authority.
        remote_version: u64,
        /// Payload as stored remotely.
        payload: Value,
    },
    /// The remote authority holds a newer version; its payload wins.
    Stale {
        /// Current remote version.
        remote_version: u64,
        /// Current remote payload.
        payload: Value,
    },
}

/// A record as held by the remote authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Natural key.
    pub key: NaturalKey,
    /// Remote payload.
    pub payload: Value,
    /// Remote version of the key.
    pub remote_version: u64,
}

/// Position in the remote change feed.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PullCursor(pub u64);

impl fmt::Display for PullCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Records changed remotely since a cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteDelta {
    /// Changed records in change order.
    pub records: Vec<RemoteRecord>,
    /// Cursor to resume from.
    pub cursor: PullCursor,
}

/// Failure of a single remote call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The credential was rejected. Fatal for the whole sync pass.
    #[error("credential rejected: {message}")]
    Unauthorized {
        /// Description from the remote authority.
        message: String,
    },

    /// The request could not be delivered or the response was unusable.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// The request did not complete in time.
    #[error("remote call timed out: {message}")]
    Timeout {
        /// Description of the timeout.
        message: String,
    },
}

impl RemoteError {
    /// Creates a transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Returns true for credential rejections.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

/// The remote authoritative store.
#[async_trait]
pub trait RemoteAuthority: Send + Sync + 'static {
    /// Pushes one mutation.
    async fn push(&self, credential: &Credential, mutation: &Mutation)
    -> Result<PushAck, RemoteError>;

    /// Returns records changed since `since`.
    async fn pull(&self, credential: &Credential, since: PullCursor)
    -> Result<RemoteDelta, RemoteError>;
}

/// Remote used when no authority is configured. Every call fails with a
/// transport error, so queued work stays queued.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRemote;

#[async_trait]
impl RemoteAuthority for OfflineRemote {
    async fn push(&self, _: &Credential, _: &Mutation) -> Result<PushAck, RemoteError> {
        Err(RemoteError::transport("no remote authority configured"))
    }

    async fn pull(&self, _: &Credential, _: PullCursor) -> Result<RemoteDelta, RemoteError> {
        Err(RemoteError::transport("no remote authority configured"))
    }
}
