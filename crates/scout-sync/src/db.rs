//! The query and command facade handed to UI collaborators.
//!
//! A [`ScoutDb`] is an explicitly constructed instance: tests open as many
//! isolated databases as they like, each over its own storage backend.
//!
//! ```no_run
//! # async fn demo() -> scout_sync::Result<()> {
//! use std::sync::Arc;
//! use scout_core::prelude::*;
//! use scout_sync::prelude::*;
//! use serde_json::json;
//!
//! let remote = Arc::new(MemoryRemote::new());
//! let db = ScoutDb::builder(Arc::new(MemoryBackend::new()))
//!     .remote(remote)
//!     .open()
//!     .await?;
//!
//! db.add_to_queue(QueueTable::Teams, &json!({"event": "e1", "team": 118}), json!({"drive": "swerve"}))
//!     .await?;
//! let outcome = db.sync(&Credential::new("token")).await?;
//! assert!(outcome.is_success());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use scout_core::config::ScoutConfig;
use scout_core::error::Error as CoreError;
use scout_core::id::DeviceId;
use scout_core::key::NaturalKey;
use scout_core::local_storage::LocalFsBackend;
use scout_core::record::{Filter, Origin, Record};
use scout_core::storage::StorageBackend;
use scout_core::table::{QueueTable, Table};

use crate::engine::{LocalState, SyncEngine};
use crate::error::Result;
use crate::metrics;
use crate::outcome::SyncOutcome;
use crate::projection::{Projections, RunFold, StandardRunFold};
use crate::record_store::RecordStore;
use crate::remote::{Credential, OfflineRemote, RemoteAuthority};
use crate::write_queue::{Enqueued, QueueEntry, WriteQueue};

/// Builder for [`ScoutDb`].
pub struct ScoutDbBuilder {
    storage: Arc<dyn StorageBackend>,
    remote: Arc<dyn RemoteAuthority>,
    fold: Arc<dyn RunFold>,
    device: Option<DeviceId>,
}

impl std::fmt::Debug for ScoutDbBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoutDbBuilder")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl ScoutDbBuilder {
    /// Starts a builder over `storage`, offline and with the standard fold.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            remote: Arc::new(OfflineRemote),
            fold: Arc::new(StandardRunFold),
            device: None,
        }
    }

    /// Sets the remote authority.
    #[must_use]
    pub fn remote(mut self, remote: Arc<dyn RemoteAuthority>) -> Self {
        self.remote = remote;
        self
    }

    /// Sets the fold computing processed teams.
    #[must_use]
    pub fn fold(mut self, fold: Arc<dyn RunFold>) -> Self {
        self.fold = fold;
        self
    }

    /// Sets the device id attached to pushes. A random one is generated
    /// otherwise.
    #[must_use]
    pub fn device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    /// Opens the database, loading persisted records and queue entries.
    ///
    /// Teams with confirmed runs but no stored aggregate are recomputed.
    ///
    /// # Errors
    ///
    /// Returns an error if persisted state cannot be read.
    pub async fn open(self) -> Result<ScoutDb> {
        let store = Arc::new(RecordStore::open(Arc::clone(&self.storage)).await?);
        let queue = Arc::new(WriteQueue::open(Arc::clone(&self.storage)).await?);
        let projections = Arc::new(Projections::new(self.fold));

        let missing = projections.mark_missing(&store)?;
        if missing > 0 {
            tracing::info!(missing, "recomputing processed teams missing on open");
            projections.refresh(&store).await?;
        }
        metrics::record_queue_depth(queue.len().await);

        let local = LocalState {
            storage: self.storage,
            store,
            queue,
            projections,
            gate: Arc::new(RwLock::new(())),
        };
        let device = self.device.unwrap_or_else(DeviceId::generate);
        tracing::debug!(%device, "scout database opened");

        Ok(ScoutDb {
            engine: SyncEngine::new(local.clone(), self.remote, device),
            local,
        })
    }
}

/// A local-first scout database.
#[derive(Clone)]
pub struct ScoutDb {
    local: LocalState,
    engine: SyncEngine,
}

impl std::fmt::Debug for ScoutDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoutDb")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl ScoutDb {
    /// Starts building a database over `storage`.
    #[must_use]
    pub fn builder(storage: Arc<dyn StorageBackend>) -> ScoutDbBuilder {
        ScoutDbBuilder::new(storage)
    }

    /// Opens a database in `config.data_dir` on the local filesystem.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the data directory
    /// cannot be opened.
    pub async fn open_local(
        config: &ScoutConfig,
        remote: Arc<dyn RemoteAuthority>,
    ) -> Result<Self> {
        config.validate()?;
        let backend = LocalFsBackend::open(config.data_dir.clone()).await?;
        ScoutDbBuilder::new(Arc::new(backend))
            .remote(remote)
            .device(config.device_id.clone())
            .open()
            .await
    }

    /// Returns every record of `table` matching `filter`, ordered by natural
    /// key. An empty result is not an error.
    ///
    /// Pending local edits are visible as soon as they are queued.
    ///
    /// # Errors
    ///
    /// Returns an error only if local state cannot be read.
    pub async fn query_db(&self, table: Table, filter: &Filter) -> Result<Vec<Record>> {
        if table == Table::ProcessedTeams && self.local.projections.is_dirty()? {
            let _gate = self.local.gate.write().await;
            self.local.projections.refresh(&self.local.store).await?;
        }
        let _gate = self.local.gate.read().await;
        self.local.store.get(table, filter)
    }

    /// Like [`ScoutDb::query_db`], resolving the table by name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTable` for a name outside the readable tables.
    pub async fn query_named(&self, table: &str, filter: &Filter) -> Result<Vec<Record>> {
        let table: Table = table.parse()?;
        self.query_db(table, filter).await
    }

    /// Queues a write and applies it locally as pending.
    ///
    /// Resolves once the entry is durable. Never fails for lack of
    /// connectivity.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if `key_fields` is not an object carrying the
    /// table's key fields, or a storage error if the entry cannot be
    /// persisted.
    pub async fn add_to_queue(
        &self,
        table: QueueTable,
        key_fields: &Value,
        payload: Value,
    ) -> Result<Enqueued> {
        let Value::Object(fields) = key_fields else {
            return Err(CoreError::invalid_key(table, "key fields must be a JSON object").into());
        };
        let key = NaturalKey::from_fields(table.table(), fields)?;

        let _gate = self.local.gate.read().await;
        let enqueued = self
            .local
            .queue
            .enqueue(table, key.clone(), payload.clone())
            .await?;
        self.local.store.put(&key, payload, Origin::Pending).await?;
        Ok(enqueued)
    }

    /// Pushes queued writes and pulls remote changes, joining a pass already
    /// in flight.
    ///
    /// # Errors
    ///
    /// Returns an error only for local storage failures. Remote failures are
    /// reported in the outcome.
    pub async fn sync(&self, credential: &Credential) -> Result<SyncOutcome> {
        self.engine.sync(credential).await
    }

    /// Like [`ScoutDb::sync`], but rejects with `SyncBusy` while a pass is in
    /// flight.
    ///
    /// # Errors
    ///
    /// Returns `SyncBusy`, or an error as [`ScoutDb::sync`].
    pub async fn try_sync(&self, credential: &Credential) -> Result<SyncOutcome> {
        self.engine.try_sync(credential).await
    }

    /// Like [`ScoutDb::sync`], stopping when `cancel` fires.
    ///
    /// # Errors
    ///
    /// As [`ScoutDb::sync`].
    pub async fn sync_with_cancel(
        &self,
        credential: &Credential,
        cancel: CancellationToken,
    ) -> Result<SyncOutcome> {
        self.engine.sync_with_cancel(credential, cancel).await
    }

    /// Cancels the sync pass in flight, if any.
    pub fn cancel_sync(&self) {
        self.engine.cancel();
    }

    /// Returns true while a sync pass is in flight.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.engine.is_syncing()
    }

    /// Returns the queued entries in queue order.
    pub async fn pending(&self) -> Vec<QueueEntry> {
        self.local.queue.entries().await
    }

    /// Stops accepting syncs and waits for the pass in flight.
    ///
    /// Local reads and writes keep working.
    ///
    /// # Errors
    ///
    /// Returns an error if engine state is poisoned.
    pub async fn shutdown(&self) -> Result<()> {
        self.engine.shutdown().await
    }
}
