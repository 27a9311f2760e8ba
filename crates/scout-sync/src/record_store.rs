//! Durable local storage of canonical table rows.
//!
//! Rows are persisted one object per natural key under
//! `records/{table}/{field=value}/....json` and mirrored in an in-memory index
//! that is loaded on open. A put returns only after the object is durable.
//!
//! Puts are idempotent: writing the payload, origin and remote version a row
//! already holds does not touch storage, so a repeated sync leaves persisted
//! state byte-identical.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;

use scout_core::error::Error as CoreError;
use scout_core::key::NaturalKey;
use scout_core::record::{Filter, Origin, Record};
use scout_core::storage::{StorageBackend, WritePrecondition};
use scout_core::table::Table;

use crate::error::Result;

const RECORDS_PREFIX: &str = "records/";

/// Storage path of a record.
#[must_use]
pub fn record_path(key: &NaturalKey) -> String {
    format!("{RECORDS_PREFIX}{}/{}.json", key.table(), key.path_segments())
}

/// The local record store.
pub struct RecordStore {
    storage: Arc<dyn StorageBackend>,
    index: RwLock<BTreeMap<NaturalKey, Record>>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore").finish_non_exhaustive()
    }
}

impl RecordStore {
    /// Opens the store, loading every persisted record.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be listed or a record is corrupt.
    #[tracing::instrument(skip(storage))]
    pub async fn open(storage: Arc<dyn StorageBackend>) -> Result<Self> {
        let mut index = BTreeMap::new();
        for meta in storage.list(RECORDS_PREFIX).await? {
            let data = storage.get(&meta.path).await?;
            let record: Record = serde_json::from_slice(&data).map_err(|e| {
                CoreError::serialization(format!("corrupt record {}: {e}", meta.path))
            })?;
            index.insert(record.key.clone(), record);
        }
        tracing::debug!(records = index.len(), "record store opened");

        Ok(Self {
            storage,
            index: RwLock::new(index),
            write_lock: Mutex::new(()),
        })
    }

    /// Returns every record of `table` matching `filter`, ordered by natural key.
    ///
    /// # Errors
    ///
    /// Returns an error if the index lock is poisoned.
    pub fn get(&self, table: Table, filter: &Filter) -> Result<Vec<Record>> {
        let index = self.index.read().map_err(|_| CoreError::lock_poisoned())?;
        Ok(index
            .values()
            .filter(|r| r.table() == table && r.matches(filter))
            .cloned()
            .collect())
    }

    /// Returns the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index lock is poisoned.
    pub fn get_one(&self, key: &NaturalKey) -> Result<Option<Record>> {
        let index = self.index.read().map_err(|_| CoreError::lock_poisoned())?;
        Ok(index.get(key).cloned())
    }

    /// Returns the distinct `(event, team)` keys of confirmed runs, projected
    /// onto `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index lock is poisoned.
    pub fn confirmed_run_groups(&self, target: Table) -> Result<BTreeSet<NaturalKey>> {
        let index = self.index.read().map_err(|_| CoreError::lock_poisoned())?;
        Ok(index
            .values()
            .filter(|r| r.table() == Table::Runs && r.is_confirmed())
            .filter_map(|r| r.key.reproject(target).ok())
            .collect())
    }

    /// Upserts a record, keeping any remote version already known for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be persisted.
    pub async fn put(&self, key: &NaturalKey, payload: Value, origin: Origin) -> Result<Record> {
        self.write(key, |existing| {
            (payload, origin, existing.and_then(|r| r.remote_version))
        })
        .await
    }

    /// Stores a payload confirmed by the remote authority at `remote_version`.
    ///
    /// Returns true when the stored row changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be persisted.
    pub async fn confirm(
        &self,
        key: &NaturalKey,
        payload: Value,
        remote_version: u64,
    ) -> Result<bool> {
        let before = self.get_one(key)?.map(|r| r.version);
        let after = self
            .write(key, |_| (payload, Origin::Confirmed, Some(remote_version)))
            .await?;
        Ok(before != Some(after.version))
    }

    /// Records the remote version of `key` without touching its payload or
    /// origin.
    ///
    /// Used when a newer local edit is still queued: the row keeps showing the
    /// local edit, but the next push carries the right base version.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be persisted.
    pub async fn observe_remote_version(&self, key: &NaturalKey, remote_version: u64) -> Result<()> {
        let Some(current) = self.get_one(key)? else {
            return Ok(());
        };
        self.write(key, |_| (current.payload, current.origin, Some(remote_version)))
            .await?;
        Ok(())
    }

    async fn write<F>(&self, key: &NaturalKey, next: F) -> Result<Record>
    where
        F: FnOnce(Option<&Record>) -> (Value, Origin, Option<u64>),
    {
        let _guard = self.write_lock.lock().await;

        let existing = self.get_one(key)?;
        let (payload, origin, remote_version) = next(existing.as_ref());

        if let Some(current) = &existing {
            if current.payload == payload
                && current.origin == origin
                && current.remote_version == remote_version
            {
                return Ok(current.clone());
            }
        }

        let record = Record {
            key: key.clone(),
            version: existing.as_ref().map_or(1, |r| r.version + 1),
            remote_version,
            payload,
            origin,
            updated_at: Utc::now(),
        };

        let data = serde_json::to_vec(&record)?;
        self.storage
            .put(&record_path(key), Bytes::from(data), WritePrecondition::None)
            .await?;

        self.index
            .write()
            .map_err(|_| CoreError::lock_poisoned())?
            .insert(key.clone(), record.clone());

        tracing::trace!(%key, version = record.version, ?origin, "record written");
        Ok(record)
    }

    /// Returns the number of stored records.
    ///
    /// # Errors
    ///
    /// Returns an error if the index lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.index.read().map_err(|_| CoreError::lock_poisoned())?.len())
    }

    /// Returns true when nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the index lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
