//! Sync engine.
//!
//! One pass:
//!
//! 1. Drain (claim) the write queue. Entries enqueued later wait for the next
//!    pass.
//! 2. Push each entry in queue order. Accepted and stale answers are applied
//!    to the record store and acknowledged; transport failures and timeouts
//!    fail the entry, which stays queued, and hold back later entries for the
//!    same key until the next pass. A rejected credential releases the
//!    remaining entries untouched and ends the pushes.
//! 3. Pull remote changes since the stored cursor and merge them as
//!    confirmed, skipping keys that still have queued entries.
//! 4. Recompute the processed teams whose confirmed runs changed.
//!
//! At most one pass runs at a time. [`SyncEngine::sync`] joins a pass that is
//! already in flight; [`SyncEngine::try_sync`] rejects with
//! [`Error::SyncBusy`] instead. A joining caller shares the in-flight pass and
//! therefore the credential it was started with.
//!
//! There is no retry loop here: failed entries are retried by the next
//! explicit sync.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use scout_core::error::Error as CoreError;
use scout_core::id::DeviceId;
use scout_core::key::NaturalKey;
use scout_core::observability;
use scout_core::storage::{StorageBackend, WritePrecondition};
use scout_core::table::{QueueTable, Table, TableKind};

use crate::error::{Error, Result};
use crate::metrics;
use crate::outcome::{SyncFailure, SyncOutcome};
use crate::projection::Projections;
use crate::record_store::RecordStore;
use crate::remote::{Credential, Mutation, PullCursor, PushAck, RemoteAuthority, RemoteError};
use crate::write_queue::{QueueEntry, WriteQueue};

const CURSOR_PATH: &str = "meta/pull_cursor.json";

type PassResult = std::result::Result<SyncOutcome, Arc<Error>>;
type PassFuture = Shared<BoxFuture<'static, PassResult>>;

/// Local state shared between the facade and the engine.
#[derive(Clone)]
pub(crate) struct LocalState {
    pub(crate) storage: Arc<dyn StorageBackend>,
    pub(crate) store: Arc<RecordStore>,
    pub(crate) queue: Arc<WriteQueue>,
    pub(crate) projections: Arc<Projections>,
    /// Readers and enqueues share it; the apply steps of a pass take it
    /// exclusively.
    pub(crate) gate: Arc<RwLock<()>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CursorFile {
    cursor: PullCursor,
}

struct InFlight {
    pass: u64,
    future: PassFuture,
    cancel: CancellationToken,
}

struct EngineInner {
    local: LocalState,
    remote: Arc<dyn RemoteAuthority>,
    device: DeviceId,
    in_flight: Mutex<Option<InFlight>>,
    passes: AtomicU64,
    closed: AtomicBool,
}

/// Clears the in-flight slot when a pass task ends, even by panic.
struct FinishGuard {
    inner: Arc<EngineInner>,
    pass: u64,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.inner.in_flight.lock() {
            if slot.as_ref().is_some_and(|f| f.pass == self.pass) {
                *slot = None;
            }
        }
    }
}

/// Single-flight sync engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("device", &self.inner.device)
            .field("passes", &self.inner.passes.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub(crate) fn new(
        local: LocalState,
        remote: Arc<dyn RemoteAuthority>,
        device: DeviceId,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                local,
                remote,
                device,
                in_flight: Mutex::new(None),
                passes: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Runs a sync pass, or joins the one in flight.
    ///
    /// # Errors
    ///
    /// Returns an error only for local failures (storage) or after shutdown.
    /// Remote failures are reported in the outcome.
    pub async fn sync(&self, credential: &Credential) -> Result<SyncOutcome> {
        self.run(credential, CancellationToken::new(), true).await
    }

    /// Runs a sync pass unless one is in flight.
    ///
    /// # Errors
    ///
    /// Returns `Error::SyncBusy` when a pass is in flight, otherwise as
    /// [`SyncEngine::sync`].
    pub async fn try_sync(&self, credential: &Credential) -> Result<SyncOutcome> {
        self.run(credential, CancellationToken::new(), false).await
    }

    /// Runs (or joins) a sync pass that stops when `cancel` fires.
    ///
    /// When this call starts the pass, cancelling abandons the push in
    /// progress and leaves unprocessed entries queued; entries already
    /// acknowledged stay acknowledged. When it joins a pass started by another
    /// caller, cancelling only stops waiting.
    ///
    /// # Errors
    ///
    /// As [`SyncEngine::sync`].
    pub async fn sync_with_cancel(
        &self,
        credential: &Credential,
        cancel: CancellationToken,
    ) -> Result<SyncOutcome> {
        self.run(credential, cancel, true).await
    }

    /// Cancels the pass in flight, if any.
    pub fn cancel(&self) {
        if let Ok(slot) = self.inner.in_flight.lock() {
            if let Some(current) = slot.as_ref() {
                tracing::info!(pass = current.pass, "cancelling sync pass");
                current.cancel.cancel();
            }
        }
    }

    /// Returns true while a pass is in flight.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.inner
            .in_flight
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or_default()
    }

    /// Stops accepting new passes and waits for the one in flight.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine state lock is poisoned.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        let current = self
            .inner
            .in_flight
            .lock()
            .map_err(|_| CoreError::lock_poisoned())?
            .as_ref()
            .map(|f| f.future.clone());

        if let Some(future) = current {
            if let Err(err) = future.await {
                tracing::warn!(error = %err, "in-flight sync pass failed during shutdown");
            }
        }
        tracing::debug!("sync engine shut down");
        Ok(())
    }

    async fn run(
        &self,
        credential: &Credential,
        cancel: CancellationToken,
        join: bool,
    ) -> Result<SyncOutcome> {
        let (future, joined) = self.start_or_join(credential, &cancel, join)?;

        let result = if joined {
            tokio::select! {
                biased;
                result = future => result,
                () = cancel.cancelled() => return Ok(self.inner.detached_outcome().await),
            }
        } else {
            future.await
        };

        result.map_err(|err| Arc::try_unwrap(err).unwrap_or_else(Error::PassFailed))
    }

    fn start_or_join(
        &self,
        credential: &Credential,
        cancel: &CancellationToken,
        join: bool,
    ) -> Result<(PassFuture, bool)> {
        let mut slot = self
            .inner
            .in_flight
            .lock()
            .map_err(|_| CoreError::lock_poisoned())?;

        if let Some(current) = slot.as_ref() {
            if !join {
                return Err(Error::SyncBusy);
            }
            tracing::debug!(pass = current.pass, "joining in-flight sync pass");
            metrics::record_joined();
            return Ok((current.future.clone(), true));
        }

        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::ShutDown);
        }

        let pass = self.inner.passes.fetch_add(1, Ordering::SeqCst) + 1;
        let guard = FinishGuard {
            inner: Arc::clone(&self.inner),
            pass,
        };
        let credential = credential.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let result = guard
                .inner
                .run_pass(pass, &credential, &token)
                .await
                .map_err(Arc::new);
            drop(guard);
            result
        });

        let future: PassFuture = async move {
            handle.await.unwrap_or_else(|e| {
                Err(Arc::new(Error::internal(format!("sync task failed: {e}"))))
            })
        }
        .boxed()
        .shared();

        *slot = Some(InFlight {
            pass,
            future: future.clone(),
            cancel: cancel.clone(),
        });
        Ok((future, false))
    }
}

impl EngineInner {
    async fn run_pass(
        &self,
        pass: u64,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome> {
        let started = Instant::now();
        let entries = self.local.queue.drain().await;
        let seqs: Vec<u64> = entries.iter().map(|e| e.seq).collect();
        let span = observability::sync_span(pass, entries.len());

        match self
            .process(credential, cancel, entries)
            .instrument(span.clone())
            .await
        {
            Ok(outcome) => {
                span.in_scope(|| {
                    tracing::info!(
                        succeeded = outcome.succeeded.len(),
                        conflicted = outcome.conflicted.len(),
                        pending = outcome.pending.len(),
                        pulled = outcome.pulled,
                        status = outcome.status().as_str(),
                        "sync pass finished"
                    );
                });
                metrics::record_sync_pass(outcome.status().as_str(), started.elapsed());
                Ok(outcome)
            }
            Err(err) => {
                if let Err(release) = self.local.queue.release(&seqs).await {
                    tracing::warn!(error = %release, "failed to release claimed entries");
                }
                span.in_scope(|| tracing::error!(error = %err, "sync pass aborted"));
                metrics::record_sync_pass("error", started.elapsed());
                Err(err)
            }
        }
    }

    async fn process(
        &self,
        credential: &Credential,
        cancel: &CancellationToken,
        entries: Vec<QueueEntry>,
    ) -> Result<SyncOutcome> {
        let mut outcome = SyncOutcome::default();
        let mut touched: BTreeSet<NaturalKey> = BTreeSet::new();

        // Keys whose push failed this pass. Later edits of them wait, so a key
        // is never applied out of queue order.
        let mut failed: BTreeSet<NaturalKey> = BTreeSet::new();

        let mut remaining = entries.into_iter();
        while let Some(entry) = remaining.next() {
            if failed.contains(&entry.key) {
                tracing::debug!(key = %entry.key, seq = entry.seq, "earlier edit failed; deferring");
                self.local.queue.release(&[entry.seq]).await?;
                SyncOutcome::push_unique(&mut outcome.pending, &entry.key);
                continue;
            }

            let mutation = self.mutation_for(&entry)?;

            let pushed = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = self.remote.push(credential, &mutation) => Some(result),
            };

            let Some(result) = pushed else {
                tracing::info!(key = %entry.key, "sync cancelled");
                self.abandon(std::iter::once(entry).chain(remaining), &mut outcome)
                    .await?;
                outcome.fatal = Some(SyncFailure::Cancelled);
                break;
            };

            match result {
                Ok(PushAck::Accepted {
                    remote_version,
                    payload,
                }) => {
                    self.apply(&entry, payload, remote_version).await?;
                    SyncOutcome::push_unique(&mut outcome.succeeded, &entry.key);
                    metrics::record_entry("accepted");
                }
                Ok(PushAck::Stale {
                    remote_version,
                    payload,
                }) => {
                    tracing::info!(key = %entry.key, remote_version, "local edit overridden by remote");
                    self.apply(&entry, payload, remote_version).await?;
                    SyncOutcome::push_unique(&mut outcome.conflicted, &entry.key);
                    metrics::record_entry("stale");
                }
                Err(RemoteError::Unauthorized { message }) => {
                    tracing::warn!(%message, "credential rejected; sync pass aborted");
                    metrics::record_entry("unauthorized");
                    self.abandon(std::iter::once(entry).chain(remaining), &mut outcome)
                        .await?;
                    outcome.fatal = Some(SyncFailure::Auth { message });
                    break;
                }
                Err(err) => {
                    tracing::warn!(
                        key = %entry.key,
                        attempts = entry.attempts + 1,
                        error = %err,
                        "push failed; entry stays queued"
                    );
                    let label = match err {
                        RemoteError::Timeout { .. } => "timeout",
                        _ => "transport",
                    };
                    metrics::record_entry(label);
                    self.local.queue.fail(entry.seq, &err.to_string()).await?;
                    SyncOutcome::push_unique(&mut outcome.pending, &entry.key);
                    failed.insert(entry.key);
                    continue;
                }
            }

            if entry.table == QueueTable::Runs {
                touched.insert(entry.key);
            }
        }

        // A key with edits still queued is reported as pending only.
        outcome.succeeded.retain(|key| !outcome.pending.contains(key));
        outcome.conflicted.retain(|key| !outcome.pending.contains(key));

        if outcome.fatal.is_none() {
            self.pull(credential, cancel, &mut outcome, &mut touched)
                .await?;
        }

        let _gate = self.local.gate.write().await;
        self.local.projections.invalidate(&touched)?;
        self.local.projections.refresh(&self.local.store).await?;

        Ok(outcome)
    }

    fn mutation_for(&self, entry: &QueueEntry) -> Result<Mutation> {
        let base_version = self
            .local
            .store
            .get_one(&entry.key)?
            .and_then(|r| r.remote_version);

        Ok(Mutation {
            id: entry.id,
            device: self.device.clone(),
            table: entry.table,
            key: entry.key.clone(),
            payload: entry.payload.clone(),
            base_version,
        })
    }

    /// Stores the remote answer for an entry and acknowledges it.
    ///
    /// If a newer edit of the same key is still queued, the row keeps showing
    /// that edit and only learns the remote version.
    async fn apply(&self, entry: &QueueEntry, payload: Value, remote_version: u64) -> Result<()> {
        let _gate = self.local.gate.write().await;
        if self.local.queue.has_newer(&entry.key, entry.seq).await {
            self.local
                .store
                .observe_remote_version(&entry.key, remote_version)
                .await?;
        } else {
            self.local
                .store
                .confirm(&entry.key, payload, remote_version)
                .await?;
        }
        self.local.queue.ack(entry.seq).await
    }

    /// Returns unprocessed entries to the queue and reports them pending.
    async fn abandon<I>(&self, entries: I, outcome: &mut SyncOutcome) -> Result<()>
    where
        I: IntoIterator<Item = QueueEntry>,
    {
        let entries: Vec<QueueEntry> = entries.into_iter().collect();
        let seqs: Vec<u64> = entries.iter().map(|e| e.seq).collect();
        self.local.queue.release(&seqs).await?;
        for entry in &entries {
            SyncOutcome::push_unique(&mut outcome.pending, &entry.key);
        }
        Ok(())
    }

    async fn pull(
        &self,
        credential: &Credential,
        cancel: &CancellationToken,
        outcome: &mut SyncOutcome,
        touched: &mut BTreeSet<NaturalKey>,
    ) -> Result<()> {
        let cursor = self.load_cursor().await?;

        let pulled = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = self.remote.pull(credential, cursor) => Some(result),
        };

        let delta = match pulled {
            None => {
                outcome.fatal = Some(SyncFailure::Cancelled);
                return Ok(());
            }
            Some(Ok(delta)) => delta,
            Some(Err(RemoteError::Unauthorized { message })) => {
                tracing::warn!(%message, "credential rejected on pull");
                outcome.fatal = Some(SyncFailure::Auth { message });
                return Ok(());
            }
            Some(Err(err)) => {
                tracing::warn!(error = %err, %cursor, "pull failed");
                outcome.fatal = Some(SyncFailure::Transport {
                    message: err.to_string(),
                });
                return Ok(());
            }
        };

        let _gate = self.local.gate.write().await;
        let queued = self.local.queue.queued_keys().await;
        let mut merged = 0;
        for record in delta.records {
            if record.key.table().kind() == TableKind::Derived || queued.contains(&record.key) {
                continue;
            }
            let changed = self
                .local
                .store
                .confirm(&record.key, record.payload, record.remote_version)
                .await?;
            if changed {
                merged += 1;
                if record.key.table() == Table::Runs {
                    touched.insert(record.key);
                }
            }
        }

        if delta.cursor != cursor {
            self.save_cursor(delta.cursor).await?;
        }
        if merged > 0 {
            tracing::debug!(merged, cursor = %delta.cursor, "merged remote changes");
            metrics::record_pulled(merged);
        }
        outcome.pulled = merged;
        Ok(())
    }

    async fn load_cursor(&self) -> Result<PullCursor> {
        if self.local.storage.head(CURSOR_PATH).await?.is_none() {
            return Ok(PullCursor::default());
        }
        let data = self.local.storage.get(CURSOR_PATH).await?;
        let file: CursorFile = serde_json::from_slice(&data)
            .map_err(|e| CoreError::serialization(format!("corrupt pull cursor: {e}")))?;
        Ok(file.cursor)
    }

    async fn save_cursor(&self, cursor: PullCursor) -> Result<()> {
        let data = serde_json::to_vec(&CursorFile { cursor })?;
        self.local
            .storage
            .put(CURSOR_PATH, Bytes::from(data), WritePrecondition::None)
            .await?;
        Ok(())
    }

    /// Outcome reported to a joined caller that stopped waiting.
    async fn detached_outcome(&self) -> SyncOutcome {
        SyncOutcome {
            pending: self.local.queue.queued_keys().await.into_iter().collect(),
            fatal: Some(SyncFailure::Cancelled),
            ..SyncOutcome::default()
        }
    }
}
