//! Durable, ordered log of local mutations awaiting confirmation.
//!
//! Each entry is persisted as `queue/{seq:020}.json`, so listing the prefix
//! yields enqueue order. Entries leave the queue only when the sync engine
//! acknowledges them.
//!
//! ## Claims
//!
//! [`WriteQueue::drain`] claims the entries it returns. Claimed entries are in
//! transit: a newer enqueue for the same key does not coalesce into them but
//! appends a fresh entry. When a claimed entry is failed or released, any
//! newer entries for the same overwrite-table key are folded back into it, so
//! the coalesced entry keeps its original position. Claims live in memory
//! only; re-opening the queue releases them.
//!
//! ## Sequence numbers
//!
//! Acknowledging the newest entry first records the next sequence number in
//! `meta/queue_seq.json`, so a restart never hands out a sequence number that
//! an acknowledged entry already used.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use scout_core::error::Error as CoreError;
use scout_core::id::MutationId;
use scout_core::key::NaturalKey;
use scout_core::storage::{StorageBackend, WritePrecondition};
use scout_core::table::{QueueTable, WritePolicy};

use crate::error::Result;
use crate::metrics;

const QUEUE_PREFIX: &str = "queue/";
const SEQ_MARK_PATH: &str = "meta/queue_seq.json";

#[derive(Serialize, Deserialize)]
struct SeqMark {
    next_seq: u64,
}

/// A pending local mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Position in the queue. Strictly increasing per enqueue.
    pub seq: u64,
    /// Idempotency key presented to the remote authority.
    pub id: MutationId,
    /// Target table.
    pub table: QueueTable,
    /// Natural key of the target record.
    pub key: NaturalKey,
    /// Full record payload.
    pub payload: Value,
    /// When the entry first entered the queue.
    pub enqueued_at: DateTime<Utc>,
    /// Number of failed push attempts.
    pub attempts: u32,
    /// Error from the most recent failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Result of an enqueue.
#[derive(Debug, Clone)]
pub struct Enqueued {
    /// The entry as persisted.
    pub entry: QueueEntry,
    /// True when the payload replaced an existing unclaimed entry.
    pub coalesced: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: BTreeMap<u64, QueueEntry>,
    claimed: BTreeSet<u64>,
    next_seq: u64,
}

impl QueueState {
    fn newest_for(&self, key: &NaturalKey) -> Option<&QueueEntry> {
        self.entries.values().rev().find(|e| &e.key == key)
    }

    fn newer_than(&self, entry: &QueueEntry) -> Vec<u64> {
        self.entries
            .range(entry.seq + 1..)
            .filter(|(_, e)| e.key == entry.key)
            .map(|(seq, _)| *seq)
            .collect()
    }
}

/// The durable write queue.
pub struct WriteQueue {
    storage: Arc<dyn StorageBackend>,
    state: Mutex<QueueState>,
}

impl std::fmt::Debug for WriteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteQueue").finish_non_exhaustive()
    }
}

async fn load_seq_mark(storage: &dyn StorageBackend) -> Result<u64> {
    if storage.head(SEQ_MARK_PATH).await?.is_none() {
        return Ok(0);
    }
    let data = storage.get(SEQ_MARK_PATH).await?;
    let mark: SeqMark = serde_json::from_slice(&data)
        .map_err(|e| CoreError::serialization(format!("corrupt queue sequence mark: {e}")))?;
    Ok(mark.next_seq)
}

/// Storage path of a queue entry.
#[must_use]
pub fn entry_path(seq: u64) -> String {
    format!("{QUEUE_PREFIX}{seq:020}.json")
}

impl WriteQueue {
    /// Opens the queue, loading every persisted entry.
    ///
    /// Duplicate entries for one overwrite-table key (left behind by a crash
    /// between folding and deleting) are folded into the oldest.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read or an entry is corrupt.
    #[tracing::instrument(skip(storage))]
    pub async fn open(storage: Arc<dyn StorageBackend>) -> Result<Self> {
        let mut state = QueueState {
            next_seq: load_seq_mark(storage.as_ref()).await?,
            ..QueueState::default()
        };
        for meta in storage.list(QUEUE_PREFIX).await? {
            let data = storage.get(&meta.path).await?;
            let entry: QueueEntry = serde_json::from_slice(&data).map_err(|e| {
                CoreError::serialization(format!("corrupt queue entry {}: {e}", meta.path))
            })?;
            state.next_seq = state.next_seq.max(entry.seq + 1);
            state.entries.insert(entry.seq, entry);
        }

        let queue = Self {
            storage,
            state: Mutex::new(state),
        };

        {
            let mut state = queue.state.lock().await;
            let seqs: Vec<u64> = state.entries.keys().copied().collect();
            for seq in seqs {
                queue.fold_newer(&mut state, seq).await?;
            }
            tracing::debug!(entries = state.entries.len(), "write queue opened");
            metrics::record_queue_depth(state.entries.len());
        }

        Ok(queue)
    }

    /// Appends a mutation, or coalesces it into the newest unclaimed entry for
    /// the same key of an overwrite table. Returns once the entry is durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be persisted.
    #[tracing::instrument(skip_all, fields(%table, %key))]
    pub async fn enqueue(
        &self,
        table: QueueTable,
        key: NaturalKey,
        payload: Value,
    ) -> Result<Enqueued> {
        let mut state = self.state.lock().await;

        let target = match table.write_policy() {
            WritePolicy::Overwrite => state
                .newest_for(&key)
                .filter(|e| !state.claimed.contains(&e.seq))
                .cloned(),
            WritePolicy::Append => None,
        };

        let (entry, coalesced) = match target {
            Some(existing) => (
                QueueEntry {
                    id: MutationId::generate(),
                    payload,
                    ..existing
                },
                true,
            ),
            None => {
                let seq = state.next_seq;
                (
                    QueueEntry {
                        seq,
                        id: MutationId::generate(),
                        table,
                        key,
                        payload,
                        enqueued_at: Utc::now(),
                        attempts: 0,
                        last_error: None,
                    },
                    false,
                )
            }
        };

        self.persist(&entry).await?;
        if !coalesced {
            state.next_seq = entry.seq + 1;
        }
        state.entries.insert(entry.seq, entry.clone());

        tracing::debug!(seq = entry.seq, coalesced, "mutation queued");
        metrics::record_enqueue(coalesced);
        metrics::record_queue_depth(state.entries.len());
        Ok(Enqueued { entry, coalesced })
    }

    /// Claims and returns every unclaimed entry in queue order.
    pub async fn drain(&self) -> Vec<QueueEntry> {
        let mut state = self.state.lock().await;
        let drained: Vec<QueueEntry> = state
            .entries
            .values()
            .filter(|e| !state.claimed.contains(&e.seq))
            .cloned()
            .collect();
        state.claimed.extend(drained.iter().map(|e| e.seq));
        drained
    }

    /// Removes an entry. Unknown sequence numbers are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be deleted from storage.
    pub async fn ack(&self, seq: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.entries.contains_key(&seq) {
            if state.entries.range(seq + 1..).next().is_none() {
                let mark = serde_json::to_vec(&SeqMark {
                    next_seq: state.next_seq,
                })?;
                self.storage
                    .put(SEQ_MARK_PATH, Bytes::from(mark), WritePrecondition::None)
                    .await?;
            }
            self.storage.delete(&entry_path(seq)).await?;
            state.entries.remove(&seq);
        }
        state.claimed.remove(&seq);
        metrics::record_queue_depth(state.entries.len());
        Ok(())
    }

    /// Records a failed attempt and returns the entry to the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the updated entry cannot be persisted.
    pub async fn fail(&self, seq: u64, error: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.claimed.remove(&seq);
        let Some(mut entry) = state.entries.get(&seq).cloned() else {
            return Ok(());
        };
        entry.attempts += 1;
        entry.last_error = Some(error.to_string());
        self.persist(&entry).await?;
        state.entries.insert(seq, entry);
        self.fold_newer(&mut state, seq).await
    }

    /// Returns claimed entries to the queue untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if folding superseded entries cannot be persisted.
    pub async fn release(&self, seqs: &[u64]) -> Result<()> {
        let mut state = self.state.lock().await;
        for seq in seqs {
            state.claimed.remove(seq);
        }
        for seq in seqs {
            self.fold_newer(&mut state, *seq).await?;
        }
        Ok(())
    }

    /// Returns true if an entry newer than `seq` exists for `key`.
    pub async fn has_newer(&self, key: &NaturalKey, seq: u64) -> bool {
        let state = self.state.lock().await;
        state
            .entries
            .range(seq + 1..)
            .any(|(_, e)| &e.key == key)
    }

    /// Returns the keys of every queued entry.
    pub async fn queued_keys(&self) -> BTreeSet<NaturalKey> {
        let state = self.state.lock().await;
        state.entries.values().map(|e| e.key.clone()).collect()
    }

    /// Returns every queued entry (claimed or not) in queue order.
    pub async fn entries(&self) -> Vec<QueueEntry> {
        self.state.lock().await.entries.values().cloned().collect()
    }

    /// Returns the number of queued entries.
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Returns true when the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn persist(&self, entry: &QueueEntry) -> Result<()> {
        let data = serde_json::to_vec(entry)?;
        self.storage
            .put(&entry_path(entry.seq), Bytes::from(data), WritePrecondition::None)
            .await?;
        Ok(())
    }

    /// Folds newer unclaimed entries for the same overwrite-table key into the
    /// unclaimed entry at `seq`.
    async fn fold_newer(&self, state: &mut QueueState, seq: u64) -> Result<()> {
        if state.claimed.contains(&seq) {
            return Ok(());
        }
        let Some(base) = state.entries.get(&seq).cloned() else {
            return Ok(());
        };
        if base.table.write_policy() != WritePolicy::Overwrite {
            return Ok(());
        }

        let newer: Vec<u64> = state
            .newer_than(&base)
            .into_iter()
            .filter(|s| !state.claimed.contains(s))
            .collect();
        let Some(latest) = newer.last().and_then(|s| state.entries.get(s)).cloned() else {
            return Ok(());
        };

        let folded_count = newer.len();
        let folded = QueueEntry {
            id: latest.id,
            payload: latest.payload,
            ..base
        };
        self.persist(&folded).await?;
        state.entries.insert(seq, folded);

        for stale in newer {
            self.storage.delete(&entry_path(stale)).await?;
            state.entries.remove(&stale);
        }
        tracing::debug!(seq, folded = folded_count, "folded superseded entries");
        metrics::record_queue_depth(state.entries.len());
        Ok(())
    }
}
