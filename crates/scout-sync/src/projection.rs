//! Read projections: per-team aggregates folded from match runs.
//!
//! A processed team `(event, team)` is a pure fold over the *confirmed* runs
//! sharing that key, taken in natural-key order. Pending runs are excluded, so
//! the aggregate depends only on what the remote authority has confirmed and
//! not on the order in which runs were synced.
//!
//! Aggregates are stored as `processed_teams` records and replaced wholesale.
//! Only keys marked dirty are recomputed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value, json};

use scout_core::error::Error as CoreError;
use scout_core::key::NaturalKey;
use scout_core::record::{Filter, Origin, Record};
use scout_core::table::Table;

use crate::error::Result;
use crate::metrics;
use crate::record_store::RecordStore;

/// Template-defined fold of a team's runs into a summary.
///
/// Implementations must be deterministic: the same runs in the same order
/// always yield the same summary. Runs are handed over sorted by natural key.
pub trait RunFold: Send + Sync + 'static {
    /// Folds the confirmed runs of one `(event, team)` into a summary payload.
    fn fold(&self, runs: &[Record]) -> Value;
}

impl<F> RunFold for F
where
    F: Fn(&[Record]) -> Value + Send + Sync + 'static,
{
    fn fold(&self, runs: &[Record]) -> Value {
        self(runs)
    }
}

/// Default run summary.
///
/// Produces:
/// - `runs`: number of runs
/// - `matches`: match numbers in order
/// - `positions`: counts of the `position` field
/// - `journal`: per-action counts and per-match means over `journal` arrays
/// - `stats`: count/sum/min/max/mean of every top-level numeric field
/// - `notes`: non-empty `notes` with their match
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRunFold;

const KEY_FIELDS: [&str; 3] = ["event", "team", "match"];

impl StandardRunFold {
    fn journal_action(item: &Value) -> Option<&str> {
        match item {
            Value::String(s) => Some(s.as_str()),
            Value::Object(obj) => ["action", "event", "type"]
                .iter()
                .find_map(|field| obj.get(*field).and_then(Value::as_str)),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct FieldStats {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl FieldStats {
    fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        // Saturate so the summary stays valid JSON; infinity serializes as null.
        self.sum = (self.sum + value).clamp(f64::MIN, f64::MAX);
    }

    #[allow(clippy::cast_precision_loss)]
    fn to_value(&self) -> Value {
        json!({
            "count": self.count,
            "sum": self.sum,
            "min": self.min,
            "max": self.max,
            "mean": self.sum / self.count as f64,
        })
    }
}

impl RunFold for StandardRunFold {
    #[allow(clippy::cast_precision_loss)]
    fn fold(&self, runs: &[Record]) -> Value {
        let mut matches = Vec::with_capacity(runs.len());
        let mut positions: Map<String, Value> = Map::new();
        let mut journal: BTreeMap<String, u64> = BTreeMap::new();
        let mut stats: BTreeMap<String, FieldStats> = BTreeMap::new();
        let mut notes = Vec::new();

        for run in runs {
            let match_value = run.key.get("match").map_or(Value::Null, |p| p.to_value());
            matches.push(match_value.clone());

            let Value::Object(payload) = &run.payload else {
                continue;
            };

            if let Some(position) = payload.get("position").and_then(Value::as_str) {
                if !position.is_empty() {
                    let count = positions
                        .entry(position.to_string())
                        .or_insert_with(|| json!(0));
                    *count = json!(count.as_u64().unwrap_or_default() + 1);
                }
            }

            if let Some(items) = payload.get("journal").and_then(Value::as_array) {
                for action in items.iter().filter_map(Self::journal_action) {
                    *journal.entry(action.to_string()).or_default() += 1;
                }
            }

            if let Some(text) = payload.get("notes").and_then(Value::as_str) {
                if !text.trim().is_empty() {
                    notes.push(json!({"match": match_value, "text": text}));
                }
            }

            for (field, value) in payload {
                if KEY_FIELDS.contains(&field.as_str()) {
                    continue;
                }
                if let Some(n) = value.as_f64() {
                    stats.entry(field.clone()).or_default().add(n);
                }
            }
        }

        let run_count = runs.len();
        let journal_counts: Map<String, Value> = journal
            .iter()
            .map(|(action, count)| (action.clone(), json!(count)))
            .collect();
        let journal_means: Map<String, Value> = journal
            .iter()
            .map(|(action, count)| {
                let mean = if run_count == 0 {
                    0.0
                } else {
                    *count as f64 / run_count as f64
                };
                (action.clone(), json!(mean))
            })
            .collect();
        let stats: Map<String, Value> = stats
            .iter()
            .map(|(field, s)| (field.clone(), s.to_value()))
            .collect();

        json!({
            "runs": run_count,
            "matches": matches,
            "positions": positions,
            "journal": {
                "counts": journal_counts,
                "per_match": journal_means,
            },
            "stats": stats,
            "notes": notes,
        })
    }
}

/// Tracks and recomputes processed team aggregates.
pub struct Projections {
    fold: Arc<dyn RunFold>,
    dirty: Mutex<BTreeSet<NaturalKey>>,
}

impl std::fmt::Debug for Projections {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Projections")
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

impl Projections {
    /// Creates projections using `fold`.
    #[must_use]
    pub fn new(fold: Arc<dyn RunFold>) -> Self {
        Self {
            fold,
            dirty: Mutex::new(BTreeSet::new()),
        }
    }

    /// Marks the aggregates of the given keys stale.
    ///
    /// Keys of any table carrying `event` and `team` are accepted and mapped
    /// onto their processed team.
    ///
    /// # Errors
    ///
    /// Returns an error if the dirty set lock is poisoned.
    pub fn invalidate<'a, I>(&self, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a NaturalKey>,
    {
        let mut dirty = self.dirty.lock().map_err(|_| CoreError::lock_poisoned())?;
        for key in keys {
            dirty.insert(key.reproject(Table::ProcessedTeams)?);
        }
        Ok(())
    }

    /// Returns the keys awaiting recomputation.
    ///
    /// # Errors
    ///
    /// Returns an error if the dirty set lock is poisoned.
    pub fn dirty(&self) -> Result<Vec<NaturalKey>> {
        let dirty = self.dirty.lock().map_err(|_| CoreError::lock_poisoned())?;
        Ok(dirty.iter().cloned().collect())
    }

    /// Returns true when some aggregate is stale.
    ///
    /// # Errors
    ///
    /// Returns an error if the dirty set lock is poisoned.
    pub fn is_dirty(&self) -> Result<bool> {
        Ok(!self
            .dirty
            .lock()
            .map_err(|_| CoreError::lock_poisoned())?
            .is_empty())
    }

    /// Marks teams that have confirmed runs but no stored aggregate.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn mark_missing(&self, store: &RecordStore) -> Result<usize> {
        let missing: Vec<NaturalKey> = store
            .confirmed_run_groups(Table::ProcessedTeams)?
            .into_iter()
            .filter(|key| matches!(store.get_one(key), Ok(None)))
            .collect();
        self.invalidate(&missing)?;
        Ok(missing.len())
    }

    /// Recomputes every stale aggregate. Returns how many were recomputed.
    ///
    /// A key stays dirty if its recomputation fails.
    ///
    /// # Errors
    ///
    /// Returns the first storage error encountered.
    #[tracing::instrument(skip_all)]
    pub async fn refresh(&self, store: &RecordStore) -> Result<usize> {
        let keys = self.dirty()?;
        let mut recomputed = 0;
        for key in &keys {
            self.recompute(store, key).await?;
            self.dirty
                .lock()
                .map_err(|_| CoreError::lock_poisoned())?
                .remove(key);
            recomputed += 1;
        }
        if recomputed > 0 {
            tracing::debug!(recomputed, "processed teams refreshed");
            metrics::record_recomputed(recomputed);
        }
        Ok(recomputed)
    }

    /// Recomputes one aggregate from the current confirmed runs.
    ///
    /// Returns `None` (and stores nothing) when the team has no confirmed runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the aggregate cannot be stored.
    pub async fn recompute(&self, store: &RecordStore, key: &NaturalKey) -> Result<Option<Record>> {
        let team = key.reproject(Table::ProcessedTeams)?;
        let runs: Vec<Record> = store
            .get(Table::Runs, &Filter::from(team.to_map()))?
            .into_iter()
            .filter(Record::is_confirmed)
            .collect();
        if runs.is_empty() {
            return Ok(None);
        }

        let summary = self.fold.fold(&runs);
        let record = store.put(&team, summary, Origin::Confirmed).await?;
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use scout_core::key::KeyPart;
    use scout_core::storage::MemoryBackend;

    fn run(team: i64, matchno: i64, payload: Value) -> Record {
        Record {
            key: NaturalKey::new(
                Table::Runs,
                vec!["e1".into(), KeyPart::Int(team), KeyPart::Int(matchno)],
            )
            .unwrap(),
            version: 1,
            remote_version: Some(1),
            payload,
            origin: Origin::Confirmed,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn standard_fold_summarizes_runs() {
        let runs = vec![
            run(118, 1, json!({
                "position": "left",
                "journal": [{"action": "score_high"}, {"action": "score_high"}, "climb"],
                "auto_points": 6,
                "notes": "fast cycles",
            })),
            run(118, 2, json!({
                "position": "left",
                "journal": [{"action": "score_low"}],
                "auto_points": 2,
                "notes": "",
            })),
        ];

        let summary = StandardRunFold.fold(&runs);
        assert_eq!(summary["runs"], json!(2));
        assert_eq!(summary["matches"], json!([1, 2]));
        assert_eq!(summary["positions"], json!({"left": 2}));
        assert_eq!(summary["journal"]["counts"]["score_high"], json!(2));
        assert_eq!(summary["journal"]["per_match"]["score_high"], json!(1.0));
        assert_eq!(summary["stats"]["auto_points"]["mean"], json!(4.0));
        assert_eq!(summary["stats"]["auto_points"]["min"], json!(2.0));
        assert_eq!(summary["notes"], json!([{"match": 1, "text": "fast cycles"}]));
    }

    #[test]
    fn huge_field_sums_saturate_instead_of_overflowing() {
        let runs = vec![
            run(118, 1, json!({"cycle_time": f64::MAX})),
            run(118, 2, json!({"cycle_time": f64::MAX})),
            run(118, 3, json!({"cycle_time": -f64::MAX})),
        ];
        let summary = StandardRunFold.fold(&runs);
        let stats = &summary["stats"]["cycle_time"];

        assert_eq!(stats["count"], json!(3));
        assert_eq!(stats["sum"].as_f64(), Some(0.0));
        assert_eq!(stats["max"].as_f64(), Some(f64::MAX));
        assert!(stats["mean"].as_f64().is_some());
    }

    #[test]
    fn closures_are_folds() {
        let count = |runs: &[Record]| json!(runs.len());
        assert_eq!(count.fold(&[run(1, 1, json!({}))]), json!(1));
    }

    #[tokio::test]
    async fn recomputes_only_dirty_confirmed_runs() {
        let store = RecordStore::open(Arc::new(MemoryBackend::new())).await.unwrap();
        let projections = Projections::new(Arc::new(StandardRunFold));

        let confirmed = run(118, 1, json!({}));
        store.confirm(&confirmed.key, json!({"auto_points": 4}), 1).await.unwrap();
        let pending = run(118, 2, json!({}));
        store.put(&pending.key, json!({"auto_points": 100}), Origin::Pending).await.unwrap();
        let other = run(254, 1, json!({}));
        store.confirm(&other.key, json!({"auto_points": 1}), 1).await.unwrap();

        projections.invalidate([&confirmed.key]).unwrap();
        assert_eq!(projections.refresh(&store).await.unwrap(), 1);
        assert!(!projections.is_dirty().unwrap());

        let processed = store
            .get(Table::ProcessedTeams, &Filter::all())
            .unwrap();
        assert_eq!(processed.len(), 1);
        assert_eq!(processed[0].payload["runs"], json!(1));
        assert_eq!(processed[0].payload["stats"]["auto_points"]["sum"], json!(4.0));

        assert_eq!(projections.mark_missing(&store).unwrap(), 1);
        assert_eq!(
            projections.dirty().unwrap(),
            vec![other.key.reproject(Table::ProcessedTeams).unwrap()]
        );
    }
}
