//! In-memory remote authority.
//!
//! Holds the authoritative copy of every record with a per-key version and a
//! global change counter for pulls. Used by tests and local demos, and as the
//! reference behavior for server implementations:
//!
//! - A push whose `base_version` is older than the stored version is stale and
//!   answered with the stored payload.
//! - Replaying a mutation id returns the original answer without re-applying.
//! - When an allow-list of tokens is configured, any other token is rejected.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use scout_core::id::MutationId;
use scout_core::key::NaturalKey;

use super::{
    Credential, Mutation, PullCursor, PushAck, RemoteAuthority, RemoteDelta, RemoteError,
    RemoteRecord,
};

#[derive(Debug, Default)]
struct StoredRecord {
    payload: Value,
    remote_version: u64,
    changed_at: u64,
}

#[derive(Debug, Default)]
struct RemoteState {
    records: BTreeMap<NaturalKey, StoredRecord>,
    applied: HashMap<MutationId, PushAck>,
    tokens: Option<BTreeSet<String>>,
    change: u64,
    pushes: u64,
}

impl RemoteState {
    fn write(&mut self, key: NaturalKey, payload: Value) -> u64 {
        self.change += 1;
        let change = self.change;
        let entry = self.records.entry(key).or_default();
        entry.payload = payload;
        entry.remote_version += 1;
        entry.changed_at = change;
        entry.remote_version
    }

    fn authorize(&self, credential: &Credential) -> Result<(), RemoteError> {
        let token = credential.expose();
        if token.is_empty() {
            return Err(RemoteError::unauthorized("missing credential"));
        }
        match &self.tokens {
            Some(tokens) if !tokens.contains(token) => {
                Err(RemoteError::unauthorized("unknown credential"))
            }
            _ => Ok(()),
        }
    }
}

/// In-memory remote authority.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
}

impl MemoryRemote {
    /// Creates a remote that accepts any non-empty credential.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a remote that only accepts the given tokens.
    #[must_use]
    pub fn with_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let remote = Self::new();
        if let Ok(mut state) = remote.state.lock() {
            state.tokens = Some(tokens.into_iter().map(Into::into).collect());
        }
        remote
    }

    /// Revokes a token. Has no effect when every token is accepted.
    pub fn revoke(&self, token: &str) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(tokens) = state.tokens.as_mut() {
                tokens.remove(token);
            }
        }
    }

    /// Writes a record on the remote side, as another device or the server
    /// itself would. Returns the new remote version.
    pub fn seed(&self, key: NaturalKey, payload: Value) -> u64 {
        self.state
            .lock()
            .map(|mut state| state.write(key, payload))
            .unwrap_or_default()
    }

    /// Returns the remote copy of a record.
    #[must_use]
    pub fn get(&self, key: &NaturalKey) -> Option<RemoteRecord> {
        let state = self.state.lock().ok()?;
        state.records.get(key).map(|r| RemoteRecord {
            key: key.clone(),
            payload: r.payload.clone(),
            remote_version: r.remote_version,
        })
    }

    /// Returns the number of records held remotely.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.records.len()).unwrap_or_default()
    }

    /// Returns true when nothing is held remotely.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of push calls received, replays included.
    #[must_use]
    pub fn push_count(&self) -> u64 {
        self.state.lock().map(|s| s.pushes).unwrap_or_default()
    }

    fn poisoned() -> RemoteError {
        RemoteError::transport("remote state lock poisoned")
    }
}

#[async_trait]
impl RemoteAuthority for MemoryRemote {
    async fn push(
        &self,
        credential: &Credential,
        mutation: &Mutation,
    ) -> Result<PushAck, RemoteError> {
        let mut state = self.state.lock().map_err(|_| Self::poisoned())?;
        state.authorize(credential)?;
        state.pushes += 1;

        if let Some(ack) = state.applied.get(&mutation.id) {
            return Ok(ack.clone());
        }

        let stale = state
            .records
            .get(&mutation.key)
            .filter(|current| mutation.base_version < Some(current.remote_version))
            .map(|current| PushAck::Stale {
                remote_version: current.remote_version,
                payload: current.payload.clone(),
            });

        let ack = match stale {
            Some(ack) => ack,
            None => {
                let remote_version = state.write(mutation.key.clone(), mutation.payload.clone());
                PushAck::Accepted {
                    remote_version,
                    payload: mutation.payload.clone(),
                }
            }
        };

        state.applied.insert(mutation.id, ack.clone());
        Ok(ack)
    }

    async fn pull(
        &self,
        credential: &Credential,
        since: PullCursor,
    ) -> Result<RemoteDelta, RemoteError> {
        let state = self.state.lock().map_err(|_| Self::poisoned())?;
        state.authorize(credential)?;

        let mut changed: Vec<(&NaturalKey, &StoredRecord)> = state
            .records
            .iter()
            .filter(|(_, r)| r.changed_at > since.0)
            .collect();
        changed.sort_by_key(|(_, r)| r.changed_at);

        Ok(RemoteDelta {
            records: changed
                .into_iter()
                .map(|(key, r)| RemoteRecord {
                    key: key.clone(),
                    payload: r.payload.clone(),
                    remote_version: r.remote_version,
                })
                .collect(),
            cursor: PullCursor(state.change.max(since.0)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_core::id::DeviceId;
    use scout_core::key::KeyPart;
    use scout_core::table::{QueueTable, Table};
    use serde_json::json;

    fn key() -> NaturalKey {
        NaturalKey::new(Table::Teams, vec!["e1".into(), KeyPart::Int(118)]).unwrap()
    }

    fn mutation(payload: Value, base_version: Option<u64>) -> Mutation {
        Mutation {
            id: MutationId::generate(),
            device: DeviceId::new("tablet-1").unwrap(),
            table: QueueTable::Teams,
            key: key(),
            payload,
            base_version,
        }
    }

    #[tokio::test]
    async fn accepts_then_detects_staleness() {
        let remote = MemoryRemote::new();
        let token = Credential::new("t");

        let first = remote.push(&token, &mutation(json!("A"), None)).await.unwrap();
        assert_eq!(
            first,
            PushAck::Accepted {
                remote_version: 1,
                payload: json!("A")
            }
        );

        let stale = remote.push(&token, &mutation(json!("B"), None)).await.unwrap();
        assert!(matches!(stale, PushAck::Stale { remote_version: 1, .. }));

        let ok = remote.push(&token, &mutation(json!("C"), Some(1))).await.unwrap();
        assert!(matches!(ok, PushAck::Accepted { remote_version: 2, .. }));
    }

    #[tokio::test]
    async fn replayed_mutation_is_applied_once() {
        let remote = MemoryRemote::new();
        let token = Credential::new("t");
        let m = mutation(json!("A"), None);

        let first = remote.push(&token, &m).await.unwrap();
        let again = remote.push(&token, &m).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(remote.get(&key()).unwrap().remote_version, 1);
        assert_eq!(remote.push_count(), 2);
    }

    #[tokio::test]
    async fn rejects_unknown_tokens() {
        let remote = MemoryRemote::with_tokens(["good"]);
        let err = remote
            .push(&Credential::new("bad"), &mutation(json!("A"), None))
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());

        remote.revoke("good");
        let err = remote
            .pull(&Credential::new("good"), PullCursor::default())
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn pull_returns_changes_since_cursor() {
        let remote = MemoryRemote::new();
        let token = Credential::new("t");
        remote.seed(key(), json!("A"));

        let delta = remote.pull(&token, PullCursor::default()).await.unwrap();
        assert_eq!(delta.records.len(), 1);
        assert_eq!(delta.cursor, PullCursor(1));

        let empty = remote.pull(&token, delta.cursor).await.unwrap();
        assert!(empty.records.is_empty());
        assert_eq!(empty.cursor, PullCursor(1));
    }
}
