//! Pre-built test fixtures for common test scenarios.

use std::sync::Arc;

use scout_core::key::{KeyPart, NaturalKey};
use scout_core::table::Table;
use scout_sync::remote::{Credential, MemoryRemote, RemoteAuthority};
use scout_sync::{ScoutDb, SyncOutcome};
use serde_json::{Value, json};

use crate::remote::ScriptedRemote;
use crate::storage::TracingMemoryBackend;

/// Event key used by the fixtures.
pub const EVENT: &str = "2024casj";

/// Token accepted by fixture remotes.
pub const TOKEN: &str = "scout-token";

/// Key fields of a team document.
pub fn team_fields(team: i64) -> Value {
    json!({"event": EVENT, "team": team})
}

/// Key fields of a match run.
pub fn run_fields(team: i64, match_number: i64) -> Value {
    json!({"event": EVENT, "team": team, "match": match_number})
}

/// Natural key of a team document.
pub fn team_key(team: i64) -> NaturalKey {
    NaturalKey::new(Table::Teams, vec![EVENT.into(), KeyPart::Int(team)]).unwrap()
}

/// Natural key of a match run.
pub fn run_key(team: i64, match_number: i64) -> NaturalKey {
    NaturalKey::new(
        Table::Runs,
        vec![EVENT.into(), KeyPart::Int(team), KeyPart::Int(match_number)],
    )
    .unwrap()
}

/// Natural key of a processed team.
pub fn processed_key(team: i64) -> NaturalKey {
    NaturalKey::new(Table::ProcessedTeams, vec![EVENT.into(), KeyPart::Int(team)]).unwrap()
}

/// A pit scouting document.
pub fn pit_payload(drive: &str, weight_lbs: i64) -> Value {
    json!({
        "drive": drive,
        "weight_lbs": weight_lbs,
        "notes": format!("{drive} drivetrain"),
    })
}

/// A match observation.
pub fn run_payload(position: &str, auto_points: i64, teleop_points: i64) -> Value {
    json!({
        "position": position,
        "auto_points": auto_points,
        "teleop_points": teleop_points,
        "journal": [
            {"action": "intake", "t": 3},
            {"action": "score_high", "t": 9},
        ],
    })
}

/// Test context: a database over tracing storage, talking to a scripted
/// remote in front of an in-memory authority.
pub struct TestContext {
    /// Persisted local state. Re-open a database on a clone to simulate a
    /// restart.
    pub storage: TracingMemoryBackend,
    /// Authoritative store.
    pub authority: Arc<MemoryRemote>,
    /// Failure-injecting wrapper the database talks to.
    pub remote: Arc<ScriptedRemote>,
    /// The database under test.
    pub db: ScoutDb,
}

impl TestContext {
    /// Opens a fresh database.
    pub async fn new() -> Self {
        let storage = TracingMemoryBackend::new();
        let authority = Arc::new(MemoryRemote::with_tokens([TOKEN]));
        let remote = Arc::new(ScriptedRemote::new(Arc::clone(&authority)));
        let db = open_db(&storage, &remote).await;
        Self {
            storage,
            authority,
            remote,
            db,
        }
    }

    /// Opens a second device sharing the same authority but with its own
    /// storage.
    pub async fn second_device(&self) -> Self {
        let storage = TracingMemoryBackend::new();
        let remote = Arc::new(ScriptedRemote::new(Arc::clone(&self.authority)));
        let db = open_db(&storage, &remote).await;
        Self {
            storage,
            authority: Arc::clone(&self.authority),
            remote,
            db,
        }
    }

    /// Drops the database and re-opens it over the same storage and remote.
    pub async fn restart(self) -> Self {
        self.db.shutdown().await.unwrap();
        let db = open_db(&self.storage, &self.remote).await;
        Self { db, ..self }
    }

    /// The accepted credential.
    pub fn credential(&self) -> Credential {
        Credential::new(TOKEN)
    }

    /// Syncs with the accepted credential.
    pub async fn sync(&self) -> SyncOutcome {
        self.db.sync(&self.credential()).await.unwrap()
    }
}

async fn open_db(storage: &TracingMemoryBackend, remote: &Arc<ScriptedRemote>) -> ScoutDb {
    let remote: Arc<dyn RemoteAuthority> = remote.clone();
    ScoutDb::builder(Arc::new(storage.clone()))
        .remote(remote)
        .open()
        .await
        .unwrap()
}
