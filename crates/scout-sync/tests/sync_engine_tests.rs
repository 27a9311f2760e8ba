//! End-to-end sync behavior against a scripted remote authority.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use futures::poll;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use scout_core::config::ScoutConfig;
use scout_core::record::{Filter, Origin};
use scout_core::table::{QueueTable, Table};
use scout_sync::remote::{Credential, MemoryRemote, RemoteError};
use scout_sync::{Error, ScoutDb, SyncFailure, SyncStatus};
use scout_test_utils::{
    TestContext, assert_auth_failure, assert_clean_sync, assert_pending_keys,
    assert_single_confirmed, init_test_logging, pit_payload, run_fields, run_key, run_payload,
    team_fields, team_key,
};

async fn queue_team(ctx: &TestContext, team: i64, drive: &str) {
    ctx.db
        .add_to_queue(QueueTable::Teams, &team_fields(team), pit_payload(drive, 115))
        .await
        .unwrap();
}

#[tokio::test]
async fn second_sync_leaves_state_byte_identical() {
    init_test_logging();
    let ctx = TestContext::new().await;
    queue_team(&ctx, 118, "swerve").await;
    ctx.db
        .add_to_queue(QueueTable::Runs, &run_fields(118, 1), run_payload("left", 4, 20))
        .await
        .unwrap();

    let first = ctx.sync().await;
    assert_clean_sync(&first);
    assert_eq!(first.succeeded, vec![team_key(118), run_key(118, 1)]);

    let before = ctx.storage.dump();
    ctx.storage.clear_operations();

    let second = ctx.sync().await;
    assert_clean_sync(&second);
    assert!(second.succeeded.is_empty());
    assert_eq!(second.pulled, 0);
    assert_eq!(before, ctx.storage.dump());
    assert!(ctx.storage.writes().is_empty());
}

#[tokio::test]
async fn overwrite_enqueues_coalesce_in_place() {
    let ctx = TestContext::new().await;
    let first = ctx
        .db
        .add_to_queue(QueueTable::Teams, &team_fields(118), json!({"drive": "A"}))
        .await
        .unwrap();
    queue_team(&ctx, 254, "tank").await;
    let second = ctx
        .db
        .add_to_queue(QueueTable::Teams, &team_fields(118), json!({"drive": "B"}))
        .await
        .unwrap();

    assert!(!first.coalesced);
    assert!(second.coalesced);

    let pending = ctx.db.pending().await;
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].key, team_key(118));
    assert_eq!(pending[0].seq, first.entry.seq);
    assert_eq!(pending[0].payload, json!({"drive": "B"}));
    assert_eq!(pending[1].key, team_key(254));

    let outcome = ctx.sync().await;
    assert_clean_sync(&outcome);
    assert_eq!(ctx.remote.attempted_keys(), vec![team_key(118), team_key(254)]);
    assert_eq!(
        ctx.authority.get(&team_key(118)).unwrap().payload,
        json!({"drive": "B"})
    );
}

#[tokio::test]
async fn runs_are_append_only() {
    let ctx = TestContext::new().await;
    for points in [3, 5] {
        ctx.db
            .add_to_queue(QueueTable::Runs, &run_fields(118, 1), run_payload("left", points, 0))
            .await
            .unwrap();
    }
    assert_eq!(ctx.db.pending().await.len(), 2);

    let outcome = ctx.sync().await;
    assert_clean_sync(&outcome);
    assert_eq!(outcome.succeeded, vec![run_key(118, 1)]);
    assert_eq!(
        ctx.authority.get(&run_key(118, 1)).unwrap().payload["auto_points"],
        json!(5)
    );

    let rows = ctx
        .db
        .query_db(Table::Runs, &Filter::all().eq("match", 1))
        .await
        .unwrap();
    assert_eq!(assert_single_confirmed(&rows).payload["auto_points"], json!(5));
}

async fn queue_rescouted_run(ctx: &TestContext) {
    for points in [1, 2] {
        ctx.db
            .add_to_queue(QueueTable::Runs, &run_fields(118, 1), run_payload("left", points, 0))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn failed_run_push_holds_back_later_edits_of_the_same_run() {
    let ctx = TestContext::new().await;
    queue_rescouted_run(&ctx).await;
    queue_team(&ctx, 254, "tank").await;
    ctx.remote.fail_key_once(&run_key(118, 1));

    let first = ctx.sync().await;
    assert_eq!(first.succeeded, vec![team_key(254)]);
    assert_pending_keys(&first, &[run_key(118, 1)]);
    assert_eq!(ctx.remote.attempted_keys(), vec![run_key(118, 1), team_key(254)]);

    let pending = ctx.db.pending().await;
    let attempts: Vec<_> = pending.iter().map(|e| e.attempts).collect();
    assert_eq!(attempts, vec![1, 0]);

    let second = ctx.sync().await;
    assert_clean_sync(&second);
    assert_eq!(second.succeeded, vec![run_key(118, 1)]);
    assert!(ctx.db.pending().await.is_empty());

    assert_eq!(
        ctx.authority.get(&run_key(118, 1)).unwrap().payload["auto_points"],
        json!(2)
    );
    let rows = ctx
        .db
        .query_db(Table::Runs, &Filter::all().eq("match", 1))
        .await
        .unwrap();
    assert_eq!(assert_single_confirmed(&rows).payload["auto_points"], json!(2));
}

#[tokio::test]
async fn rescouted_run_keeps_latest_edit_across_failing_passes() {
    let ctx = TestContext::new().await;
    queue_rescouted_run(&ctx).await;
    ctx.remote.fail_key(&run_key(118, 1));

    for _ in 0..2 {
        let outcome = ctx.sync().await;
        assert!(outcome.succeeded.is_empty());
        assert_eq!(outcome.pending, vec![run_key(118, 1)]);
    }
    assert_eq!(ctx.remote.attempts().len(), 2);

    let rows = ctx
        .db
        .query_db(Table::Runs, &Filter::all().eq("match", 1))
        .await
        .unwrap();
    assert_eq!(rows[0].origin, Origin::Pending);
    assert_eq!(rows[0].payload["auto_points"], json!(2));

    ctx.remote.heal();
    let outcome = ctx.sync().await;
    assert_clean_sync(&outcome);
    assert_eq!(outcome.succeeded, vec![run_key(118, 1)]);
    assert_eq!(
        ctx.authority.get(&run_key(118, 1)).unwrap().payload["auto_points"],
        json!(2)
    );
    let rows = ctx
        .db
        .query_db(Table::Runs, &Filter::all().eq("match", 1))
        .await
        .unwrap();
    assert_eq!(assert_single_confirmed(&rows).payload["auto_points"], json!(2));
}

#[tokio::test]
async fn queued_work_survives_restart() {
    let ctx = TestContext::new().await;
    queue_team(&ctx, 118, "swerve").await;

    let ctx = ctx.restart().await;
    assert_eq!(ctx.db.pending().await.len(), 1);
    let rows = ctx
        .db
        .query_db(Table::Teams, &Filter::all().eq("team", 118))
        .await
        .unwrap();
    assert_eq!(rows[0].origin, Origin::Pending);

    let outcome = ctx.sync().await;
    assert_clean_sync(&outcome);
    assert_eq!(outcome.succeeded, vec![team_key(118)]);

    let rows = ctx
        .db
        .query_db(Table::Teams, &Filter::all().eq("team", 118))
        .await
        .unwrap();
    assert_single_confirmed(&rows);
}

#[tokio::test]
async fn queued_work_survives_restart_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config = ScoutConfig {
        data_dir: dir.path().to_path_buf(),
        ..ScoutConfig::default()
    };
    let remote = Arc::new(MemoryRemote::new());
    let credential = Credential::new("field-tablet");

    {
        let db = ScoutDb::open_local(&config, remote.clone()).await.unwrap();
        db.add_to_queue(QueueTable::Runs, &run_fields(254, 7), run_payload("center", 6, 12))
            .await
            .unwrap();
        db.shutdown().await.unwrap();
    }

    let db = ScoutDb::open_local(&config, remote.clone()).await.unwrap();
    assert_eq!(db.pending().await.len(), 1);
    let outcome = db.sync(&credential).await.unwrap();
    assert!(outcome.is_success());
    assert!(remote.get(&run_key(254, 7)).is_some());

    let processed = db
        .query_db(Table::ProcessedTeams, &Filter::all().eq("team", 254))
        .await
        .unwrap();
    assert_eq!(processed[0].payload["runs"], json!(1));
}

#[tokio::test]
async fn key_values_resembling_temp_files_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = ScoutConfig {
        data_dir: dir.path().to_path_buf(),
        ..ScoutConfig::default()
    };
    let remote = Arc::new(MemoryRemote::new());
    let fields = json!({"event": "qual.tmp-2", "team": 118});

    {
        let db = ScoutDb::open_local(&config, remote.clone()).await.unwrap();
        db.add_to_queue(QueueTable::Teams, &fields, pit_payload("swerve", 115))
            .await
            .unwrap();
        let outcome = db.sync(&Credential::new("field-tablet")).await.unwrap();
        assert!(outcome.is_success());
        db.shutdown().await.unwrap();
    }

    let db = ScoutDb::open_local(&config, remote.clone()).await.unwrap();
    let rows = db
        .query_db(Table::Teams, &Filter::all().eq("event", "qual.tmp-2"))
        .await
        .unwrap();
    assert_eq!(assert_single_confirmed(&rows).payload, pit_payload("swerve", 115));
}

#[tokio::test]
async fn stale_edit_is_overridden_by_remote() {
    let ctx = TestContext::new().await;
    let other = ctx.second_device().await;

    queue_team(&other, 118, "tank").await;
    assert_clean_sync(&other.sync().await);

    queue_team(&ctx, 118, "swerve").await;
    let outcome = ctx.sync().await;

    assert_eq!(outcome.conflicted, vec![team_key(118)]);
    assert!(outcome.succeeded.is_empty());
    assert!(outcome.pending.is_empty());
    assert_eq!(outcome.status(), SyncStatus::Overridden);

    let rows = ctx
        .db
        .query_db(Table::Teams, &Filter::all().eq("team", 118))
        .await
        .unwrap();
    let row = assert_single_confirmed(&rows);
    assert_eq!(row.payload["drive"], json!("tank"));
    assert!(ctx.db.pending().await.is_empty());
}

#[tokio::test]
async fn edits_after_a_pull_are_accepted() {
    let ctx = TestContext::new().await;
    let other = ctx.second_device().await;

    queue_team(&other, 118, "tank").await;
    assert_clean_sync(&other.sync().await);
    let pulled = ctx.sync().await;
    assert_eq!(pulled.pulled, 1);

    queue_team(&ctx, 118, "swerve").await;
    let outcome = ctx.sync().await;
    assert_eq!(outcome.succeeded, vec![team_key(118)]);
    assert_eq!(
        ctx.authority.get(&team_key(118)).unwrap().payload["drive"],
        json!("swerve")
    );
}

#[tokio::test]
async fn pull_does_not_clobber_queued_edits() {
    let ctx = TestContext::new().await;
    let other = ctx.second_device().await;

    queue_team(&other, 118, "tank").await;
    assert_clean_sync(&other.sync().await);

    ctx.remote.fail_key(&team_key(118));
    queue_team(&ctx, 118, "swerve").await;
    let outcome = ctx.sync().await;
    assert_pending_keys(&outcome, &[team_key(118)]);
    assert_eq!(outcome.pulled, 0);

    let rows = ctx
        .db
        .query_db(Table::Teams, &Filter::all().eq("team", 118))
        .await
        .unwrap();
    assert_eq!(rows[0].origin, Origin::Pending);
    assert_eq!(rows[0].payload["drive"], json!("swerve"));

    ctx.remote.heal();
    let outcome = ctx.sync().await;
    assert_eq!(outcome.conflicted, vec![team_key(118)]);
    let rows = ctx
        .db
        .query_db(Table::Teams, &Filter::all().eq("team", 118))
        .await
        .unwrap();
    assert_eq!(rows[0].payload["drive"], json!("tank"));
}

#[tokio::test]
async fn transport_failures_are_isolated_per_entry() {
    let ctx = TestContext::new().await;
    for team in 1..=5 {
        queue_team(&ctx, team, "swerve").await;
    }
    for team in [1, 3, 5] {
        ctx.remote.fail_key(&team_key(team));
    }

    let outcome = ctx.sync().await;
    assert_eq!(outcome.succeeded, vec![team_key(2), team_key(4)]);
    assert_pending_keys(&outcome, &[team_key(1), team_key(3), team_key(5)]);
    assert!(outcome.fatal.is_none());
    assert_eq!(outcome.status(), SyncStatus::Pending);

    let pending = ctx.db.pending().await;
    assert_eq!(pending.len(), 3);
    assert!(pending.iter().all(|e| e.attempts == 1 && e.last_error.is_some()));

    let confirmed = ctx
        .db
        .query_db(Table::Teams, &Filter::all().eq("team", 2))
        .await
        .unwrap();
    assert_single_confirmed(&confirmed);

    ctx.remote.heal();
    let retry = ctx.sync().await;
    assert_clean_sync(&retry);
    assert_eq!(retry.succeeded, vec![team_key(1), team_key(3), team_key(5)]);
    assert!(ctx.db.pending().await.is_empty());
}

#[tokio::test]
async fn timeouts_leave_entries_queued() {
    let ctx = TestContext::new().await;
    queue_team(&ctx, 118, "swerve").await;
    ctx.remote.fail_key_with(
        &team_key(118),
        RemoteError::Timeout {
            message: "deadline exceeded".into(),
        },
    );

    let outcome = ctx.sync().await;
    assert_pending_keys(&outcome, &[team_key(118)]);
    let pending = ctx.db.pending().await;
    assert!(pending[0].last_error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn rejected_credential_aborts_the_pass() {
    let ctx = TestContext::new().await;
    for team in [118, 254, 1678] {
        queue_team(&ctx, team, "swerve").await;
    }

    let outcome = ctx.db.sync(&Credential::new("expired")).await.unwrap();
    assert_auth_failure(&outcome);
    assert_pending_keys(&outcome, &[team_key(118), team_key(254), team_key(1678)]);
    assert_eq!(ctx.remote.attempts().len(), 1);
    assert!(ctx.authority.is_empty());

    let pending = ctx.db.pending().await;
    assert_eq!(pending.len(), 3);
    assert!(pending.iter().all(|e| e.attempts == 0));

    assert_clean_sync(&ctx.sync().await);
    assert_eq!(ctx.authority.len(), 3);
}

#[tokio::test]
async fn pull_failure_is_reported_without_undoing_pushes() {
    let ctx = TestContext::new().await;
    queue_team(&ctx, 118, "swerve").await;
    ctx.remote
        .fail_pulls(RemoteError::transport("connection refused"));

    let outcome = ctx.sync().await;
    assert_eq!(outcome.succeeded, vec![team_key(118)]);
    assert!(matches!(outcome.fatal, Some(SyncFailure::Transport { .. })));
    assert!(ctx.db.pending().await.is_empty());
}

#[tokio::test]
async fn concurrent_syncs_share_one_pass() {
    let ctx = TestContext::new().await;
    for team in [118, 254, 1678] {
        queue_team(&ctx, team, "swerve").await;
    }
    ctx.remote.pause();

    let credential = ctx.credential();
    let first = ctx.db.sync(&credential);
    tokio::pin!(first);
    assert!(poll!(&mut first).is_pending());
    ctx.remote.wait_for_attempts(1).await;
    assert!(ctx.db.is_syncing());

    let busy = ctx.db.try_sync(&credential).await;
    assert!(matches!(busy, Err(Error::SyncBusy)));

    let second = ctx.db.sync(&credential);
    tokio::pin!(second);
    assert!(poll!(&mut second).is_pending());

    ctx.remote.resume();
    let (first, second) = tokio::join!(first, second);
    let first = first.unwrap();
    assert_eq!(first, second.unwrap());
    assert_clean_sync(&first);

    assert_eq!(ctx.remote.attempts().len(), 3);
    assert_eq!(ctx.remote.max_concurrent_pushes(), 1);
    assert!(!ctx.db.is_syncing());
}

#[tokio::test]
async fn enqueue_during_sync_waits_for_next_pass() {
    let ctx = TestContext::new().await;
    queue_team(&ctx, 118, "A").await;
    ctx.remote.pause();

    let credential = ctx.credential();
    let pass = ctx.db.sync(&credential);
    tokio::pin!(pass);
    assert!(poll!(&mut pass).is_pending());
    ctx.remote.wait_for_attempts(1).await;

    let enqueued = ctx
        .db
        .add_to_queue(QueueTable::Teams, &team_fields(118), json!({"drive": "B"}))
        .await
        .unwrap();
    assert!(!enqueued.coalesced);

    ctx.remote.resume();
    let outcome = pass.await.unwrap();
    assert_eq!(outcome.succeeded, vec![team_key(118)]);

    let rows = ctx
        .db
        .query_db(Table::Teams, &Filter::all().eq("team", 118))
        .await
        .unwrap();
    assert_eq!(rows[0].origin, Origin::Pending);
    assert_eq!(rows[0].payload, json!({"drive": "B"}));
    assert_eq!(ctx.db.pending().await.len(), 1);

    let next = ctx.sync().await;
    assert_clean_sync(&next);
    assert_eq!(
        ctx.authority.get(&team_key(118)).unwrap().payload,
        json!({"drive": "B"})
    );
}

#[tokio::test]
async fn cancellation_keeps_unprocessed_entries_queued() {
    let ctx = TestContext::new().await;
    for team in [118, 254, 1678] {
        queue_team(&ctx, team, "swerve").await;
    }
    ctx.remote.pause();

    let cancel = CancellationToken::new();
    let credential = ctx.credential();
    let pass = ctx.db.sync_with_cancel(&credential, cancel.clone());
    tokio::pin!(pass);
    assert!(poll!(&mut pass).is_pending());
    ctx.remote.wait_for_attempts(1).await;

    cancel.cancel();
    let outcome = pass.await.unwrap();
    assert_eq!(outcome.fatal, Some(SyncFailure::Cancelled));
    assert_pending_keys(&outcome, &[team_key(118), team_key(254), team_key(1678)]);
    assert_eq!(ctx.remote.attempts().len(), 1);
    assert!(ctx.authority.is_empty());

    let pending = ctx.db.pending().await;
    assert_eq!(pending.len(), 3);
    assert!(pending.iter().all(|e| e.attempts == 0));

    ctx.remote.resume();
    let retry = ctx.sync().await;
    assert_clean_sync(&retry);
    assert_eq!(retry.succeeded.len(), 3);
}

#[tokio::test]
async fn cancel_sync_stops_the_pass_in_flight() {
    let ctx = TestContext::new().await;
    queue_team(&ctx, 118, "swerve").await;
    queue_team(&ctx, 254, "tank").await;
    ctx.remote.pause();

    let credential = ctx.credential();
    let pass = ctx.db.sync(&credential);
    tokio::pin!(pass);
    assert!(poll!(&mut pass).is_pending());
    ctx.remote.wait_for_attempts(1).await;

    ctx.db.cancel_sync();
    let outcome = pass.await.unwrap();
    assert_eq!(outcome.fatal, Some(SyncFailure::Cancelled));
    assert_eq!(ctx.db.pending().await.len(), 2);
}

#[tokio::test]
async fn shutdown_rejects_new_syncs() {
    let ctx = TestContext::new().await;
    ctx.db.shutdown().await.unwrap();

    let err = ctx.db.sync(&ctx.credential()).await.unwrap_err();
    assert!(matches!(err, Error::ShutDown));

    queue_team(&ctx, 118, "swerve").await;
    assert_eq!(ctx.db.pending().await.len(), 1);
}

#[tokio::test]
async fn local_storage_failure_is_an_error_and_keeps_the_queue() {
    let ctx = TestContext::new().await;
    queue_team(&ctx, 118, "swerve").await;
    ctx.storage.fail_writes_under("records/");

    let err = ctx.db.sync(&ctx.credential()).await.unwrap_err();
    assert!(err.is_storage());
    assert!(!ctx.db.is_syncing());

    ctx.storage.clear_failures();
    assert_eq!(ctx.db.pending().await.len(), 1);
    assert_clean_sync(&ctx.sync().await);
}

#[tokio::test]
async fn enqueue_storage_failure_is_surfaced() {
    let ctx = TestContext::new().await;
    ctx.storage.fail_writes_under("queue/");

    let err = ctx
        .db
        .add_to_queue(QueueTable::Teams, &team_fields(118), pit_payload("swerve", 110))
        .await
        .unwrap_err();
    assert!(err.is_storage());
    assert!(ctx.db.pending().await.is_empty());
    assert!(
        ctx.db
            .query_db(Table::Teams, &Filter::all())
            .await
            .unwrap()
            .is_empty()
    );
}
