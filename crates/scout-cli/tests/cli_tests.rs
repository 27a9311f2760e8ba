//! Command execution against an offline data directory.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use clap::Parser;
use serde_json::json;

use scout_cli::commands::{enqueue, pending, query, sync};
use scout_cli::{Cli, Commands, Config};
use scout_core::config::ScoutConfig;
use scout_core::record::{Filter, Origin};
use scout_core::table::Table;
use scout_sync::ScoutDb;
use scout_sync::remote::OfflineRemote;

fn config(dir: &tempfile::TempDir) -> Config {
    Config {
        scout: ScoutConfig {
            data_dir: dir.path().to_path_buf(),
            ..ScoutConfig::default()
        },
        format: scout_cli::OutputFormat::Json,
    }
}

fn parse(args: &[&str]) -> Commands {
    let mut argv = vec!["scout", "--offline"];
    argv.extend_from_slice(args);
    Cli::parse_from(argv).command
}

#[tokio::test]
async fn enqueued_edits_persist_across_invocations() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);

    let Commands::Enqueue(args) = parse(&[
        "enqueue",
        "runs",
        "-k",
        "event=2024casj",
        "-k",
        "team=118",
        "-k",
        "match=3",
        "--payload",
        r#"{"auto_points": 4}"#,
    ]) else {
        panic!("expected enqueue");
    };
    enqueue::execute(args, &config).await.unwrap();

    let Commands::Pending(args) = parse(&["pending"]) else {
        panic!("expected pending");
    };
    pending::execute(args, &config).await.unwrap();

    let Commands::Query(args) = parse(&["query", "runs", "-f", "team=118"]) else {
        panic!("expected query");
    };
    query::execute(args, &config).await.unwrap();

    let db = ScoutDb::open_local(&config.scout, std::sync::Arc::new(OfflineRemote))
        .await
        .unwrap();
    let runs = db
        .query_db(Table::Runs, &Filter::all().eq("match", 3))
        .await
        .unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].origin, Origin::Pending);
    assert_eq!(runs[0].payload, json!({"auto_points": 4}));
    assert_eq!(db.pending().await.len(), 1);
}

#[tokio::test]
async fn unknown_table_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let Commands::Query(args) = parse(&["query", "robots"]) else {
        panic!("expected query");
    };
    assert!(query::execute(args, &config(&dir)).await.is_err());
}

#[tokio::test]
async fn offline_sync_fails_and_keeps_edits_queued() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);

    let Commands::Enqueue(args) = parse(&[
        "enqueue",
        "teams",
        "-k",
        "event=2024casj",
        "-k",
        "team=254",
        "--payload",
        r#"{"drive": "swerve"}"#,
    ]) else {
        panic!("expected enqueue");
    };
    enqueue::execute(args, &config).await.unwrap();

    let Commands::Sync(args) = parse(&["sync", "--token", "t"]) else {
        panic!("expected sync");
    };
    let err = sync::execute(args, &config).await.unwrap_err();
    assert!(err.to_string().contains("Sync failed"), "got {err}");

    let db = ScoutDb::open_local(&config.scout, std::sync::Arc::new(OfflineRemote))
        .await
        .unwrap();
    let pending = db.pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempts, 1);
}
