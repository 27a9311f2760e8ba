//! HTTP remote authority client tests against an in-process server.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use scout_core::record::Filter;
use scout_core::storage::MemoryBackend;
use scout_core::table::{QueueTable, Table};
use scout_sync::remote::http::{PullResponse, PushRequest, PushResponse, WireRecord};
use scout_sync::remote::{
    Credential, HttpRemote, MemoryRemote, PullCursor, PushAck, RemoteAuthority, RemoteError,
};
use scout_sync::{ScoutDb, SyncFailure};
use scout_test_utils::{run_fields, run_payload, team_fields, team_key};

const TOKEN: &str = "test-token";

#[derive(Clone)]
struct ServerState {
    authority: Arc<MemoryRemote>,
    delay: Option<Duration>,
}

#[derive(Debug, Deserialize)]
struct PullQuery {
    since: u64,
}

fn credential(headers: &HeaderMap) -> Credential {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .unwrap_or_default();
    Credential::new(token)
}

fn error_response(err: RemoteError) -> Response {
    match err {
        RemoteError::Unauthorized { message } => (StatusCode::UNAUTHORIZED, message).into_response(),
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()).into_response(),
    }
}

async fn push_handler(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(req): Json<PushRequest>,
) -> Response {
    if let Some(delay) = state.delay {
        tokio::time::sleep(delay).await;
    }
    let mutation = match req.into_mutation() {
        Ok(mutation) => mutation,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    match state.authority.push(&credential(&headers), &mutation).await {
        Ok(PushAck::Accepted {
            remote_version,
            payload,
        }) => Json(PushResponse {
            remote_version,
            payload,
        })
        .into_response(),
        Ok(PushAck::Stale {
            remote_version,
            payload,
        }) => (
            StatusCode::CONFLICT,
            Json(PushResponse {
                remote_version,
                payload,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn pull_handler(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Query(query): Query<PullQuery>,
) -> Response {
    match state
        .authority
        .pull(&credential(&headers), PullCursor(query.since))
        .await
    {
        Ok(delta) => Json(PullResponse {
            records: delta.records.iter().map(WireRecord::from_record).collect(),
            cursor: delta.cursor.0,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn start_test_server(
    authority: Arc<MemoryRemote>,
    delay: Option<Duration>,
) -> (String, tokio::task::JoinHandle<()>) {
    let app = Router::new()
        .route("/sync/push", post(push_handler))
        .route("/sync/pull", get(pull_handler))
        .with_state(ServerState { authority, delay });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr: SocketAddr = listener.local_addr().expect("listener addr");
    let base_url = format!("http://{addr}");

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve test server");
    });

    (base_url, handle)
}

fn client(base_url: &str, timeout: Duration) -> Arc<HttpRemote> {
    Arc::new(HttpRemote::new(base_url, timeout, Duration::from_secs(1)).unwrap())
}

async fn device(remote: Arc<HttpRemote>) -> ScoutDb {
    ScoutDb::builder(Arc::new(MemoryBackend::new()))
        .remote(remote)
        .open()
        .await
        .unwrap()
}

#[tokio::test]
async fn devices_converge_through_http() {
    let authority = Arc::new(MemoryRemote::with_tokens([TOKEN]));
    let (base_url, _handle) = start_test_server(Arc::clone(&authority), None).await;
    let credential = Credential::new(TOKEN);

    let first = device(client(&base_url, Duration::from_secs(5))).await;
    let second = device(client(&base_url, Duration::from_secs(5))).await;

    second
        .add_to_queue(QueueTable::Teams, &team_fields(118), json!({"drive": "tank"}))
        .await
        .unwrap();
    second
        .add_to_queue(QueueTable::Runs, &run_fields(118, 3), run_payload("left", 4, 12))
        .await
        .unwrap();
    let outcome = second.sync(&credential).await.unwrap();
    assert!(outcome.is_success(), "unexpected outcome: {outcome:?}");

    first
        .add_to_queue(QueueTable::Teams, &team_fields(118), json!({"drive": "swerve"}))
        .await
        .unwrap();
    let outcome = first.sync(&credential).await.unwrap();
    assert_eq!(outcome.conflicted, vec![team_key(118)]);
    assert_eq!(outcome.pulled, 1);

    let team = first
        .query_db(Table::Teams, &Filter::all().eq("team", 118))
        .await
        .unwrap();
    assert_eq!(team[0].payload, json!({"drive": "tank"}));

    let processed = first
        .query_db(Table::ProcessedTeams, &Filter::all().eq("team", 118))
        .await
        .unwrap();
    assert_eq!(processed[0].payload["runs"], json!(1));
}

#[tokio::test]
async fn rejected_token_is_an_auth_failure() {
    let authority = Arc::new(MemoryRemote::with_tokens([TOKEN]));
    let (base_url, _handle) = start_test_server(authority, None).await;
    let db = device(client(&base_url, Duration::from_secs(5))).await;

    db.add_to_queue(QueueTable::Teams, &team_fields(254), json!({"drive": "mecanum"}))
        .await
        .unwrap();
    let outcome = db.sync(&Credential::new("wrong")).await.unwrap();

    assert!(matches!(outcome.fatal, Some(SyncFailure::Auth { .. })));
    assert_eq!(outcome.pending, vec![team_key(254)]);
    assert_eq!(db.pending().await[0].attempts, 0);
}

#[tokio::test]
async fn slow_server_times_out_per_entry() {
    let authority = Arc::new(MemoryRemote::new());
    let (base_url, _handle) =
        start_test_server(authority, Some(Duration::from_secs(10))).await;
    let db = device(client(&base_url, Duration::from_millis(200))).await;

    db.add_to_queue(QueueTable::Teams, &team_fields(1678), json!({"drive": "swerve"}))
        .await
        .unwrap();

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        db.sync(&Credential::new(TOKEN)),
    )
    .await
    .expect("client should time out before the outer timeout")
    .unwrap();

    assert_eq!(outcome.pending, vec![team_key(1678)]);
    let entry = &db.pending().await[0];
    assert_eq!(entry.attempts, 1);
    assert!(entry.last_error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let remote = HttpRemote::new(
        format!("http://{addr}"),
        Duration::from_secs(2),
        Duration::from_secs(1),
    )
    .unwrap();
    let err = remote
        .pull(&Credential::new(TOKEN), PullCursor::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Transport { .. }), "got {err:?}");
}
