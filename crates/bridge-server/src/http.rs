//! HTTP surface of the bridge.
//!
//! Terminals POST their position snapshots to `/` and poll
//! `/command/{id}` for work; a controller enqueues commands with
//! `POST /command/{id}` and terminals acknowledge them on
//! `POST /ack/{id}`. Read-only views are exposed under `/clients` and
//! `/accounts`. Malformed JSON bodies are rejected here by the axum
//! extractor; the core never sees them.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use bridge_common::{ActionCode, Journal, now_iso};

use crate::discovery::AccountDiscovery;
use crate::inject::InjectionPolicy;
use crate::reconciler::PositionReconciler;
use crate::state::BridgeState;

/// Everything the handlers need, shared behind one `Arc`.
pub struct AppContext {
    pub state: Arc<BridgeState>,
    pub journal: Journal,
    pub policy: Arc<dyn InjectionPolicy>,
    pub discovery: Arc<AccountDiscovery>,
    pub reconciler: Arc<PositionReconciler>,
    /// Window for the `online` flag in client summaries.
    pub online_timeout: Duration,
}

/// Build the full route table.
pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/", get(health).post(ingest))
        .route("/health", get(health))
        .route("/status", get(health))
        .route("/command/{id}", get(poll_command).post(enqueue_command))
        .route("/ack/{id}", post(acknowledge))
        .route("/clients", get(list_clients))
        .route("/clients/{id}", get(client_summary))
        .route("/clients/{id}/open", get(client_open))
        .route("/clients/{id}/closed_online", get(client_closed_online))
        .route("/clients/{id}/commands", get(client_commands))
        .route("/accounts", get(list_accounts))
        .route("/accounts/open_counts", get(account_open_counts))
        .fallback(not_found)
        .with_state(ctx)
}

/// Bind and serve until the process exits.
pub async fn run_server(ctx: Arc<AppContext>, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "bridge server listening");
    axum::serve(listener, router(ctx)).await?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok", "ts": now_iso()}))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({"status": "not_found"})))
}

/// Client ids arrive as arbitrary JSON; numbers are used verbatim in
/// their decimal form, anything else unparseable becomes "unknown".
fn identity_key(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => "unknown".to_string(),
    }
}

fn list_len(value: Option<&Value>) -> usize {
    value.and_then(Value::as_array).map_or(0, Vec::len)
}

fn take_list(value: Option<&Value>) -> Option<Vec<Value>> {
    value.and_then(Value::as_array).cloned()
}

async fn ingest(State(ctx): State<Arc<AppContext>>, Json(payload): Json<Value>) -> Json<Value> {
    let client_id = identity_key(payload.get("id"));
    let mode = payload.get("mode").cloned().unwrap_or(Value::Null);

    let open = take_list(payload.get("open"));
    let closed_online = take_list(payload.get("closed_online"));
    let summary = json!({
        "open": list_len(payload.get("open")),
        "closed_offline": list_len(payload.get("closed_offline")),
        "closed_online": list_len(payload.get("closed_online")),
    });

    // Persist first (fire-and-forget), then update the snapshot store.
    ctx.journal.spawn_append(payload.clone());
    ctx.state.record_snapshot(&client_id, open, closed_online);

    info!(
        id = %client_id,
        mode = %mode,
        open = summary["open"].as_u64().unwrap_or(0),
        "snapshot received"
    );

    Json(json!({
        "status": "ok",
        "received": summary,
        "id": client_id,
        "mode": mode,
    }))
}

async fn poll_command(
    State(ctx): State<Arc<AppContext>>,
    Path(client_id): Path<String>,
) -> Json<Value> {
    let mut msg = ctx.state.next_command(&client_id);
    let delivered_action = ActionCode::try_from(msg.state).unwrap_or_default();
    let stats = ctx.state.record_delivery(&client_id, delivered_action);

    if let Some((action, payload)) = ctx.policy.on_delivery(&client_id, &stats) {
        let cmd = ctx.state.enqueue_command(&client_id, action, payload);
        info!(
            id = %client_id,
            cmd_id = %cmd.cmd_id,
            reply = stats.replies,
            action = %action,
            "scripted command enqueued"
        );
        // A no-op about to go out can carry the injected command
        // instead of wasting a poll cycle.
        if msg.state == ActionCode::NoOp.code() {
            msg = ctx.state.next_command(&client_id);
        }
    }

    info!(
        id = %client_id,
        open = ctx.state.client_open(&client_id).len(),
        last_action = msg.state,
        replies = stats.replies,
        "command delivered"
    );

    Json(serde_json::to_value(&msg).unwrap_or_else(|_| json!({"id": client_id, "state": 0})))
}

#[derive(Debug, Deserialize)]
struct EnqueueRequest {
    #[serde(default)]
    state: u8,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

async fn enqueue_command(
    State(ctx): State<Arc<AppContext>>,
    Path(client_id): Path<String>,
    Json(req): Json<EnqueueRequest>,
) -> impl IntoResponse {
    let Ok(action) = ActionCode::try_from(req.state) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "bad_action_code", "state": req.state})),
        );
    };

    let cmd = ctx
        .state
        .enqueue_command(&client_id, action, req.payload.unwrap_or_default());
    info!(id = %client_id, cmd_id = %cmd.cmd_id, action = %action, "command enqueued");

    (
        StatusCode::OK,
        Json(json!({"status": "queued", "command": cmd})),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AckRequest {
    #[serde(default)]
    cmd_id: Option<String>,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    details: Option<Map<String, Value>>,
}

async fn acknowledge(
    State(ctx): State<Arc<AppContext>>,
    Path(client_id): Path<String>,
    Json(req): Json<AckRequest>,
) -> Json<Value> {
    let cmd_id = req.cmd_id.unwrap_or_default();
    let details = req.details.unwrap_or_default();
    let outcome = ctx
        .state
        .acknowledge(&client_id, &cmd_id, req.success, details);

    if outcome.ok {
        info!(id = %client_id, cmd_id = %cmd_id, success = req.success, "command acknowledged");
    } else {
        warn!(id = %client_id, cmd_id = %cmd_id, "acknowledge for unknown command");
    }

    Json(serde_json::to_value(&outcome).unwrap_or_else(|_| json!({"ok": false})))
}

async fn list_clients(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    Json(json!({"clients": ctx.state.list_keys()}))
}

async fn client_summary(
    State(ctx): State<Arc<AppContext>>,
    Path(client_id): Path<String>,
) -> Json<Value> {
    Json(json!({
        "id": client_id,
        "open_count": ctx.state.client_open(&client_id).len(),
        "closed_online_count": ctx.state.client_closed_online(&client_id).len(),
        "online": ctx.state.is_online(&client_id, ctx.online_timeout),
    }))
}

async fn client_open(
    State(ctx): State<Arc<AppContext>>,
    Path(client_id): Path<String>,
) -> Json<Value> {
    Json(json!({"id": client_id, "open": ctx.state.client_open(&client_id)}))
}

async fn client_closed_online(
    State(ctx): State<Arc<AppContext>>,
    Path(client_id): Path<String>,
) -> Json<Value> {
    Json(json!({
        "id": client_id,
        "closed_online": ctx.state.client_closed_online(&client_id),
    }))
}

async fn client_commands(
    State(ctx): State<Arc<AppContext>>,
    Path(client_id): Path<String>,
) -> Json<Value> {
    Json(json!({
        "id": client_id,
        "commands": ctx.state.command_history(&client_id),
    }))
}

async fn list_accounts(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    let accounts = ctx.discovery.refresh().await;
    Json(json!({"accounts": accounts, "known": ctx.discovery.known_accounts()}))
}

#[derive(Debug, Deserialize)]
struct OpenCountsQuery {
    #[serde(default)]
    refresh: bool,
}

async fn account_open_counts(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<OpenCountsQuery>,
) -> Json<Value> {
    let counts = ctx.reconciler.all_open_counts(query.refresh).await;
    Json(json!({"open": counts}))
}
