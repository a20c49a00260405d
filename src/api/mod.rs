// HTTP API routes: queue protocol, match operations, streams, leaderboard.

pub mod sse;
pub mod ws;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use rand::RngCore;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{self, AuthAgent, AdminAuth, VerifiedAgent};
use crate::config::Config;
use crate::db::Database;
use crate::match_actor::{MatchHandle, MoveReply};
use crate::matchmaker::MatchmakerHandle;
use crate::metrics;
use crate::rate_limit::{RateLimitType, RateLimiter};
use crate::registry::MatchRegistry;

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub config: Arc<Config>,
    pub matchmaker: MatchmakerHandle,
    pub registry: MatchRegistry,
    pub rate_limiter: RateLimiter,
}

// ── Error envelope helpers ───────────────────────────────────────────

fn request_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Build the non-2xx envelope: `{ok:false, error, code, requestId}`.
pub fn json_error(status: StatusCode, code: &str, msg: &str) -> impl IntoResponse {
    (
        status,
        Json(json!({
            "ok": false,
            "error": msg,
            "code": code,
            "requestId": request_id(),
        })),
    )
}

pub fn internal_error(e: sqlx::Error) -> impl IntoResponse {
    tracing::error!("Database error: {e}");
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "Internal server error",
    )
}

fn actor_gone() -> axum::response::Response {
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "match actor unavailable",
    )
    .into_response()
}

fn rate_limited(err: crate::rate_limit::RateLimitError) -> axum::response::Response {
    json_error(
        StatusCode::TOO_MANY_REQUESTS,
        "rate_limited",
        &err.to_string(),
    )
    .into_response()
}

/// Merge `ok: true` into a serializable reply.
fn ok_body<T: serde::Serialize>(value: &T) -> Json<Value> {
    let mut v = serde_json::to_value(value).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut v {
        map.insert("ok".into(), Value::Bool(true));
    }
    Json(v)
}

// ── Router ───────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    Router::new()
        // Auth
        .route("/v1/auth/register", post(auth::register))
        .route("/v1/auth/verify", post(auth::verify))
        .route("/v1/auth/me", get(auth::me))
        .route("/v1/auth/rotate-key", post(auth::rotate_key))
        // Queue
        .route("/v1/queue/join", post(join_queue))
        .route("/v1/matches/queue", post(join_queue))
        .route("/v1/queue/status", get(queue_status))
        .route("/v1/queue/leave", delete(leave_queue))
        .route("/v1/events/wait", get(wait_events))
        // Matches
        .route("/v1/matches/{id}/move", post(submit_move))
        .route("/v1/matches/{id}/state", get(match_state))
        .route("/v1/matches/{id}/log", get(match_log))
        .route("/v1/matches/{id}/thought", post(publish_thought))
        .route("/v1/matches/{id}/stream", get(sse::stream_match))
        .route("/v1/matches/{id}/ws", get(ws::ws_match))
        // Admin
        .route("/v1/admin/matches/{id}/finish", post(admin_finish))
        // Spectating
        .route("/v1/featured", get(featured))
        .route("/v1/live", get(live))
        .route("/v1/leaderboard", get(leaderboard))
        // Observability
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "fightclaw-backend" }))
}

async fn metrics_endpoint() -> impl IntoResponse {
    metrics::gather_metrics()
}

// ── Queue handlers ───────────────────────────────────────────────────

async fn join_queue(
    VerifiedAgent(auth): VerifiedAgent,
    State(state): State<AppState>,
) -> impl IntoResponse {
    if let Err(e) = state
        .rate_limiter
        .check_limit(&auth.agent.id, RateLimitType::QueueJoins)
    {
        return rate_limited(e);
    }
    match state.matchmaker.join_queue(&auth.agent.id).await {
        Ok(reply) => ok_body(&reply).into_response(),
        Err(_) => actor_gone(),
    }
}

async fn queue_status(auth: AuthAgent, State(state): State<AppState>) -> impl IntoResponse {
    match state.matchmaker.queue_status(&auth.agent.id).await {
        Ok(reply) => ok_body(&reply).into_response(),
        Err(_) => actor_gone(),
    }
}

async fn leave_queue(auth: AuthAgent, State(state): State<AppState>) -> impl IntoResponse {
    match state.matchmaker.leave_queue(&auth.agent.id).await {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(_) => actor_gone(),
    }
}

#[derive(Deserialize)]
struct WaitParams {
    timeout: Option<u64>,
}

async fn wait_events(
    auth: AuthAgent,
    State(state): State<AppState>,
    Query(params): Query<WaitParams>,
) -> impl IntoResponse {
    let timeout_s = params
        .timeout
        .unwrap_or(state.config.event_wait_timeout_max_s)
        .min(state.config.event_wait_timeout_max_s);
    match state
        .matchmaker
        .wait_events(&auth.agent.id, Duration::from_secs(timeout_s))
        .await
    {
        Ok(event) => Json(json!({"ok": true, "events": [event]})).into_response(),
        Err(_) => actor_gone(),
    }
}

// ── Match handlers ───────────────────────────────────────────────────

#[derive(Deserialize)]
struct MoveRequest {
    #[serde(rename = "moveId")]
    move_id: String,
    #[serde(rename = "expectedVersion")]
    expected_version: u64,
    #[serde(rename = "move")]
    mv: Value,
}

/// Find the live actor for a match, distinguishing "ended and reaped"
/// from "never existed".
async fn lookup_match(
    state: &AppState,
    match_id: &str,
) -> Result<MatchHandle, axum::response::Response> {
    if let Some(handle) = state.registry.get(match_id) {
        return Ok(handle);
    }
    match state.db.get_match(match_id).await {
        Ok(Some(m)) if m.status == "ended" => Err(json_error(
            StatusCode::CONFLICT,
            "terminal",
            "match has ended",
        )
        .into_response()),
        Ok(Some(_)) | Ok(None) => Err(json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            "match not found",
        )
        .into_response()),
        Err(e) => Err(internal_error(e).into_response()),
    }
}

async fn submit_move(
    VerifiedAgent(auth): VerifiedAgent,
    State(state): State<AppState>,
    Path(match_id): Path<String>,
    Json(req): Json<MoveRequest>,
) -> impl IntoResponse {
    if req.move_id.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "invalid_request", "moveId is required")
            .into_response();
    }
    if let Err(e) = state
        .rate_limiter
        .check_limit(&auth.agent.id, RateLimitType::MoveSubmissions)
    {
        return rate_limited(e);
    }

    let handle = match lookup_match(&state, &match_id).await {
        Ok(h) => h,
        Err(resp) => return resp,
    };

    let started = std::time::Instant::now();
    let reply = match handle
        .submit_move(&auth.agent.id, &req.move_id, req.expected_version, req.mv)
        .await
    {
        Ok(r) => r,
        Err(_) => return actor_gone(),
    };
    let outcome = if reply.status < 300 { "accepted" } else { "rejected" };
    metrics::MOVE_HANDLE_DURATION_SECONDS
        .with_label_values(&[outcome])
        .observe(started.elapsed().as_secs_f64());

    move_reply_response(reply)
}

fn move_reply_response(reply: MoveReply) -> axum::response::Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(reply.body)).into_response()
}

async fn match_state(
    State(state): State<AppState>,
    Path(match_id): Path<String>,
) -> impl IntoResponse {
    if let Some(handle) = state.registry.get(&match_id) {
        return match handle.get_state().await {
            Ok(snap) => Json(json!({
                "ok": true,
                "matchId": snap.match_id,
                "state": snap.to_value(),
            }))
            .into_response(),
            Err(_) => actor_gone(),
        };
    }
    // The actor may already be reaped; serve what the store remembers.
    match state.db.get_match(&match_id).await {
        Ok(Some(m)) => Json(json!({
            "ok": true,
            "matchId": m.id,
            "state": {
                "state": Value::Null,
                "stateVersion": m.final_state_version,
                "activeAgentId": Value::Null,
                "terminal": {
                    "winner": m.winner_agent_id,
                    "reason": m.end_reason,
                },
            },
        }))
        .into_response(),
        Ok(None) => {
            json_error(StatusCode::NOT_FOUND, "not_found", "match not found").into_response()
        }
        Err(e) => internal_error(e).into_response(),
    }
}

#[derive(Deserialize)]
struct LogParams {
    limit: Option<i64>,
}

async fn match_log(
    State(state): State<AppState>,
    Path(match_id): Path<String>,
    Query(params): Query<LogParams>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(500).clamp(1, 1000);
    match state.db.load_event_log(&match_id, limit).await {
        Ok(rows) => {
            let events: Vec<Value> = rows
                .iter()
                .map(|row| {
                    json!({
                        "id": row.id,
                        "turn": row.turn,
                        "ts": row.ts,
                        "eventType": row.event_type,
                        "payload": serde_json::from_str::<Value>(&row.payload_json)
                            .unwrap_or(Value::Null),
                    })
                })
                .collect();
            Json(json!({"ok": true, "matchId": match_id, "events": events})).into_response()
        }
        Err(e) => internal_error(e).into_response(),
    }
}

#[derive(Deserialize)]
struct ThoughtRequest {
    thought: Value,
}

async fn publish_thought(
    VerifiedAgent(auth): VerifiedAgent,
    State(state): State<AppState>,
    Path(match_id): Path<String>,
    Json(req): Json<ThoughtRequest>,
) -> impl IntoResponse {
    let handle = match lookup_match(&state, &match_id).await {
        Ok(h) => h,
        Err(resp) => return resp,
    };
    match handle.publish_thought(&auth.agent.id, req.thought).await {
        Ok(true) => Json(json!({"ok": true})).into_response(),
        Ok(false) => json_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "agent is not a participant in this match",
        )
        .into_response(),
        Err(_) => actor_gone(),
    }
}

#[derive(Deserialize, Default)]
struct FinishRequest {
    reason: Option<String>,
}

async fn admin_finish(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Path(match_id): Path<String>,
    body: Option<Json<FinishRequest>>,
) -> impl IntoResponse {
    let reason = body
        .map(|Json(b)| b.reason.unwrap_or_default())
        .unwrap_or_default();

    if let Some(handle) = state.registry.get(&match_id) {
        return match handle.finish(&reason).await {
            Ok(ended_now) => {
                Json(json!({"ok": true, "ended": ended_now})).into_response()
            }
            Err(_) => actor_gone(),
        };
    }
    // No live actor: finishing an already-ended match stays a no-op.
    match state.db.get_match(&match_id).await {
        Ok(Some(m)) if m.status == "ended" => {
            Json(json!({"ok": true, "ended": false})).into_response()
        }
        Ok(Some(_)) | Ok(None) => {
            json_error(StatusCode::NOT_FOUND, "not_found", "match not found").into_response()
        }
        Err(e) => internal_error(e).into_response(),
    }
}

// ── Spectating handlers ──────────────────────────────────────────────

async fn featured(State(state): State<AppState>) -> impl IntoResponse {
    match state.matchmaker.featured().await {
        Ok(reply) => ok_body(&reply).into_response(),
        Err(_) => actor_gone(),
    }
}

async fn live(State(state): State<AppState>) -> impl IntoResponse {
    let latest = match state.matchmaker.latest_match_id().await {
        Ok(l) => l,
        Err(_) => return actor_gone(),
    };
    let Some(match_id) = latest else {
        return Json(json!({"ok": true})).into_response();
    };
    let Some(handle) = state.registry.get(&match_id) else {
        return Json(json!({"ok": true, "matchId": match_id})).into_response();
    };
    match handle.get_state().await {
        Ok(snap) => Json(json!({
            "ok": true,
            "matchId": match_id,
            "state": snap.to_value(),
        }))
        .into_response(),
        Err(_) => Json(json!({"ok": true, "matchId": match_id})).into_response(),
    }
}

#[derive(Deserialize)]
struct LeaderboardParams {
    limit: Option<i64>,
}

async fn leaderboard(
    State(state): State<AppState>,
    Query(params): Query<LeaderboardParams>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    match state.db.top_leaderboard(limit).await {
        Ok(rows) => {
            let entries: Vec<Value> = rows
                .iter()
                .map(|r| {
                    json!({
                        "agentId": r.agent_id,
                        "rating": r.rating,
                        "wins": r.wins,
                        "losses": r.losses,
                        "gamesPlayed": r.games_played,
                        "updatedAt": r.updated_at,
                    })
                })
                .collect();
            Json(json!({"ok": true, "leaderboard": entries})).into_response()
        }
        Err(e) => internal_error(e).into_response(),
    }
}
