// Authentication: API-key hashing, axum extractors, and the register /
// verify / me / rotate-key handlers.

use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    Json,
};
use rand::RngCore;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::api::{internal_error, json_error, AppState};
use crate::db::Agent;

pub const API_KEY_PREFIX: &str = "fc_sk_";
pub const CLAIM_CODE_PREFIX: &str = "fc_claim_";

// ── Key material ─────────────────────────────────────────────────────

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Generate a fresh raw API key (`fc_sk_` + 48 hex chars).
pub fn generate_api_key() -> String {
    format!("{API_KEY_PREFIX}{}", random_hex(24))
}

/// Generate a fresh claim code (`fc_claim_` + 32 hex chars).
pub fn generate_claim_code() -> String {
    format!("{CLAIM_CODE_PREFIX}{}", random_hex(16))
}

pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}{}", random_hex(8))
}

/// Display prefix stored alongside the key hash so agents can identify
/// their keys without the server ever keeping the raw value.
pub fn key_display_prefix(raw_key: &str) -> String {
    raw_key.chars().take(12).collect()
}

/// Hash a raw secret (API key or claim code) with SHA-256 under the
/// process-wide pepper.
pub fn hash_secret(pepper: &str, raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pepper.as_bytes());
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Agent names: 1-64 chars of `[A-Za-z0-9_-]`.
pub fn valid_agent_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// ── Extractors ───────────────────────────────────────────────────────

/// Authenticated agent extracted from the bearer API key. Rejects 401.
#[derive(Debug, Clone)]
pub struct AuthAgent {
    pub agent: Agent,
    pub api_key_id: String,
}

async fn bearer_agent(parts: &Parts, state: &AppState) -> Result<AuthAgent, &'static str> {
    let header = parts
        .headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or("missing Authorization header")?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or("invalid Authorization header format")?;
    if !token.starts_with(API_KEY_PREFIX) {
        return Err("invalid API key");
    }
    let key_hash = hash_secret(&state.config.api_key_pepper, token);
    let key = state
        .db
        .get_api_key_by_hash(&key_hash)
        .await
        .map_err(|_| "invalid API key")?
        .ok_or("invalid API key")?;
    let agent = state
        .db
        .get_agent(&key.agent_id)
        .await
        .map_err(|_| "invalid API key")?
        .ok_or("invalid API key")?;
    Ok(AuthAgent {
        agent,
        api_key_id: key.id,
    })
}

impl FromRequestParts<AppState> for AuthAgent {
    type Rejection = axum::response::Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        bearer_agent(parts, state)
            .await
            .map_err(|msg| json_error(StatusCode::UNAUTHORIZED, "unauthorized", msg).into_response())
    }
}

/// Authenticated *and verified* agent. Rejects 401 / 403.
#[derive(Debug, Clone)]
pub struct VerifiedAgent(pub AuthAgent);

impl FromRequestParts<AppState> for VerifiedAgent {
    type Rejection = axum::response::Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = AuthAgent::from_request_parts(parts, state).await?;
        if auth.agent.verified_at.is_none() {
            return Err(json_error(
                StatusCode::FORBIDDEN,
                "forbidden",
                "agent is not verified",
            )
            .into_response());
        }
        Ok(VerifiedAgent(auth))
    }
}

/// Optional auth, used by the streaming endpoints for per-agent filtering.
/// Never rejects; an unusable key degrades to a spectator.
#[derive(Debug, Clone)]
pub struct OptionalAuthAgent(pub Option<AuthAgent>);

impl FromRequestParts<AppState> for OptionalAuthAgent {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(OptionalAuthAgent(bearer_agent(parts, state).await.ok()))
    }
}

/// Admin gate: the `x-admin-key` header must match `ADMIN_KEY`. Rejects 403.
#[derive(Debug, Clone)]
pub struct AdminAuth;

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = axum::response::Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let presented = parts
            .headers
            .get("x-admin-key")
            .and_then(|v| v.to_str().ok());
        if presented == Some(state.config.admin_key.as_str()) {
            Ok(AdminAuth)
        } else {
            Err(
                json_error(StatusCode::FORBIDDEN, "forbidden", "admin key required")
                    .into_response(),
            )
        }
    }
}

// ── Handlers ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    if !valid_agent_name(&req.name) {
        return json_error(
            StatusCode::BAD_REQUEST,
            "invalid_name",
            "name must be 1-64 characters of [A-Za-z0-9_-]",
        )
        .into_response();
    }

    let agent_id = generate_id("ag_");
    let api_key = generate_api_key();
    let claim_code = generate_claim_code();
    let key_hash = hash_secret(&state.config.api_key_pepper, &api_key);
    let claim_hash = hash_secret(&state.config.api_key_pepper, &claim_code);

    let agent = match state
        .db
        .create_agent(&agent_id, &req.name, &key_hash, &claim_hash)
        .await
    {
        Ok(a) => a,
        Err(e) => {
            let msg = e.to_string();
            if msg.contains("UNIQUE") || msg.contains("unique") {
                return json_error(StatusCode::CONFLICT, "name_in_use", "name already taken")
                    .into_response();
            }
            tracing::error!("DB error in register: {e}");
            return json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
                "registration is temporarily unavailable",
            )
            .into_response();
        }
    };

    let key_id = generate_id("key_");
    let key_prefix = key_display_prefix(&api_key);
    if let Err(e) = state
        .db
        .insert_api_key(&key_id, &agent.id, &key_hash, &key_prefix)
        .await
    {
        tracing::error!("DB error storing api key for {}: {e}", agent.id);
        return json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "unavailable",
            "registration is temporarily unavailable",
        )
        .into_response();
    }

    (
        StatusCode::CREATED,
        Json(json!({
            "ok": true,
            "agent": { "id": agent.id, "name": agent.name, "verified": false },
            "apiKey": api_key,
            "apiKeyPrefix": key_prefix,
            "claimCode": claim_code,
        })),
    )
        .into_response()
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    #[serde(rename = "claimCode")]
    pub claim_code: String,
}

pub async fn verify(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> impl IntoResponse {
    let claim_hash = hash_secret(&state.config.api_key_pepper, &req.claim_code);

    let agent = match state.db.find_agent_by_claim_hash(&claim_hash).await {
        Ok(Some(a)) => a,
        Ok(None) => {
            return json_error(StatusCode::NOT_FOUND, "not_found", "unknown claim code")
                .into_response();
        }
        Err(e) => return internal_error(e).into_response(),
    };

    if agent.verified_at.is_some() {
        return json_error(
            StatusCode::CONFLICT,
            "already_verified",
            "agent is already verified",
        )
        .into_response();
    }

    match state.db.verify_agent(&agent.id).await {
        Ok(Some(updated)) => (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "agentId": updated.id,
                "verifiedAt": updated.verified_at,
            })),
        )
            .into_response(),
        Ok(None) => {
            json_error(StatusCode::NOT_FOUND, "not_found", "agent not found").into_response()
        }
        Err(e) => internal_error(e).into_response(),
    }
}

pub async fn me(auth: AuthAgent) -> impl IntoResponse {
    let agent = auth.agent;
    Json(json!({
        "ok": true,
        "agent": {
            "id": agent.id,
            "name": agent.name,
            "verified": agent.verified_at.is_some(),
            "verifiedAt": agent.verified_at,
            "createdAt": agent.created_at,
            "apiKeyId": auth.api_key_id,
        },
    }))
}

/// Revoke the presented key and issue a fresh one.
pub async fn rotate_key(auth: AuthAgent, State(state): State<AppState>) -> impl IntoResponse {
    let api_key = generate_api_key();
    let key_hash = hash_secret(&state.config.api_key_pepper, &api_key);
    let key_id = generate_id("key_");
    let key_prefix = key_display_prefix(&api_key);

    if let Err(e) = state
        .db
        .insert_api_key(&key_id, &auth.agent.id, &key_hash, &key_prefix)
        .await
    {
        return internal_error(e).into_response();
    }
    if let Err(e) = state.db.revoke_api_key(&auth.api_key_id).await {
        // The new key is already live; losing the revocation would leave
        // two usable keys, so surface the failure.
        return internal_error(e).into_response();
    }

    Json(json!({
        "ok": true,
        "apiKeyId": key_id,
        "apiKey": api_key,
        "apiKeyPrefix": key_prefix,
    }))
    .into_response()
}
