use axum::http::HeaderValue;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use fightclaw_backend::config::Config;
use fightclaw_backend::db::Database;
use fightclaw_backend::engine::skirmish::SkirmishEngine;
use fightclaw_backend::match_actor::MatchActorConfig;
use fightclaw_backend::rate_limit::RateLimiter;
use fightclaw_backend::registry::{self, MatchRegistry};
use fightclaw_backend::{api, matchmaker, metrics};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    metrics::register_metrics();
    sqlx::any::install_default_drivers();

    let db = Arc::new(
        Database::new(&config.database_url)
            .await
            .expect("Failed to initialize database"),
    );

    let config = Arc::new(config);
    let actor_cfg = MatchActorConfig {
        turn_timeout_ms: config.turn_timeout_ms,
        disconnect_grace_ms: config.disconnect_grace_ms,
        subscriber_backlog_max: config.subscriber_backlog_max,
        elo_k_factor: config.elo_k_factor,
    };
    let match_registry = MatchRegistry::new(
        Arc::new(SkirmishEngine::new()),
        db.clone(),
        actor_cfg,
        config.match_idle_grace_ms,
    );
    registry::spawn_sweeper(match_registry.clone());
    let mm = matchmaker::spawn(
        db.clone(),
        match_registry.clone(),
        config.per_agent_event_buffer_max,
    );

    let cors = match &config.cors_origin {
        Some(origin) => {
            let origin = origin
                .parse::<HeaderValue>()
                .expect("CORS_ORIGIN is not a valid header value");
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::permissive(),
    };

    let state = api::AppState {
        db,
        config: config.clone(),
        matchmaker: mm,
        registry: match_registry,
        rate_limiter: RateLimiter::new(),
    };
    let app = api::router(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .expect("Failed to bind");
    tracing::info!("Fightclaw backend listening on port {}", config.port);
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
