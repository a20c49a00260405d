// Application configuration, loaded from environment variables.

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL (SQLite or Postgres connection string).
    pub database_url: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Pepper mixed into API-key and claim-code hashes. Required.
    pub api_key_pepper: String,
    /// Shared secret for admin routes (verify, finish). Required.
    pub admin_key: String,
    /// Allowed CORS origin. `None` means permissive.
    pub cors_origin: Option<String>,
    /// Deadline for the active agent to submit a move.
    pub turn_timeout_ms: u64,
    /// Grace before a fully-disconnected agent forfeits.
    pub disconnect_grace_ms: u64,
    /// Upper bound accepted for the `timeout` query of the event-wait endpoint.
    pub event_wait_timeout_max_s: u64,
    /// Per-agent matchmaker event buffer capacity (drop-oldest on overflow).
    pub per_agent_event_buffer_max: usize,
    /// Per-subscriber pending-event queue size before the subscriber is dropped.
    pub subscriber_backlog_max: usize,
    /// Elo K-factor applied to both players on match end.
    pub elo_k_factor: f64,
    /// How long an ended match actor keeps serving state and its
    /// idempotency table before being reaped.
    pub match_idle_grace_ms: u64,
}

/// Error produced when a required environment variable is missing or empty.
#[derive(Debug)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `API_KEY_PEPPER` - non-empty string mixed into key hashes
    /// - `ADMIN_KEY` - shared secret for verify/finish
    ///
    /// Optional:
    /// - `DATABASE_URL` (default `sqlite:fightclaw.db?mode=rwc`)
    /// - `PORT` (default 3000)
    /// - `CORS_ORIGIN`
    /// - `MATCH_TURN_TIMEOUT_MS` (default 30000)
    /// - `MATCH_DISCONNECT_GRACE_MS` (default 15000)
    /// - `EVENT_WAIT_TIMEOUT_MAX_S` (default 30)
    /// - `PER_AGENT_EVENT_BUFFER_MAX` (default 25)
    /// - `SUBSCRIBER_BACKLOG_MAX` (default 256)
    /// - `ELO_K_FACTOR` (default 32)
    /// - `MATCH_IDLE_GRACE_MS` (default 60000)
    pub fn load() -> Result<Self, ConfigError> {
        let api_key_pepper = std::env::var("API_KEY_PEPPER")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError("API_KEY_PEPPER must be set and non-empty".into()))?;

        let admin_key = std::env::var("ADMIN_KEY")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError("ADMIN_KEY must be set and non-empty".into()))?;

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:fightclaw.db?mode=rwc".to_string());

        Ok(Config {
            database_url,
            port: env_parsed("PORT", 3000),
            api_key_pepper,
            admin_key,
            cors_origin: std::env::var("CORS_ORIGIN").ok().filter(|v| !v.is_empty()),
            turn_timeout_ms: env_parsed("MATCH_TURN_TIMEOUT_MS", 30_000),
            disconnect_grace_ms: env_parsed("MATCH_DISCONNECT_GRACE_MS", 15_000),
            event_wait_timeout_max_s: env_parsed("EVENT_WAIT_TIMEOUT_MAX_S", 30),
            per_agent_event_buffer_max: env_parsed("PER_AGENT_EVENT_BUFFER_MAX", 25),
            subscriber_backlog_max: env_parsed("SUBSCRIBER_BACKLOG_MAX", 256),
            elo_k_factor: env_parsed("ELO_K_FACTOR", 32.0),
            match_idle_grace_ms: env_parsed("MATCH_IDLE_GRACE_MS", 60_000),
        })
    }

    /// Configuration suitable for tests: in-memory database, default tuning.
    pub fn for_tests() -> Self {
        Config {
            database_url: "sqlite::memory:".into(),
            port: 0,
            api_key_pepper: "test-pepper".into(),
            admin_key: "test-admin-key".into(),
            cors_origin: None,
            turn_timeout_ms: 30_000,
            disconnect_grace_ms: 15_000,
            event_wait_timeout_max_s: 30,
            per_agent_event_buffer_max: 25,
            subscriber_backlog_max: 256,
            elo_k_factor: 32.0,
            match_idle_grace_ms: 60_000,
        }
    }
}
