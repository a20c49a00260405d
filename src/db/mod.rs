// Database access layer using sqlx's Any driver (supports SQLite and PostgreSQL).
//
// This is the narrow persistence surface the actors talk to. Event appends
// and player records are best-effort from the actors' point of view; the
// result write is the one critical, atomic batch.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::any::{AnyPoolOptions, AnyQueryResult};
use sqlx::AnyPool;

use crate::elo::{Outcome, STARTING_RATING};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub verified_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiKey {
    pub id: String,
    pub agent_id: String,
    pub key_hash: String,
    pub key_prefix: String,
    pub created_at: String,
    pub revoked_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Match {
    pub id: String,
    pub status: String,
    pub seed: i64,
    pub created_at: String,
    pub ended_at: Option<String>,
    pub winner_agent_id: Option<String>,
    pub end_reason: Option<String>,
    pub final_state_version: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MatchPlayer {
    pub match_id: String,
    pub agent_id: String,
    pub seat: i32,
    pub starting_rating: i64,
    pub prompt_version_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MatchEventRow {
    pub id: i64,
    pub match_id: String,
    pub turn: i64,
    pub ts: String,
    pub event_type: String,
    pub payload_json: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MatchResult {
    pub match_id: String,
    pub winner_agent_id: Option<String>,
    pub loser_agent_id: Option<String>,
    pub reason: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LeaderboardRow {
    pub agent_id: String,
    pub rating: i64,
    pub wins: i64,
    pub losses: i64,
    pub games_played: i64,
    pub updated_at: String,
}

/// One player's side of the atomic result + leaderboard batch.
#[derive(Debug, Clone)]
pub struct PlayerRatingUpdate {
    pub agent_id: String,
    pub new_rating: i64,
    pub outcome: Outcome,
}

pub struct Database {
    pool: AnyPool,
    is_postgres: bool,
}

impl Database {
    /// Execute a raw SQL statement, returning the query result.
    /// This helper exists to provide type information for the Any driver.
    async fn exec(&self, sql: &str) -> Result<AnyQueryResult, sqlx::Error> {
        sqlx::query(sql).execute(&self.pool).await
    }

    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let is_postgres =
            database_url.starts_with("postgres://") || database_url.starts_with("postgresql://");
        // For SQLite in-memory databases, limit to 1 connection so all
        // queries share the same in-memory database.
        let is_memory = database_url.contains(":memory:");
        let max_conn = if is_memory { 1 } else { 5 };
        let pool = AnyPoolOptions::new()
            .max_connections(max_conn)
            .connect(database_url)
            .await?;
        let db = Self { pool, is_postgres };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        if self.is_postgres {
            self.run_migrations_postgres().await?;
        } else {
            self.run_migrations_sqlite().await?;
        }
        self.create_indexes().await
    }

    async fn run_migrations_postgres(&self) -> Result<(), sqlx::Error> {
        self.exec(
            r#"
            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                api_key_hash TEXT NOT NULL,
                claim_code_hash TEXT NOT NULL,
                verified_at TEXT,
                created_at TEXT NOT NULL DEFAULT (now()::text)
            )
        "#,
        )
        .await?;

        self.exec(
            r#"
            CREATE TABLE IF NOT EXISTS api_keys (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL REFERENCES agents(id),
                key_hash TEXT NOT NULL,
                key_prefix TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (now()::text),
                revoked_at TEXT
            )
        "#,
        )
        .await?;

        self.exec(
            r#"
            CREATE TABLE IF NOT EXISTS matches (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'active',
                seed BIGINT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (now()::text),
                ended_at TEXT,
                winner_agent_id TEXT,
                end_reason TEXT,
                final_state_version BIGINT
            )
        "#,
        )
        .await?;

        self.exec(
            r#"
            CREATE TABLE IF NOT EXISTS match_players (
                match_id TEXT NOT NULL REFERENCES matches(id),
                agent_id TEXT NOT NULL REFERENCES agents(id),
                seat INTEGER NOT NULL,
                starting_rating BIGINT NOT NULL DEFAULT 1500,
                prompt_version_id TEXT,
                PRIMARY KEY (match_id, agent_id),
                UNIQUE (match_id, seat)
            )
        "#,
        )
        .await?;

        self.exec(
            r#"
            CREATE TABLE IF NOT EXISTS match_events (
                id BIGSERIAL PRIMARY KEY,
                match_id TEXT NOT NULL REFERENCES matches(id),
                turn BIGINT NOT NULL,
                ts TEXT NOT NULL DEFAULT (now()::text),
                event_type TEXT NOT NULL,
                payload_json TEXT NOT NULL
            )
        "#,
        )
        .await?;

        self.exec(
            r#"
            CREATE TABLE IF NOT EXISTS match_results (
                match_id TEXT PRIMARY KEY REFERENCES matches(id),
                winner_agent_id TEXT,
                loser_agent_id TEXT,
                reason TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (now()::text)
            )
        "#,
        )
        .await?;

        self.exec(
            r#"
            CREATE TABLE IF NOT EXISTS leaderboard (
                agent_id TEXT PRIMARY KEY REFERENCES agents(id),
                rating BIGINT NOT NULL DEFAULT 1500,
                wins BIGINT NOT NULL DEFAULT 0,
                losses BIGINT NOT NULL DEFAULT 0,
                games_played BIGINT NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT (now()::text)
            )
        "#,
        )
        .await?;

        Ok(())
    }

    async fn run_migrations_sqlite(&self) -> Result<(), sqlx::Error> {
        self.exec(
            r#"
            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                api_key_hash TEXT NOT NULL,
                claim_code_hash TEXT NOT NULL,
                verified_at TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .await?;

        self.exec(
            r#"
            CREATE TABLE IF NOT EXISTS api_keys (
                id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL REFERENCES agents(id),
                key_hash TEXT NOT NULL,
                key_prefix TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                revoked_at TEXT
            )
        "#,
        )
        .await?;

        self.exec(
            r#"
            CREATE TABLE IF NOT EXISTS matches (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'active',
                seed INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                ended_at TEXT,
                winner_agent_id TEXT,
                end_reason TEXT,
                final_state_version INTEGER
            )
        "#,
        )
        .await?;

        self.exec(
            r#"
            CREATE TABLE IF NOT EXISTS match_players (
                match_id TEXT NOT NULL REFERENCES matches(id),
                agent_id TEXT NOT NULL REFERENCES agents(id),
                seat INTEGER NOT NULL,
                starting_rating INTEGER NOT NULL DEFAULT 1500,
                prompt_version_id TEXT,
                PRIMARY KEY (match_id, agent_id),
                UNIQUE (match_id, seat)
            )
        "#,
        )
        .await?;

        self.exec(
            r#"
            CREATE TABLE IF NOT EXISTS match_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                match_id TEXT NOT NULL REFERENCES matches(id),
                turn INTEGER NOT NULL,
                ts TEXT NOT NULL DEFAULT (datetime('now')),
                event_type TEXT NOT NULL,
                payload_json TEXT NOT NULL
            )
        "#,
        )
        .await?;

        self.exec(
            r#"
            CREATE TABLE IF NOT EXISTS match_results (
                match_id TEXT PRIMARY KEY REFERENCES matches(id),
                winner_agent_id TEXT,
                loser_agent_id TEXT,
                reason TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .await?;

        self.exec(
            r#"
            CREATE TABLE IF NOT EXISTS leaderboard (
                agent_id TEXT PRIMARY KEY REFERENCES agents(id),
                rating INTEGER NOT NULL DEFAULT 1500,
                wins INTEGER NOT NULL DEFAULT 0,
                losses INTEGER NOT NULL DEFAULT 0,
                games_played INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .await?;

        Ok(())
    }

    async fn create_indexes(&self) -> Result<(), sqlx::Error> {
        self.exec(
            "CREATE INDEX IF NOT EXISTS idx_match_events_match_turn ON match_events (match_id, turn)",
        )
        .await?;
        self.exec(
            "CREATE INDEX IF NOT EXISTS idx_match_events_match_ts ON match_events (match_id, ts)",
        )
        .await?;
        self.exec(
            "CREATE INDEX IF NOT EXISTS idx_match_results_created ON match_results (created_at DESC)",
        )
        .await?;
        self.exec("CREATE INDEX IF NOT EXISTS idx_leaderboard_rating ON leaderboard (rating DESC)")
            .await?;
        self.exec("CREATE INDEX IF NOT EXISTS idx_api_keys_hash ON api_keys (key_hash)")
            .await?;
        Ok(())
    }

    /// Returns the SQL expression for the current timestamp as text,
    /// appropriate for the connected database backend.
    fn now_expr(&self) -> &'static str {
        if self.is_postgres {
            "now()::text"
        } else {
            "datetime('now')"
        }
    }

    // ── Agents ────────────────────────────────────────────────────────

    pub async fn create_agent(
        &self,
        id: &str,
        name: &str,
        api_key_hash: &str,
        claim_code_hash: &str,
    ) -> Result<Agent, sqlx::Error> {
        let row = sqlx::query_as::<_, Agent>(
            "INSERT INTO agents (id, name, api_key_hash, claim_code_hash) VALUES ($1, $2, $3, $4) RETURNING id, name, verified_at, created_at",
        )
        .bind(id)
        .bind(name)
        .bind(api_key_hash)
        .bind(claim_code_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_agent(&self, id: &str) -> Result<Option<Agent>, sqlx::Error> {
        sqlx::query_as::<_, Agent>(
            "SELECT id, name, verified_at, created_at FROM agents WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn get_agent_by_name(&self, name: &str) -> Result<Option<Agent>, sqlx::Error> {
        sqlx::query_as::<_, Agent>(
            "SELECT id, name, verified_at, created_at FROM agents WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn find_agent_by_claim_hash(
        &self,
        claim_code_hash: &str,
    ) -> Result<Option<Agent>, sqlx::Error> {
        sqlx::query_as::<_, Agent>(
            "SELECT id, name, verified_at, created_at FROM agents WHERE claim_code_hash = $1",
        )
        .bind(claim_code_hash)
        .fetch_optional(&self.pool)
        .await
    }

    /// Mark an agent verified. Returns the updated row, or `None` if the
    /// agent does not exist. A no-op when already verified.
    pub async fn verify_agent(&self, id: &str) -> Result<Option<Agent>, sqlx::Error> {
        let sql = format!(
            "UPDATE agents SET verified_at = {} WHERE id = $1 AND verified_at IS NULL",
            self.now_expr()
        );
        sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        self.get_agent(id).await
    }

    // ── API keys ──────────────────────────────────────────────────────

    pub async fn insert_api_key(
        &self,
        id: &str,
        agent_id: &str,
        key_hash: &str,
        key_prefix: &str,
    ) -> Result<ApiKey, sqlx::Error> {
        sqlx::query_as::<_, ApiKey>(
            "INSERT INTO api_keys (id, agent_id, key_hash, key_prefix) VALUES ($1, $2, $3, $4) RETURNING id, agent_id, key_hash, key_prefix, created_at, revoked_at",
        )
        .bind(id)
        .bind(agent_id)
        .bind(key_hash)
        .bind(key_prefix)
        .fetch_one(&self.pool)
        .await
    }

    /// Look up a live (non-revoked) API key by its hash.
    pub async fn get_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, sqlx::Error> {
        sqlx::query_as::<_, ApiKey>(
            "SELECT id, agent_id, key_hash, key_prefix, created_at, revoked_at FROM api_keys WHERE key_hash = $1 AND revoked_at IS NULL",
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn revoke_api_key(&self, id: &str) -> Result<bool, sqlx::Error> {
        let sql = format!(
            "UPDATE api_keys SET revoked_at = {} WHERE id = $1 AND revoked_at IS NULL",
            self.now_expr()
        );
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Matches ───────────────────────────────────────────────────────

    pub async fn record_match_created(&self, match_id: &str, seed: i64) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO matches (id, status, seed) VALUES ($1, 'active', $2)")
            .bind(match_id)
            .bind(seed)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn record_match_players(
        &self,
        match_id: &str,
        players: &[(String, i32, i64)],
    ) -> Result<(), sqlx::Error> {
        for (agent_id, seat, starting_rating) in players {
            sqlx::query(
                "INSERT INTO match_players (match_id, agent_id, seat, starting_rating) VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
            )
            .bind(match_id)
            .bind(agent_id)
            .bind(seat)
            .bind(starting_rating)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn get_match(&self, match_id: &str) -> Result<Option<Match>, sqlx::Error> {
        sqlx::query_as::<_, Match>(
            "SELECT id, status, seed, created_at, ended_at, winner_agent_id, end_reason, final_state_version FROM matches WHERE id = $1",
        )
        .bind(match_id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn get_match_players(
        &self,
        match_id: &str,
    ) -> Result<Vec<MatchPlayer>, sqlx::Error> {
        sqlx::query_as::<_, MatchPlayer>(
            "SELECT match_id, agent_id, seat, starting_rating, prompt_version_id FROM match_players WHERE match_id = $1 ORDER BY seat",
        )
        .bind(match_id)
        .fetch_all(&self.pool)
        .await
    }

    // ── Event log ─────────────────────────────────────────────────────

    /// Append one event row. Strictly append-only; rows are never mutated.
    pub async fn append_event(
        &self,
        match_id: &str,
        turn: i64,
        event_type: &str,
        payload: &Value,
    ) -> Result<(), sqlx::Error> {
        let payload_json = payload.to_string();
        sqlx::query(
            "INSERT INTO match_events (match_id, turn, event_type, payload_json) VALUES ($1, $2, $3, $4)",
        )
        .bind(match_id)
        .bind(turn)
        .bind(event_type)
        .bind(payload_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Read back the event log for a match in insertion order.
    pub async fn load_event_log(
        &self,
        match_id: &str,
        limit: i64,
    ) -> Result<Vec<MatchEventRow>, sqlx::Error> {
        sqlx::query_as::<_, MatchEventRow>(
            "SELECT id, match_id, turn, ts, event_type, payload_json FROM match_events WHERE match_id = $1 ORDER BY id LIMIT $2",
        )
        .bind(match_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    // ── Results + leaderboard (atomic batch) ──────────────────────────

    /// Record the match result and both leaderboard updates in a single
    /// transaction. The result insert is guarded by the primary key, so a
    /// retried call after a partial failure cannot double-apply the
    /// leaderboard deltas. Returns whether this call inserted the row.
    pub async fn record_match_result(
        &self,
        match_id: &str,
        winner_agent_id: Option<&str>,
        loser_agent_id: Option<&str>,
        reason: &str,
        final_state_version: i64,
        updates: &[PlayerRatingUpdate],
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO match_results (match_id, winner_agent_id, loser_agent_id, reason) VALUES ($1, $2, $3, $4) ON CONFLICT DO NOTHING",
        )
        .bind(match_id)
        .bind(winner_agent_id)
        .bind(loser_agent_id)
        .bind(reason)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !inserted {
            // Already recorded by an earlier attempt; leave everything as-is.
            tx.rollback().await?;
            return Ok(false);
        }

        let sql = format!(
            "UPDATE matches SET status = 'ended', ended_at = {}, winner_agent_id = $1, end_reason = $2, final_state_version = $3 WHERE id = $4",
            self.now_expr()
        );
        sqlx::query(&sql)
            .bind(winner_agent_id)
            .bind(reason)
            .bind(final_state_version)
            .bind(match_id)
            .execute(&mut *tx)
            .await?;

        for update in updates {
            let (win_inc, loss_inc): (i64, i64) = match update.outcome {
                Outcome::Win => (1, 0),
                Outcome::Loss => (0, 1),
                Outcome::Draw => (0, 0),
            };
            let sql = format!(
                "INSERT INTO leaderboard (agent_id, rating, wins, losses, games_played, updated_at) \
                 VALUES ($1, $2, $3, $4, 1, {now}) \
                 ON CONFLICT (agent_id) DO UPDATE SET \
                 rating = $2, wins = leaderboard.wins + $3, losses = leaderboard.losses + $4, \
                 games_played = leaderboard.games_played + 1, updated_at = {now}",
                now = self.now_expr()
            );
            sqlx::query(&sql)
                .bind(&update.agent_id)
                .bind(update.new_rating)
                .bind(win_inc)
                .bind(loss_inc)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    // ── Leaderboard reads ─────────────────────────────────────────────

    /// Current rating for an agent, defaulting to 1500 before any match.
    pub async fn get_rating(&self, agent_id: &str) -> Result<i64, sqlx::Error> {
        let rating: Option<i64> =
            sqlx::query_scalar("SELECT rating FROM leaderboard WHERE agent_id = $1")
                .bind(agent_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(rating.unwrap_or(STARTING_RATING))
    }

    pub async fn top_leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardRow>, sqlx::Error> {
        sqlx::query_as::<_, LeaderboardRow>(
            "SELECT agent_id, rating, wins, losses, games_played, updated_at FROM leaderboard ORDER BY rating DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_db() -> Database {
        sqlx::any::install_default_drivers();
        Database::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_agent_lifecycle() {
        let db = test_db().await;

        let agent = db
            .create_agent("ag_1", "alpha", "kh", "ch")
            .await
            .unwrap();
        assert_eq!(agent.name, "alpha");
        assert!(agent.verified_at.is_none());

        // Unique name
        let dup = db.create_agent("ag_2", "alpha", "kh2", "ch2").await;
        assert!(dup.unwrap_err().to_string().contains("UNIQUE"));

        let found = db.find_agent_by_claim_hash("ch").await.unwrap().unwrap();
        assert_eq!(found.id, "ag_1");

        let verified = db.verify_agent("ag_1").await.unwrap().unwrap();
        assert!(verified.verified_at.is_some());

        assert!(db.verify_agent("ag_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_api_key_lookup_and_revoke() {
        let db = test_db().await;
        db.create_agent("ag_1", "alpha", "kh", "ch").await.unwrap();

        let key = db
            .insert_api_key("key_1", "ag_1", "hash_1", "fc_sk_ab")
            .await
            .unwrap();
        assert_eq!(key.agent_id, "ag_1");

        let found = db.get_api_key_by_hash("hash_1").await.unwrap().unwrap();
        assert_eq!(found.id, "key_1");

        assert!(db.revoke_api_key("key_1").await.unwrap());
        assert!(db.get_api_key_by_hash("hash_1").await.unwrap().is_none());
        // Second revoke is a no-op
        assert!(!db.revoke_api_key("key_1").await.unwrap());
    }

    #[tokio::test]
    async fn test_event_log_ids_strictly_increase() {
        let db = test_db().await;
        db.record_match_created("m_1", 7).await.unwrap();

        for turn in 0..5 {
            db.append_event("m_1", turn, "move_applied", &json!({"turn": turn}))
                .await
                .unwrap();
        }

        let rows = db.load_event_log("m_1", 100).await.unwrap();
        assert_eq!(rows.len(), 5);
        for pair in rows.windows(2) {
            assert!(pair[1].id > pair[0].id);
        }
        assert_eq!(rows[0].event_type, "move_applied");

        let limited = db.load_event_log("m_1", 2).await.unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_result_batch_is_idempotent() {
        let db = test_db().await;
        db.create_agent("ag_a", "alpha", "k1", "c1").await.unwrap();
        db.create_agent("ag_b", "beta", "k2", "c2").await.unwrap();
        db.record_match_created("m_1", 7).await.unwrap();

        let updates = vec![
            PlayerRatingUpdate {
                agent_id: "ag_a".into(),
                new_rating: 1516,
                outcome: Outcome::Win,
            },
            PlayerRatingUpdate {
                agent_id: "ag_b".into(),
                new_rating: 1484,
                outcome: Outcome::Loss,
            },
        ];

        let first = db
            .record_match_result("m_1", Some("ag_a"), Some("ag_b"), "terminal", 9, &updates)
            .await
            .unwrap();
        assert!(first);

        // Retrying must not double-apply the leaderboard deltas.
        let second = db
            .record_match_result("m_1", Some("ag_a"), Some("ag_b"), "terminal", 9, &updates)
            .await
            .unwrap();
        assert!(!second);

        let m = db.get_match("m_1").await.unwrap().unwrap();
        assert_eq!(m.status, "ended");
        assert_eq!(m.winner_agent_id.as_deref(), Some("ag_a"));
        assert_eq!(m.final_state_version, Some(9));

        let board = db.top_leaderboard(10).await.unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].agent_id, "ag_a");
        assert_eq!(board[0].rating, 1516);
        assert_eq!(board[0].wins, 1);
        assert_eq!(board[0].games_played, 1);
        assert_eq!(board[1].losses, 1);
    }

    #[tokio::test]
    async fn test_rating_defaults_to_1500() {
        let db = test_db().await;
        db.create_agent("ag_a", "alpha", "k1", "c1").await.unwrap();
        assert_eq!(db.get_rating("ag_a").await.unwrap(), 1500);
    }

    #[tokio::test]
    async fn test_match_players_unique_seats() {
        let db = test_db().await;
        db.create_agent("ag_a", "alpha", "k1", "c1").await.unwrap();
        db.create_agent("ag_b", "beta", "k2", "c2").await.unwrap();
        db.record_match_created("m_1", 3).await.unwrap();

        db.record_match_players(
            "m_1",
            &[
                ("ag_a".to_string(), 0, 1500),
                ("ag_b".to_string(), 1, 1520),
            ],
        )
        .await
        .unwrap();

        let players = db.get_match_players("m_1").await.unwrap();
        assert_eq!(players.len(), 2);
        assert_eq!(players[0].seat, 0);
        assert_eq!(players[1].starting_rating, 1520);

        // Re-recording is ignored, not an error.
        db.record_match_players("m_1", &[("ag_a".to_string(), 0, 1500)])
            .await
            .unwrap();
        assert_eq!(db.get_match_players("m_1").await.unwrap().len(), 2);
    }
}
