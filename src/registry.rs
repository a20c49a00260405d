// Registry of live match actors, addressable by matchId.
//
// Actors are spawned when the matchmaker pairs a match and reaped by a
// background sweep once the match has been over for the grace period.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::db::Database;
use crate::engine::Engine;
use crate::match_actor::{self, MatchActorConfig, MatchHandle, Seat};

#[derive(Clone)]
pub struct MatchRegistry {
    inner: Arc<Mutex<HashMap<String, MatchHandle>>>,
    engine: Arc<dyn Engine>,
    db: Arc<Database>,
    actor_cfg: MatchActorConfig,
    grace_ms: u64,
}

impl MatchRegistry {
    pub fn new(
        engine: Arc<dyn Engine>,
        db: Arc<Database>,
        actor_cfg: MatchActorConfig,
        grace_ms: u64,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            engine,
            db,
            actor_cfg,
            grace_ms,
        }
    }

    /// Spawn the actor for a freshly-paired match and track its handle.
    /// Engine-init failures still produce a handle: the actor starts in the
    /// ended state with reason `init_failed` so both agents observe a
    /// terminal event when they attach.
    pub fn create(&self, match_id: &str, seed: u64, seats: [Seat; 2]) -> MatchHandle {
        let handle = match_actor::spawn(
            match_id.to_string(),
            seed,
            seats,
            self.engine.clone(),
            self.db.clone(),
            self.actor_cfg.clone(),
        );
        self.inner
            .lock()
            .unwrap()
            .insert(match_id.to_string(), handle.clone());
        handle
    }

    pub fn get(&self, match_id: &str) -> Option<MatchHandle> {
        self.inner.lock().unwrap().get(match_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop handles for matches that ended longer than the grace ago. The
    /// actor task itself exits once its last sender is gone.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let grace = self.grace_ms;
        let mut map = self.inner.lock().unwrap();
        let before = map.len();
        map.retain(|_, handle| match handle.ended_at_ms() {
            Some(ended) => now_ms.saturating_sub(ended) < grace,
            None => true,
        });
        before - map.len()
    }
}

/// Spawn the background reaper for ended matches.
pub fn spawn_sweeper(registry: MatchRegistry) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            let reaped = registry.sweep(now);
            if reaped > 0 {
                tracing::debug!("Reaped {reaped} ended match actors");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::skirmish::SkirmishEngine;

    async fn test_registry() -> MatchRegistry {
        sqlx::any::install_default_drivers();
        let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
        db.create_agent("ag_a", "alpha", "k1", "c1").await.unwrap();
        db.create_agent("ag_b", "beta", "k2", "c2").await.unwrap();
        db.record_match_created("m_1", 5).await.unwrap();
        MatchRegistry::new(
            Arc::new(SkirmishEngine::new()),
            db,
            MatchActorConfig {
                turn_timeout_ms: 30_000,
                disconnect_grace_ms: 15_000,
                subscriber_backlog_max: 256,
                elo_k_factor: 32.0,
            },
            60_000,
        )
    }

    fn seats() -> [Seat; 2] {
        [
            Seat {
                agent_id: "ag_a".into(),
                starting_rating: 1500,
            },
            Seat {
                agent_id: "ag_b".into(),
                starting_rating: 1500,
            },
        ]
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = test_registry().await;
        assert!(registry.get("m_1").is_none());

        let handle = registry.create("m_1", 5, seats());
        assert_eq!(handle.match_id(), "m_1");
        assert!(registry.get("m_1").is_some());
        assert!(registry.get("m_2").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_keeps_active_and_graced_matches() {
        let registry = test_registry().await;
        let handle = registry.create("m_1", 5, seats());

        // Active match: never reaped.
        assert_eq!(registry.sweep(u64::MAX), 0);

        handle.finish("cleanup").await.unwrap();
        let ended = handle.ended_at_ms().unwrap();

        // Inside the grace period the handle survives.
        assert_eq!(registry.sweep(ended + 1_000), 0);
        assert!(registry.get("m_1").is_some());

        // Past the grace period it is reaped.
        assert_eq!(registry.sweep(ended + 61_000), 1);
        assert!(registry.get("m_1").is_none());
        assert!(registry.is_empty());
    }
}
