// Matchmaker: a single actor serializing the queue protocol.
//
// Holds the one pending-queue slot, pairs agents into matches, spawns the
// owning match actor, and buffers per-agent pairing notifications across
// disconnects. The pending slot is a two-state machine: Empty, or
// Holding(matchId, agentId); join/leave are the only transitions.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::auth::generate_id;
use crate::db::Database;
use crate::events::MatchmakerEvent;
use crate::match_actor::Seat;
use crate::metrics;
use crate::registry::MatchRegistry;

const MAILBOX_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePhase {
    Waiting,
    Ready,
}

/// Reply to a join request.
#[derive(Debug, Clone, Serialize)]
pub struct JoinReply {
    #[serde(rename = "matchId")]
    pub match_id: String,
    pub status: QueuePhase,
}

/// Reply to a queue-status request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StatusReply {
    Idle,
    Waiting {
        #[serde(rename = "matchId")]
        match_id: String,
    },
}

/// Reply to a featured-match request.
#[derive(Debug, Clone, Serialize, Default)]
pub struct FeaturedReply {
    #[serde(rename = "matchId", skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub players: Option<Vec<String>>,
}

/// The matchmaker task is gone (shutdown).
#[derive(Debug, Clone, PartialEq)]
pub struct MatchmakerGone;

impl std::fmt::Display for MatchmakerGone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "matchmaker is gone")
    }
}

enum MmCommand {
    Join {
        agent_id: String,
        reply: oneshot::Sender<JoinReply>,
    },
    Status {
        agent_id: String,
        reply: oneshot::Sender<StatusReply>,
    },
    Leave {
        agent_id: String,
        reply: oneshot::Sender<()>,
    },
    Wait {
        agent_id: String,
        waiter_id: u64,
        reply: oneshot::Sender<MatchmakerEvent>,
    },
    CancelWait {
        agent_id: String,
        waiter_id: u64,
        reply: oneshot::Sender<bool>,
    },
    Featured {
        reply: oneshot::Sender<FeaturedReply>,
    },
    LatestMatch {
        reply: oneshot::Sender<Option<String>>,
    },
}

/// Cheap, cloneable address of the matchmaker singleton.
#[derive(Clone)]
pub struct MatchmakerHandle {
    tx: mpsc::Sender<MmCommand>,
    waiter_seq: Arc<AtomicU64>,
}

impl MatchmakerHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> MmCommand,
    ) -> Result<T, MatchmakerGone> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(make(tx)).await.map_err(|_| MatchmakerGone)?;
        rx.await.map_err(|_| MatchmakerGone)
    }

    pub async fn join_queue(&self, agent_id: &str) -> Result<JoinReply, MatchmakerGone> {
        let agent_id = agent_id.to_string();
        self.request(move |reply| MmCommand::Join { agent_id, reply })
            .await
    }

    pub async fn queue_status(&self, agent_id: &str) -> Result<StatusReply, MatchmakerGone> {
        let agent_id = agent_id.to_string();
        self.request(move |reply| MmCommand::Status { agent_id, reply })
            .await
    }

    pub async fn leave_queue(&self, agent_id: &str) -> Result<(), MatchmakerGone> {
        let agent_id = agent_id.to_string();
        self.request(move |reply| MmCommand::Leave { agent_id, reply })
            .await
    }

    pub async fn featured(&self) -> Result<FeaturedReply, MatchmakerGone> {
        self.request(|reply| MmCommand::Featured { reply }).await
    }

    pub async fn latest_match_id(&self) -> Result<Option<String>, MatchmakerGone> {
        self.request(|reply| MmCommand::LatestMatch { reply }).await
    }

    /// Pop the next buffered event for this agent, suspending up to
    /// `timeout`. Returns `NoEvents` on timeout. Cancellation never
    /// consumes a buffered event: the waiter is withdrawn through the
    /// actor, and a delivery that raced the timeout is recovered from the
    /// reply channel.
    pub async fn wait_events(
        &self,
        agent_id: &str,
        timeout: Duration,
    ) -> Result<MatchmakerEvent, MatchmakerGone> {
        let waiter_id = self.waiter_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = oneshot::channel();
        self.tx
            .send(MmCommand::Wait {
                agent_id: agent_id.to_string(),
                waiter_id,
                reply: tx,
            })
            .await
            .map_err(|_| MatchmakerGone)?;

        tokio::select! {
            delivered = &mut rx => delivered.map_err(|_| MatchmakerGone),
            _ = tokio::time::sleep(timeout) => {
                let agent_id = agent_id.to_string();
                let withdrawn = self
                    .request(move |reply| MmCommand::CancelWait {
                        agent_id,
                        waiter_id,
                        reply,
                    })
                    .await?;
                if withdrawn {
                    Ok(MatchmakerEvent::NoEvents)
                } else {
                    // The actor delivered before the withdrawal landed.
                    rx.try_recv().or(Ok(MatchmakerEvent::NoEvents))
                }
            }
        }
    }
}

struct PendingSlot {
    match_id: String,
    agent_id: String,
    seed: u64,
}

struct Matchmaker {
    db: Arc<Database>,
    registry: MatchRegistry,
    buffer_cap: usize,
    pending: Option<PendingSlot>,
    latest: Option<LatestMatch>,
    buffers: HashMap<String, VecDeque<MatchmakerEvent>>,
    waiters: HashMap<String, VecDeque<(u64, oneshot::Sender<MatchmakerEvent>)>>,
}

struct LatestMatch {
    match_id: String,
    players: [String; 2],
}

/// Spawn the process-wide matchmaker actor.
pub fn spawn(db: Arc<Database>, registry: MatchRegistry, buffer_cap: usize) -> MatchmakerHandle {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let actor = Matchmaker {
        db,
        registry,
        buffer_cap,
        pending: None,
        latest: None,
        buffers: HashMap::new(),
        waiters: HashMap::new(),
    };
    tokio::spawn(actor.run(rx));
    MatchmakerHandle {
        tx,
        waiter_seq: Arc::new(AtomicU64::new(1)),
    }
}

impl Matchmaker {
    async fn run(mut self, mut rx: mpsc::Receiver<MmCommand>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                MmCommand::Join { agent_id, reply } => {
                    let result = self.handle_join(agent_id).await;
                    let _ = reply.send(result);
                }
                MmCommand::Status { agent_id, reply } => {
                    let result = match &self.pending {
                        Some(slot) if slot.agent_id == agent_id => StatusReply::Waiting {
                            match_id: slot.match_id.clone(),
                        },
                        _ => StatusReply::Idle,
                    };
                    let _ = reply.send(result);
                }
                MmCommand::Leave { agent_id, reply } => {
                    if matches!(&self.pending, Some(slot) if slot.agent_id == agent_id) {
                        self.pending = None;
                        metrics::QUEUE_WAITING.set(0);
                    }
                    let _ = reply.send(());
                }
                MmCommand::Wait {
                    agent_id,
                    waiter_id,
                    reply,
                } => {
                    self.handle_wait(agent_id, waiter_id, reply);
                }
                MmCommand::CancelWait {
                    agent_id,
                    waiter_id,
                    reply,
                } => {
                    let mut withdrawn = false;
                    if let Some(queue) = self.waiters.get_mut(&agent_id) {
                        let before = queue.len();
                        queue.retain(|(id, _)| *id != waiter_id);
                        withdrawn = queue.len() != before;
                    }
                    let _ = reply.send(withdrawn);
                }
                MmCommand::Featured { reply } => {
                    let _ = reply.send(self.handle_featured().await);
                }
                MmCommand::LatestMatch { reply } => {
                    let _ = reply.send(self.latest.as_ref().map(|l| l.match_id.clone()));
                }
            }
        }
    }

    // ── Pairing ───────────────────────────────────────────────────────

    async fn handle_join(&mut self, agent_id: String) -> JoinReply {
        // Idempotent re-join while holding the pending slot.
        if let Some(slot) = &self.pending {
            if slot.agent_id == agent_id {
                return JoinReply {
                    match_id: slot.match_id.clone(),
                    status: QueuePhase::Waiting,
                };
            }
        }

        if let Some(slot) = self.pending.take() {
            // A different agent is waiting: pair them.
            metrics::QUEUE_WAITING.set(0);
            return self.complete_pairing(slot, agent_id).await;
        }

        // Queue is empty: allocate a match and hold the slot.
        let match_id = generate_id("m_");
        let seed: u64 = rand::thread_rng().gen();
        if let Err(e) = self.db.record_match_created(&match_id, seed as i64).await {
            // Best-effort row; the in-memory slot is still taken.
            tracing::error!("Failed to record match {match_id}: {e}");
        }
        self.pending = Some(PendingSlot {
            match_id: match_id.clone(),
            agent_id,
            seed,
        });
        metrics::QUEUE_WAITING.set(1);
        JoinReply {
            match_id,
            status: QueuePhase::Waiting,
        }
    }

    async fn complete_pairing(&mut self, slot: PendingSlot, joiner: String) -> JoinReply {
        let first = slot.agent_id;
        let match_id = slot.match_id;

        let rating_of = |db: &Arc<Database>, agent: &str| {
            let db = db.clone();
            let agent = agent.to_string();
            async move {
                db.get_rating(&agent).await.unwrap_or_else(|e| {
                    tracing::error!("Failed to load rating for {agent}: {e}");
                    crate::elo::STARTING_RATING
                })
            }
        };
        let first_rating = rating_of(&self.db, &first).await;
        let joiner_rating = rating_of(&self.db, &joiner).await;

        if let Err(e) = self
            .db
            .record_match_players(
                &match_id,
                &[
                    (first.clone(), 0, first_rating),
                    (joiner.clone(), 1, joiner_rating),
                ],
            )
            .await
        {
            // Logged and swallowed; the pairing stands.
            tracing::error!("Failed to record players for match {match_id}: {e}");
        }

        self.registry.create(
            &match_id,
            slot.seed,
            [
                Seat {
                    agent_id: first.clone(),
                    starting_rating: first_rating,
                },
                Seat {
                    agent_id: joiner.clone(),
                    starting_rating: joiner_rating,
                },
            ],
        );
        metrics::MATCHES_STARTED_TOTAL.inc();

        self.latest = Some(LatestMatch {
            match_id: match_id.clone(),
            players: [first.clone(), joiner.clone()],
        });

        self.deliver_or_buffer(
            &first,
            MatchmakerEvent::MatchFound {
                match_id: match_id.clone(),
                opponent: joiner.clone(),
            },
        );
        self.deliver_or_buffer(
            &joiner,
            MatchmakerEvent::MatchFound {
                match_id: match_id.clone(),
                opponent: first,
            },
        );

        JoinReply {
            match_id,
            status: QueuePhase::Ready,
        }
    }

    // ── Event delivery ────────────────────────────────────────────────

    fn handle_wait(
        &mut self,
        agent_id: String,
        waiter_id: u64,
        reply: oneshot::Sender<MatchmakerEvent>,
    ) {
        if let Some(buffer) = self.buffers.get_mut(&agent_id) {
            if let Some(event) = buffer.pop_front() {
                if let Err(event) = reply.send(event) {
                    // Receiver vanished between send and processing; the
                    // event goes back to the front, unconsumed.
                    buffer.push_front(event);
                }
                return;
            }
        }
        self.waiters
            .entry(agent_id)
            .or_default()
            .push_back((waiter_id, reply));
    }

    /// Hand an event to the oldest live waiter, or buffer it. Buffers are
    /// bounded; overflow drops the oldest event so notifications for
    /// abandoned agents cannot starve active ones.
    fn deliver_or_buffer(&mut self, agent_id: &str, mut event: MatchmakerEvent) {
        if let Some(queue) = self.waiters.get_mut(agent_id) {
            while let Some((_, waiter)) = queue.pop_front() {
                match waiter.send(event) {
                    Ok(()) => return,
                    Err(back) => event = back, // dead waiter; try the next
                }
            }
        }
        let buffer = self.buffers.entry(agent_id.to_string()).or_default();
        if buffer.len() >= self.buffer_cap {
            buffer.pop_front();
            metrics::MATCHMAKER_EVENTS_DROPPED_TOTAL.inc();
        }
        buffer.push_back(event);
    }

    async fn handle_featured(&self) -> FeaturedReply {
        let Some(latest) = &self.latest else {
            return FeaturedReply::default();
        };
        let status = match self.db.get_match(&latest.match_id).await {
            Ok(Some(m)) => Some(m.status),
            Ok(None) => None,
            Err(e) => {
                tracing::error!("Failed to load featured match {}: {e}", latest.match_id);
                None
            }
        };
        FeaturedReply {
            match_id: Some(latest.match_id.clone()),
            status,
            players: Some(latest.players.to_vec()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::skirmish::SkirmishEngine;
    use crate::match_actor::MatchActorConfig;

    async fn setup() -> (Arc<Database>, MatchmakerHandle, MatchRegistry) {
        sqlx::any::install_default_drivers();
        let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
        db.create_agent("ag_a", "alpha", "k1", "c1").await.unwrap();
        db.create_agent("ag_b", "beta", "k2", "c2").await.unwrap();
        db.create_agent("ag_c", "gamma", "k3", "c3").await.unwrap();
        let registry = MatchRegistry::new(
            Arc::new(SkirmishEngine::new()),
            db.clone(),
            MatchActorConfig {
                turn_timeout_ms: 30_000,
                disconnect_grace_ms: 15_000,
                subscriber_backlog_max: 256,
                elo_k_factor: 32.0,
            },
            60_000,
        );
        let handle = spawn(db.clone(), registry.clone(), 25);
        (db, handle, registry)
    }

    #[tokio::test]
    async fn test_join_is_idempotent_while_waiting() {
        let (_db, mm, _reg) = setup().await;

        let first = mm.join_queue("ag_a").await.unwrap();
        assert_eq!(first.status, QueuePhase::Waiting);

        let again = mm.join_queue("ag_a").await.unwrap();
        assert_eq!(again.status, QueuePhase::Waiting);
        assert_eq!(again.match_id, first.match_id);
    }

    #[tokio::test]
    async fn test_pairing_creates_match_and_notifies_both() {
        let (db, mm, registry) = setup().await;

        let a = mm.join_queue("ag_a").await.unwrap();
        let b = mm.join_queue("ag_b").await.unwrap();
        assert_eq!(b.status, QueuePhase::Ready);
        assert_eq!(b.match_id, a.match_id);

        // The owning actor exists and both seats are recorded.
        assert!(registry.get(&a.match_id).is_some());
        let players = db.get_match_players(&a.match_id).await.unwrap();
        assert_eq!(players.len(), 2);
        assert_eq!(players[0].agent_id, "ag_a");
        assert_eq!(players[0].seat, 0);
        assert_eq!(players[1].agent_id, "ag_b");

        // Exactly one match_found each, naming the opponent.
        let ev_a = mm
            .wait_events("ag_a", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(
            ev_a,
            MatchmakerEvent::MatchFound {
                match_id: a.match_id.clone(),
                opponent: "ag_b".into()
            }
        );
        let ev_b = mm
            .wait_events("ag_b", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(
            ev_b,
            MatchmakerEvent::MatchFound {
                match_id: a.match_id.clone(),
                opponent: "ag_a".into()
            }
        );

        // Queue is empty again; a third agent starts a fresh pending match.
        let c = mm.join_queue("ag_c").await.unwrap();
        assert_eq!(c.status, QueuePhase::Waiting);
        assert_ne!(c.match_id, a.match_id);
    }

    #[tokio::test]
    async fn test_status_and_leave() {
        let (_db, mm, _reg) = setup().await;

        assert!(matches!(
            mm.queue_status("ag_a").await.unwrap(),
            StatusReply::Idle
        ));

        let joined = mm.join_queue("ag_a").await.unwrap();
        match mm.queue_status("ag_a").await.unwrap() {
            StatusReply::Waiting { match_id } => assert_eq!(match_id, joined.match_id),
            other => panic!("expected waiting, got {other:?}"),
        }
        // Another agent's status is unaffected.
        assert!(matches!(
            mm.queue_status("ag_b").await.unwrap(),
            StatusReply::Idle
        ));

        mm.leave_queue("ag_a").await.unwrap();
        assert!(matches!(
            mm.queue_status("ag_a").await.unwrap(),
            StatusReply::Idle
        ));

        // After leaving, a new join gets a fresh match id.
        let rejoined = mm.join_queue("ag_a").await.unwrap();
        assert_ne!(rejoined.match_id, joined.match_id);
    }

    #[tokio::test]
    async fn test_wait_events_times_out_with_no_events() {
        let (_db, mm, _reg) = setup().await;
        let ev = mm
            .wait_events("ag_a", Duration::from_millis(0))
            .await
            .unwrap();
        assert_eq!(ev, MatchmakerEvent::NoEvents);
    }

    #[tokio::test]
    async fn test_wait_then_event_arrives() {
        let (_db, mm, _reg) = setup().await;

        let waiter = {
            let mm = mm.clone();
            tokio::spawn(async move { mm.wait_events("ag_a", Duration::from_secs(5)).await })
        };
        // Give the waiter a moment to register, then trigger the pairing.
        tokio::time::sleep(Duration::from_millis(50)).await;
        mm.join_queue("ag_a").await.unwrap();
        mm.join_queue("ag_b").await.unwrap();

        let ev = waiter.await.unwrap().unwrap();
        assert!(matches!(ev, MatchmakerEvent::MatchFound { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_wait_does_not_consume_events() {
        let (_db, mm, _reg) = setup().await;

        // Timed-out wait leaves the (empty) buffer untouched.
        let ev = mm
            .wait_events("ag_a", Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(ev, MatchmakerEvent::NoEvents);

        // An event buffered afterwards is still delivered.
        mm.join_queue("ag_a").await.unwrap();
        mm.join_queue("ag_b").await.unwrap();
        let ev = mm
            .wait_events("ag_a", Duration::from_millis(10))
            .await
            .unwrap();
        assert!(matches!(ev, MatchmakerEvent::MatchFound { .. }));
    }

    #[tokio::test]
    async fn test_buffer_overflow_drops_oldest() {
        sqlx::any::install_default_drivers();
        let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
        for i in 0..8 {
            db.create_agent(&format!("ag_{i}"), &format!("agent{i}"), "k", &format!("c{i}"))
                .await
                .unwrap();
        }
        let registry = MatchRegistry::new(
            Arc::new(SkirmishEngine::new()),
            db.clone(),
            MatchActorConfig {
                turn_timeout_ms: 30_000,
                disconnect_grace_ms: 15_000,
                subscriber_backlog_max: 256,
                elo_k_factor: 32.0,
            },
            60_000,
        );
        // Tiny cap so overflow is easy to provoke.
        let mm = spawn(db, registry, 2);

        // ag_0 pairs three times without ever draining its buffer.
        for opponent in ["ag_1", "ag_2", "ag_3"] {
            mm.join_queue("ag_0").await.unwrap();
            mm.join_queue(opponent).await.unwrap();
        }

        // Capacity 2: the oldest (ag_1 pairing) was dropped.
        let first = mm
            .wait_events("ag_0", Duration::from_millis(10))
            .await
            .unwrap();
        match first {
            MatchmakerEvent::MatchFound { opponent, .. } => assert_eq!(opponent, "ag_2"),
            other => panic!("expected match_found, got {other:?}"),
        }
        let second = mm
            .wait_events("ag_0", Duration::from_millis(10))
            .await
            .unwrap();
        match second {
            MatchmakerEvent::MatchFound { opponent, .. } => assert_eq!(opponent, "ag_3"),
            other => panic!("expected match_found, got {other:?}"),
        }
        assert_eq!(
            mm.wait_events("ag_0", Duration::from_millis(0))
                .await
                .unwrap(),
            MatchmakerEvent::NoEvents
        );
    }

    #[tokio::test]
    async fn test_featured_tracks_latest_pairing() {
        let (_db, mm, _reg) = setup().await;

        let empty = mm.featured().await.unwrap();
        assert!(empty.match_id.is_none());

        mm.join_queue("ag_a").await.unwrap();
        let paired = mm.join_queue("ag_b").await.unwrap();

        let featured = mm.featured().await.unwrap();
        assert_eq!(featured.match_id.as_deref(), Some(paired.match_id.as_str()));
        assert_eq!(featured.status.as_deref(), Some("active"));
        assert_eq!(
            featured.players,
            Some(vec!["ag_a".to_string(), "ag_b".to_string()])
        );
        assert_eq!(
            mm.latest_match_id().await.unwrap().as_deref(),
            Some(paired.match_id.as_str())
        );
    }
}
