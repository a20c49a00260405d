// Match actor: a single-writer task owning one match's authoritative state.
//
// All operations arrive on a mailbox and are handled one at a time, so
// state-version monotonicity and broadcast ordering need no locks. Timers
// post back into the same mailbox and carry a generation stamp; a stale
// generation means the timer was superseded and the firing is ignored.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use crate::db::{Database, PlayerRatingUpdate};
use crate::elo::{self, Outcome};
use crate::engine::{Engine, MoveAction};
use crate::events::{StreamEvent, EVENT_VERSION};
use crate::metrics;

const MAILBOX_CAPACITY: usize = 64;
const RESULT_WRITE_ATTEMPTS: u32 = 3;
const RESULT_WRITE_BACKOFF_MS: u64 = 100;

/// Tuning knobs handed to each actor at spawn.
#[derive(Debug, Clone)]
pub struct MatchActorConfig {
    pub turn_timeout_ms: u64,
    pub disconnect_grace_ms: u64,
    pub subscriber_backlog_max: usize,
    pub elo_k_factor: f64,
}

/// One seat at the table: the agent and the rating captured at pairing time.
#[derive(Debug, Clone)]
pub struct Seat {
    pub agent_id: String,
    pub starting_rating: i64,
}

/// The response to a move submission, stored verbatim in the idempotency
/// table so retries observe byte-identical envelopes.
#[derive(Debug, Clone)]
pub struct MoveReply {
    pub status: u16,
    pub body: Value,
}

/// Snapshot of the actor's view of the match.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub match_id: String,
    pub state: Value,
    pub state_version: u64,
    pub turn: u64,
    pub active_agent_id: Option<String>,
    pub terminal: Option<EndedInfo>,
}

impl StateSnapshot {
    /// The `state` payload broadcast to subscribers and returned by the
    /// state endpoint: engine state plus orchestration metadata.
    pub fn to_value(&self) -> Value {
        json!({
            "state": self.state,
            "stateVersion": self.state_version,
            "turn": self.turn,
            "activeAgentId": self.active_agent_id,
            "terminal": self.terminal.as_ref().map(|t| json!({
                "winner": t.winner,
                "reason": t.reason,
            })),
        })
    }
}

#[derive(Debug, Clone)]
pub struct EndedInfo {
    pub winner: Option<String>,
    pub reason: String,
    pub final_state_version: u64,
}

/// A live event stream. Single-pass: once it ends the consumer must
/// re-subscribe and will receive a fresh snapshot, not a replay.
pub struct Subscription {
    rx: mpsc::Receiver<StreamEvent>,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    pub fn into_receiver(self) -> mpsc::Receiver<StreamEvent> {
        self.rx
    }
}

/// The actor has been reaped (or its mailbox closed mid-call).
#[derive(Debug, Clone, PartialEq)]
pub struct MatchGone;

impl std::fmt::Display for MatchGone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "match actor is gone")
    }
}

enum MatchCommand {
    SubmitMove {
        agent_id: String,
        move_id: String,
        expected_version: u64,
        mv: Value,
        reply: oneshot::Sender<MoveReply>,
    },
    GetState {
        reply: oneshot::Sender<StateSnapshot>,
    },
    Subscribe {
        agent_id: Option<String>,
        reply: oneshot::Sender<Subscription>,
    },
    PublishThought {
        agent_id: String,
        thought: Value,
        reply: oneshot::Sender<bool>,
    },
    Finish {
        reason: String,
        reply: oneshot::Sender<bool>,
    },
    ConnectionOpened {
        agent_id: String,
    },
    ConnectionClosed {
        agent_id: String,
    },
    TurnTimeout {
        generation: u64,
    },
    DisconnectTimeout {
        agent_id: String,
        generation: u64,
    },
}

/// Cheap, cloneable address of a running match actor.
#[derive(Clone)]
pub struct MatchHandle {
    match_id: String,
    tx: mpsc::Sender<MatchCommand>,
    /// Epoch millis at which the match ended; 0 while active. Read by the
    /// registry sweeper to reap actors after the grace period.
    ended_at_ms: Arc<AtomicU64>,
}

impl MatchHandle {
    pub fn match_id(&self) -> &str {
        &self.match_id
    }

    /// Millis timestamp of match end, if ended.
    pub fn ended_at_ms(&self) -> Option<u64> {
        match self.ended_at_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> MatchCommand,
    ) -> Result<T, MatchGone> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(make(tx)).await.map_err(|_| MatchGone)?;
        rx.await.map_err(|_| MatchGone)
    }

    pub async fn submit_move(
        &self,
        agent_id: &str,
        move_id: &str,
        expected_version: u64,
        mv: Value,
    ) -> Result<MoveReply, MatchGone> {
        let agent_id = agent_id.to_string();
        let move_id = move_id.to_string();
        self.request(move |reply| MatchCommand::SubmitMove {
            agent_id,
            move_id,
            expected_version,
            mv,
            reply,
        })
        .await
    }

    pub async fn get_state(&self) -> Result<StateSnapshot, MatchGone> {
        self.request(|reply| MatchCommand::GetState { reply }).await
    }

    pub async fn subscribe(&self, agent_id: Option<String>) -> Result<Subscription, MatchGone> {
        self.request(move |reply| MatchCommand::Subscribe { agent_id, reply })
            .await
    }

    /// Broadcast an opaque agent thought. Returns false when the agent is
    /// not seated in this match.
    pub async fn publish_thought(
        &self,
        agent_id: &str,
        thought: Value,
    ) -> Result<bool, MatchGone> {
        let agent_id = agent_id.to_string();
        self.request(move |reply| MatchCommand::PublishThought {
            agent_id,
            thought,
            reply,
        })
        .await
    }

    /// Admin finish. Returns true if this call ended the match, false if it
    /// had already ended (idempotent no-op).
    pub async fn finish(&self, reason: &str) -> Result<bool, MatchGone> {
        let reason = reason.to_string();
        self.request(move |reply| MatchCommand::Finish { reason, reply })
            .await
    }

    /// Transports report agent stream attach/detach for disconnect timeouts.
    pub fn connection_opened(&self, agent_id: &str) {
        let _ = self.tx.try_send(MatchCommand::ConnectionOpened {
            agent_id: agent_id.to_string(),
        });
    }

    pub fn connection_closed(&self, agent_id: &str) {
        let _ = self.tx.try_send(MatchCommand::ConnectionClosed {
            agent_id: agent_id.to_string(),
        });
    }
}

struct Subscriber {
    agent_id: Option<String>,
    tx: mpsc::Sender<StreamEvent>,
}

#[derive(Default)]
struct ConnTracker {
    open_count: usize,
    generation: u64,
}

struct MatchActor {
    match_id: String,
    engine: Arc<dyn Engine>,
    db: Arc<Database>,
    cfg: MatchActorConfig,
    seats: [Seat; 2],
    state: Value,
    state_version: u64,
    ended: Option<EndedInfo>,
    idempotency: HashMap<String, MoveReply>,
    subscribers: Vec<Subscriber>,
    turn_timer_generation: u64,
    connections: HashMap<String, ConnTracker>,
    self_tx: mpsc::Sender<MatchCommand>,
    ended_at_ms: Arc<AtomicU64>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Spawn the actor for a match. If engine initialization fails the actor
/// still starts, already ended with reason `init_failed`, so both agents
/// observe a terminal event when they attach.
pub fn spawn(
    match_id: String,
    seed: u64,
    seats: [Seat; 2],
    engine: Arc<dyn Engine>,
    db: Arc<Database>,
    cfg: MatchActorConfig,
) -> MatchHandle {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let ended_at_ms = Arc::new(AtomicU64::new(0));
    let handle = MatchHandle {
        match_id: match_id.clone(),
        tx: tx.clone(),
        ended_at_ms: ended_at_ms.clone(),
    };

    let players = [seats[0].agent_id.clone(), seats[1].agent_id.clone()];
    let init = engine.initial_state(seed, &players);

    let mut actor = MatchActor {
        match_id,
        engine,
        db,
        cfg,
        seats,
        state: Value::Null,
        state_version: 0,
        ended: None,
        idempotency: HashMap::new(),
        subscribers: Vec::new(),
        turn_timer_generation: 0,
        connections: HashMap::new(),
        self_tx: tx,
        ended_at_ms,
    };

    tokio::spawn(async move {
        metrics::ACTIVE_MATCHES.inc();
        match init {
            Ok(state) => {
                actor.state = state;
                actor.log_event(
                    "match_started",
                    &json!({
                        "players": [
                            actor.seats[0].agent_id.clone(),
                            actor.seats[1].agent_id.clone(),
                        ],
                        "seed": seed,
                    }),
                )
                .await;
                actor.arm_turn_timer();
            }
            Err(e) => {
                tracing::error!(
                    "Engine init failed for match {}: {}",
                    actor.match_id,
                    e.reason
                );
                actor.end_match(None, "init_failed").await;
            }
        }
        actor.run(rx).await;
        metrics::ACTIVE_MATCHES.dec();
    });

    handle
}

impl MatchActor {
    async fn run(mut self, mut rx: mpsc::Receiver<MatchCommand>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                MatchCommand::SubmitMove {
                    agent_id,
                    move_id,
                    expected_version,
                    mv,
                    reply,
                } => {
                    let outcome = self
                        .handle_submit_move(&agent_id, &move_id, expected_version, mv)
                        .await;
                    let _ = reply.send(outcome);
                }
                MatchCommand::GetState { reply } => {
                    let _ = reply.send(self.snapshot());
                }
                MatchCommand::Subscribe { agent_id, reply } => {
                    let _ = reply.send(self.handle_subscribe(agent_id));
                }
                MatchCommand::PublishThought {
                    agent_id,
                    thought,
                    reply,
                } => {
                    let seated = self.seat_of(&agent_id).is_some();
                    if seated {
                        let ev = StreamEvent::AgentThought {
                            event_version: EVENT_VERSION,
                            match_id: self.match_id.clone(),
                            agent_id,
                            thought,
                        };
                        self.broadcast(ev);
                    }
                    let _ = reply.send(seated);
                }
                MatchCommand::Finish { reason, reply } => {
                    let ended_now = if self.ended.is_some() {
                        false
                    } else {
                        let label = if reason.is_empty() {
                            "admin_finish".to_string()
                        } else {
                            format!("admin_finish_{reason}")
                        };
                        self.end_match(None, &label).await;
                        true
                    };
                    let _ = reply.send(ended_now);
                }
                MatchCommand::ConnectionOpened { agent_id } => {
                    let tracker = self.connections.entry(agent_id).or_default();
                    tracker.open_count += 1;
                    tracker.generation += 1;
                }
                MatchCommand::ConnectionClosed { agent_id } => {
                    self.handle_connection_closed(agent_id);
                }
                MatchCommand::TurnTimeout { generation } => {
                    self.handle_turn_timeout(generation).await;
                }
                MatchCommand::DisconnectTimeout {
                    agent_id,
                    generation,
                } => {
                    self.handle_disconnect_timeout(agent_id, generation).await;
                }
            }
        }
    }

    fn seat_of(&self, agent_id: &str) -> Option<usize> {
        self.seats.iter().position(|s| s.agent_id == agent_id)
    }

    fn other_agent(&self, agent_id: &str) -> String {
        if self.seats[0].agent_id == agent_id {
            self.seats[1].agent_id.clone()
        } else {
            self.seats[0].agent_id.clone()
        }
    }

    fn active_agent(&self) -> Option<String> {
        if self.ended.is_some() {
            return None;
        }
        self.engine.current_player(&self.state)
    }

    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            match_id: self.match_id.clone(),
            state: self.state.clone(),
            state_version: self.state_version,
            turn: self.engine.turn(&self.state),
            active_agent_id: self.active_agent(),
            terminal: self.ended.clone(),
        }
    }

    // ── Move submission ───────────────────────────────────────────────

    async fn handle_submit_move(
        &mut self,
        agent_id: &str,
        move_id: &str,
        expected_version: u64,
        mv: Value,
    ) -> MoveReply {
        // 1. Idempotency: a known moveId replays its stored response.
        if let Some(cached) = self.idempotency.get(move_id) {
            return cached.clone();
        }

        // Not a seat in this match: rejected without entering the
        // idempotency table (the key space belongs to participants).
        if self.seat_of(agent_id).is_none() {
            metrics::MOVES_REJECTED_TOTAL
                .with_label_values(&["unauthorized"])
                .inc();
            return MoveReply {
                status: 403,
                body: json!({
                    "ok": false,
                    "error": "agent is not a participant in this match",
                    "code": "unauthorized",
                }),
            };
        }

        let reply = self.evaluate_move(agent_id, move_id, expected_version, mv).await;

        // 7. Cache the outcome before returning so retries are absorbed.
        self.idempotency.insert(move_id.to_string(), reply.clone());
        reply
    }

    async fn evaluate_move(
        &mut self,
        agent_id: &str,
        move_id: &str,
        expected_version: u64,
        mv: Value,
    ) -> MoveReply {
        // 2. Terminal check.
        if self.ended.is_some() {
            return self.reject(409, "terminal", "match has ended", None);
        }

        // 3. Turn discipline.
        let active = self.active_agent();
        if active.as_deref() != Some(agent_id) {
            return self.reject(
                403,
                "not_your_turn",
                "it is not this agent's turn",
                Some(json!({"current": active})),
            );
        }

        // 4. Optimistic concurrency.
        if expected_version != self.state_version {
            return self.reject(
                409,
                "version_mismatch",
                "expectedVersion does not match the current state version",
                Some(json!({"stateVersion": self.state_version})),
            );
        }

        // 5. Structural validation.
        let action = match MoveAction::from_value(&mv) {
            Ok(a) => a,
            Err(e) => {
                return self.reject(
                    400,
                    "invalid_move_schema",
                    &format!("unrecognized move: {e}"),
                    None,
                );
            }
        };

        // 6. Engine application.
        let update = match self.engine.apply(&self.state, &action) {
            Ok(u) => u,
            Err(e) => {
                return self.reject(
                    400,
                    "illegal_move",
                    &e.reason,
                    Some(json!({"reason": e.reason})),
                );
            }
        };

        let previous_active = active;
        self.state = update.state;
        self.state_version += 1;
        metrics::MOVES_APPLIED_TOTAL.inc();

        // 6b. Append the move to the durable log (best-effort).
        self.log_event(
            "move_applied",
            &json!({
                "move": mv.clone(),
                "engineEvents": update.events.clone(),
                "agentId": agent_id,
                "moveId": move_id,
                "stateVersion": self.state_version,
            }),
        )
        .await;

        let terminal = self.engine.is_terminal(&self.state);
        let new_active = if terminal.ended {
            None
        } else {
            self.engine.current_player(&self.state)
        };

        // 6d. Re-arm the deadline for the (possibly new) active agent.
        if terminal.ended {
            self.cancel_turn_timer();
        } else {
            self.arm_turn_timer();
        }

        // 6e. Broadcast: state, engine events, then your_turn on rotation.
        self.broadcast(StreamEvent::State {
            event_version: EVENT_VERSION,
            match_id: self.match_id.clone(),
            state: self.snapshot().to_value(),
        });
        self.broadcast(StreamEvent::EngineEvents {
            event_version: EVENT_VERSION,
            match_id: self.match_id.clone(),
            state_version: self.state_version,
            agent_id: agent_id.to_string(),
            move_id: move_id.to_string(),
            mv,
            engine_events: update.events,
            ts: chrono::Utc::now().to_rfc3339(),
        });
        if let Some(next) = &new_active {
            if previous_active.as_deref() != Some(next.as_str()) {
                self.broadcast(StreamEvent::YourTurn {
                    event_version: EVENT_VERSION,
                    match_id: self.match_id.clone(),
                    state_version: self.state_version,
                });
            }
        }

        // 6f. Terminal transition.
        if terminal.ended {
            self.end_match(terminal.winner.clone(), "terminal").await;
        }

        MoveReply {
            status: 200,
            body: json!({
                "ok": true,
                "matchId": self.match_id,
                "stateVersion": self.state_version,
                "activeAgentId": new_active,
                "state": self.snapshot().to_value(),
            }),
        }
    }

    fn reject(&self, status: u16, code: &str, message: &str, extra: Option<Value>) -> MoveReply {
        metrics::MOVES_REJECTED_TOTAL.with_label_values(&[code]).inc();
        let mut body = json!({
            "ok": false,
            "error": message,
            "code": code,
        });
        if let Some(Value::Object(extra)) = extra {
            if let Value::Object(map) = &mut body {
                map.extend(extra);
            }
        }
        MoveReply { status, body }
    }

    // ── Timers ────────────────────────────────────────────────────────

    fn arm_turn_timer(&mut self) {
        self.turn_timer_generation += 1;
        let generation = self.turn_timer_generation;
        let tx = self.self_tx.clone();
        let timeout = Duration::from_millis(self.cfg.turn_timeout_ms);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(MatchCommand::TurnTimeout { generation }).await;
        });
    }

    fn cancel_turn_timer(&mut self) {
        // Bumping the generation orphans any sleeping timer task.
        self.turn_timer_generation += 1;
    }

    async fn handle_turn_timeout(&mut self, generation: u64) {
        if generation != self.turn_timer_generation || self.ended.is_some() {
            return;
        }
        let Some(active) = self.active_agent() else {
            return;
        };
        let winner = self.other_agent(&active);
        tracing::info!(
            "Match {}: agent {} exceeded the turn deadline",
            self.match_id,
            active
        );
        self.end_match(Some(winner), "turn_timeout").await;
    }

    fn handle_connection_closed(&mut self, agent_id: String) {
        if self.seat_of(&agent_id).is_none() {
            return;
        }
        let grace = Duration::from_millis(self.cfg.disconnect_grace_ms);
        let tracker = self.connections.entry(agent_id.clone()).or_default();
        tracker.open_count = tracker.open_count.saturating_sub(1);
        if tracker.open_count > 0 || self.ended.is_some() {
            return;
        }
        tracker.generation += 1;
        let generation = tracker.generation;
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = tx
                .send(MatchCommand::DisconnectTimeout {
                    agent_id,
                    generation,
                })
                .await;
        });
    }

    async fn handle_disconnect_timeout(&mut self, agent_id: String, generation: u64) {
        if self.ended.is_some() {
            return;
        }
        let Some(tracker) = self.connections.get(&agent_id) else {
            return;
        };
        if tracker.generation != generation || tracker.open_count > 0 {
            return;
        }
        let winner = self.other_agent(&agent_id);
        tracing::info!(
            "Match {}: agent {} disconnected past the grace period",
            self.match_id,
            agent_id
        );
        self.end_match(Some(winner), "disconnect_timeout").await;
    }

    // ── Fan-out ───────────────────────────────────────────────────────

    fn handle_subscribe(&mut self, agent_id: Option<String>) -> Subscription {
        let (tx, rx) = mpsc::channel(self.cfg.subscriber_backlog_max.max(2));

        // The stream opens with an immediate snapshot; a fresh channel
        // always has room for it.
        let _ = tx.try_send(StreamEvent::State {
            event_version: EVENT_VERSION,
            match_id: self.match_id.clone(),
            state: self.snapshot().to_value(),
        });

        if let Some(ended) = &self.ended {
            // Ended match: deliver the terminal event and close immediately.
            let _ = tx.try_send(StreamEvent::GameEnded {
                event_version: EVENT_VERSION,
                match_id: self.match_id.clone(),
                winner: ended.winner.clone(),
                reason: ended.reason.clone(),
                final_state_version: ended.final_state_version,
            });
            return Subscription { rx };
        }

        // An agent whose turn it already is hears about it on attach.
        if let (Some(sub_agent), Some(active)) = (&agent_id, self.active_agent()) {
            if *sub_agent == active {
                let _ = tx.try_send(StreamEvent::YourTurn {
                    event_version: EVENT_VERSION,
                    match_id: self.match_id.clone(),
                    state_version: self.state_version,
                });
            }
        }

        metrics::CONNECTED_SUBSCRIBERS.inc();
        self.subscribers.push(Subscriber { agent_id, tx });
        Subscription { rx }
    }

    /// Deliver an event to every eligible subscriber in order. `your_turn`
    /// goes only to subscriptions authenticated as the current active agent;
    /// spectators never see it. A subscriber whose queue is full is dropped.
    fn broadcast(&mut self, event: StreamEvent) {
        let active = self.active_agent();
        let match_id = self.match_id.clone();
        let mut subscribers = std::mem::take(&mut self.subscribers);
        subscribers.retain(|sub| {
            if let StreamEvent::YourTurn { .. } = &event {
                match (&sub.agent_id, &active) {
                    (Some(sub_agent), Some(active)) if sub_agent == active => {}
                    _ => return true, // not the target; keep without delivering
                }
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("Match {match_id}: dropping subscriber that fell behind");
                    metrics::SUBSCRIBERS_DROPPED_TOTAL.inc();
                    metrics::CONNECTED_SUBSCRIBERS.dec();
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    metrics::CONNECTED_SUBSCRIBERS.dec();
                    false
                }
            }
        });
        self.subscribers = subscribers;
    }

    // ── Termination ───────────────────────────────────────────────────

    async fn end_match(&mut self, winner: Option<String>, reason: &str) {
        if self.ended.is_some() {
            return;
        }
        self.cancel_turn_timer();

        let loser = winner.as_ref().map(|w| self.other_agent(w));
        let ended = EndedInfo {
            winner: winner.clone(),
            reason: reason.to_string(),
            final_state_version: self.state_version,
        };

        let outcome_for = |agent: &str| -> Outcome {
            match &winner {
                Some(w) if w == agent => Outcome::Win,
                Some(_) => Outcome::Loss,
                None => Outcome::Draw,
            }
        };
        let (r0, r1) = (self.seats[0].starting_rating, self.seats[1].starting_rating);
        let outcome0 = outcome_for(&self.seats[0].agent_id);
        let (new_r0, new_r1) = elo::rate_pair(r0, r1, outcome0, self.cfg.elo_k_factor);
        let updates = vec![
            PlayerRatingUpdate {
                agent_id: self.seats[0].agent_id.clone(),
                new_rating: new_r0,
                outcome: outcome0,
            },
            PlayerRatingUpdate {
                agent_id: self.seats[1].agent_id.clone(),
                new_rating: new_r1,
                outcome: outcome0.reverse(),
            },
        ];

        // Critical write: bounded retry, then end in memory regardless.
        let mut recorded = false;
        for attempt in 1..=RESULT_WRITE_ATTEMPTS {
            match self
                .db
                .record_match_result(
                    &self.match_id,
                    winner.as_deref(),
                    loser.as_deref(),
                    reason,
                    self.state_version as i64,
                    &updates,
                )
                .await
            {
                Ok(_) => {
                    recorded = true;
                    break;
                }
                Err(e) => {
                    metrics::RESULT_WRITE_RETRIES_TOTAL.inc();
                    tracing::error!(
                        "Match {}: result write attempt {attempt} failed: {e}",
                        self.match_id
                    );
                    if attempt < RESULT_WRITE_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(
                            RESULT_WRITE_BACKOFF_MS * attempt as u64,
                        ))
                        .await;
                    }
                }
            }
        }
        if !recorded {
            tracing::error!(
                "Match {}: result write exhausted retries; match ends in memory only",
                self.match_id
            );
        }

        self.log_event(
            "game_ended",
            &json!({
                "winner": winner,
                "reason": reason,
                "finalStateVersion": self.state_version,
            }),
        )
        .await;

        self.ended = Some(ended.clone());
        self.ended_at_ms.store(now_ms(), Ordering::Relaxed);
        metrics::MATCHES_ENDED_TOTAL
            .with_label_values(&[base_reason(reason)])
            .inc();

        self.broadcast(StreamEvent::GameEnded {
            event_version: EVENT_VERSION,
            match_id: self.match_id.clone(),
            winner: ended.winner,
            reason: ended.reason,
            final_state_version: ended.final_state_version,
        });

        // Closing the channels ends every live stream after the queued
        // events (including game_ended) drain.
        let closed = self.subscribers.len();
        self.subscribers.clear();
        for _ in 0..closed {
            metrics::CONNECTED_SUBSCRIBERS.dec();
        }
    }

    // ── Event log ─────────────────────────────────────────────────────

    /// Append to the durable log; failures are logged and swallowed.
    async fn log_event(&self, event_type: &str, payload: &Value) {
        let turn = self.engine.turn(&self.state) as i64;
        if let Err(e) = self
            .db
            .append_event(&self.match_id, turn, event_type, payload)
            .await
        {
            metrics::EVENT_APPEND_FAILURES_TOTAL.inc();
            tracing::error!(
                "Match {}: failed to append {event_type} event: {e}",
                self.match_id
            );
        }
    }
}

/// Metric label for a termination reason: admin finishes collapse to one
/// label regardless of the free-form suffix.
fn base_reason(reason: &str) -> &str {
    if reason.starts_with("admin_finish") {
        "admin_finish"
    } else {
        reason
    }
}
