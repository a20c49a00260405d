// Wire envelopes shared by the streaming transports and the matchmaker
// event-wait endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version stamp carried by every match stream envelope.
pub const EVENT_VERSION: u8 = 1;

fn event_version() -> u8 {
    EVENT_VERSION
}

/// Events delivered on a match subscription, in order: an initial `state`
/// snapshot, then an interleaving of `state`, `engine_events`, `your_turn`
/// and `agent_thought`, closed by a single `game_ended`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    State {
        #[serde(rename = "eventVersion", default = "event_version")]
        event_version: u8,
        #[serde(rename = "matchId")]
        match_id: String,
        state: Value,
    },
    EngineEvents {
        #[serde(rename = "eventVersion", default = "event_version")]
        event_version: u8,
        #[serde(rename = "matchId")]
        match_id: String,
        #[serde(rename = "stateVersion")]
        state_version: u64,
        #[serde(rename = "agentId")]
        agent_id: String,
        #[serde(rename = "moveId")]
        move_id: String,
        #[serde(rename = "move")]
        mv: Value,
        #[serde(rename = "engineEvents")]
        engine_events: Vec<Value>,
        ts: String,
    },
    YourTurn {
        #[serde(rename = "eventVersion", default = "event_version")]
        event_version: u8,
        #[serde(rename = "matchId")]
        match_id: String,
        #[serde(rename = "stateVersion")]
        state_version: u64,
    },
    AgentThought {
        #[serde(rename = "eventVersion", default = "event_version")]
        event_version: u8,
        #[serde(rename = "matchId")]
        match_id: String,
        #[serde(rename = "agentId")]
        agent_id: String,
        thought: Value,
    },
    GameEnded {
        #[serde(rename = "eventVersion", default = "event_version")]
        event_version: u8,
        #[serde(rename = "matchId")]
        match_id: String,
        winner: Option<String>,
        reason: String,
        #[serde(rename = "finalStateVersion")]
        final_state_version: u64,
    },
}

impl StreamEvent {
    /// Event name used for the SSE `event:` field.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::State { .. } => "state",
            StreamEvent::EngineEvents { .. } => "engine_events",
            StreamEvent::YourTurn { .. } => "your_turn",
            StreamEvent::AgentThought { .. } => "agent_thought",
            StreamEvent::GameEnded { .. } => "game_ended",
        }
    }
}

/// Events buffered per agent by the matchmaker and drained via the
/// event-wait endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MatchmakerEvent {
    MatchFound {
        #[serde(rename = "matchId")]
        match_id: String,
        opponent: String,
    },
    NoEvents,
}
