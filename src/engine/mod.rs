// Engine seam: the match actor drives a deterministic game through this
// trait and never inspects state beyond it. State values are opaque JSON;
// they are broadcast to subscribers and persisted verbatim.

pub mod skirmish;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of a successful engine application: the successor state and the
/// engine events produced by the transition, forwarded verbatim to
/// subscribers and the event log.
#[derive(Debug, Clone)]
pub struct EngineUpdate {
    pub state: Value,
    pub events: Vec<Value>,
}

/// Terminal query result.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalStatus {
    pub ended: bool,
    pub winner: Option<String>,
    pub reason: Option<String>,
}

impl TerminalStatus {
    pub fn active() -> Self {
        TerminalStatus {
            ended: false,
            winner: None,
            reason: None,
        }
    }
}

/// Rejection reason from the engine for an illegal move.
#[derive(Debug, Clone)]
pub struct EngineError {
    pub reason: String,
}

impl EngineError {
    pub fn new(reason: impl Into<String>) -> Self {
        EngineError {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

/// A deterministic two-player game engine. All functions are pure with
/// respect to the passed state; the actor owns the only mutable copy.
pub trait Engine: Send + Sync + 'static {
    /// Build the initial state for a fresh match.
    fn initial_state(&self, seed: u64, players: &[String; 2]) -> Result<Value, EngineError>;

    /// Moves the active player may legally submit.
    fn legal_moves(&self, state: &Value) -> Vec<MoveAction>;

    /// Apply a structurally-valid move. `Err` means the move is illegal in
    /// this state; the state is unchanged.
    fn apply(&self, state: &Value, mv: &MoveAction) -> Result<EngineUpdate, EngineError>;

    /// Whether the game has ended, and how.
    fn is_terminal(&self, state: &Value) -> TerminalStatus;

    /// The agent whose turn it is. `None` once terminal.
    fn current_player(&self, state: &Value) -> Option<String>;

    /// Current turn number, recorded on event-log rows.
    fn turn(&self, state: &Value) -> u64;
}

/// The known move shapes. Payloads stay opaque to the rest of the core;
/// this enum is the structural validation gate for `submit_move`: the
/// discriminant must be known and every variant field present. Extra
/// fields pass through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MoveAction {
    Move { from: u8, to: u8 },
    Attack { lane: u8 },
    Recruit { lane: u8 },
    Fortify { lane: u8 },
    Upgrade {},
    EndTurn {},
    Pass {},
}

impl MoveAction {
    /// Validate an opaque move payload against the known action variants.
    pub fn from_value(value: &Value) -> Result<MoveAction, String> {
        serde_json::from_value(value.clone()).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_move_action_known_variants() {
        let mv = MoveAction::from_value(&json!({"action": "end_turn"})).unwrap();
        assert_eq!(mv, MoveAction::EndTurn {});

        let mv = MoveAction::from_value(&json!({"action": "move", "from": 0, "to": 2})).unwrap();
        assert_eq!(mv, MoveAction::Move { from: 0, to: 2 });

        let mv = MoveAction::from_value(&json!({"action": "recruit", "lane": 1})).unwrap();
        assert_eq!(mv, MoveAction::Recruit { lane: 1 });
    }

    #[test]
    fn test_move_action_unknown_discriminant() {
        assert!(MoveAction::from_value(&json!({"action": "teleport"})).is_err());
    }

    #[test]
    fn test_move_action_missing_fields() {
        assert!(MoveAction::from_value(&json!({"action": "move", "from": 0})).is_err());
    }

    #[test]
    fn test_move_action_extra_fields_pass_through() {
        let mv = MoveAction::from_value(&json!({"action": "pass", "note": "hi"})).unwrap();
        assert_eq!(mv, MoveAction::Pass {});
    }

    #[test]
    fn test_move_action_round_trip() {
        let v = serde_json::to_value(MoveAction::Attack { lane: 2 }).unwrap();
        assert_eq!(v["action"], "attack");
        assert_eq!(v["lane"], 2);
    }
}
