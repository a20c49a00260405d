// Skirmish: the default deterministic lane-war engine.
//
// Two players fight across three lanes. Each turn grants two actions;
// recruiting, moving, attacking, fortifying and upgrading spend them.
// A player wins by reducing the opponent's base to zero, or by holding
// more base HP when the turn limit is reached.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Engine, EngineError, EngineUpdate, MoveAction, TerminalStatus};

pub const LANES: usize = 3;
pub const ACTIONS_PER_TURN: u32 = 2;
pub const STARTING_BASE_HP: i32 = 30;
pub const RECRUIT_COST: i32 = 3;
pub const FORTIFY_COST: i32 = 2;
pub const UPGRADE_COST: i32 = 5;
pub const MAX_FORT: u32 = 3;
pub const MAX_UPGRADE: u32 = 2;
pub const TURN_LIMIT: u64 = 40;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct PlayerState {
    base_hp: i32,
    gold: i32,
    units: [u32; LANES],
    forts: [u32; LANES],
    upgrade: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct SkirmishState {
    seed: u64,
    agents: [String; 2],
    active: usize,
    turn: u64,
    actions_remaining: u32,
    players: [PlayerState; 2],
}

impl SkirmishState {
    fn parse(value: &Value) -> Result<SkirmishState, EngineError> {
        serde_json::from_value(value.clone())
            .map_err(|e| EngineError::new(format!("unreadable state: {e}")))
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("skirmish state serializes")
    }

    fn active_player(&self) -> &PlayerState {
        &self.players[self.active]
    }

    fn income(&self) -> i32 {
        let occupied = self.players[self.active]
            .units
            .iter()
            .filter(|&&u| u > 0)
            .count() as i32;
        2 + occupied
    }
}

/// The default engine implementation.
#[derive(Debug, Default, Clone)]
pub struct SkirmishEngine;

impl SkirmishEngine {
    pub fn new() -> Self {
        SkirmishEngine
    }

    fn terminal_of(state: &SkirmishState) -> TerminalStatus {
        let hp0 = state.players[0].base_hp;
        let hp1 = state.players[1].base_hp;
        if hp0 <= 0 || hp1 <= 0 {
            let winner = if hp0 <= 0 && hp1 <= 0 {
                None
            } else if hp0 <= 0 {
                Some(state.agents[1].clone())
            } else {
                Some(state.agents[0].clone())
            };
            return TerminalStatus {
                ended: true,
                winner,
                reason: Some("elimination".into()),
            };
        }
        if state.turn >= TURN_LIMIT {
            let winner = match hp0.cmp(&hp1) {
                std::cmp::Ordering::Greater => Some(state.agents[0].clone()),
                std::cmp::Ordering::Less => Some(state.agents[1].clone()),
                std::cmp::Ordering::Equal => None,
            };
            return TerminalStatus {
                ended: true,
                winner,
                reason: Some("turn_limit".into()),
            };
        }
        TerminalStatus::active()
    }

    fn check_lane(lane: u8) -> Result<usize, EngineError> {
        let lane = lane as usize;
        if lane >= LANES {
            return Err(EngineError::new(format!(
                "lane {lane} out of range (0..{LANES})"
            )));
        }
        Ok(lane)
    }
}

impl Engine for SkirmishEngine {
    fn initial_state(&self, seed: u64, players: &[String; 2]) -> Result<Value, EngineError> {
        if players[0] == players[1] {
            return Err(EngineError::new("players must be distinct"));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let make_player = |rng: &mut StdRng| PlayerState {
            base_hp: STARTING_BASE_HP,
            gold: rng.gen_range(10..=14),
            units: [1, 0, 1],
            forts: [0; LANES],
            upgrade: 0,
        };
        let state = SkirmishState {
            seed,
            agents: [players[0].clone(), players[1].clone()],
            active: 0,
            turn: 0,
            actions_remaining: ACTIONS_PER_TURN,
            players: [make_player(&mut rng), make_player(&mut rng)],
        };
        Ok(state.to_value())
    }

    fn legal_moves(&self, state: &Value) -> Vec<MoveAction> {
        let Ok(s) = SkirmishState::parse(state) else {
            return vec![];
        };
        if Self::terminal_of(&s).ended {
            return vec![];
        }
        let mut moves = vec![MoveAction::EndTurn {}];
        if s.actions_remaining == 0 {
            return moves;
        }
        moves.push(MoveAction::Pass {});
        let p = s.active_player();
        if p.gold >= RECRUIT_COST {
            for lane in 0..LANES as u8 {
                moves.push(MoveAction::Recruit { lane });
            }
        }
        if p.gold >= UPGRADE_COST && p.upgrade < MAX_UPGRADE {
            moves.push(MoveAction::Upgrade {});
        }
        for lane in 0..LANES {
            if p.gold >= FORTIFY_COST && p.forts[lane] < MAX_FORT {
                moves.push(MoveAction::Fortify { lane: lane as u8 });
            }
            if p.units[lane] > 0 {
                moves.push(MoveAction::Attack { lane: lane as u8 });
                for to in 0..LANES {
                    if to != lane {
                        moves.push(MoveAction::Move {
                            from: lane as u8,
                            to: to as u8,
                        });
                    }
                }
            }
        }
        moves
    }

    fn apply(&self, state: &Value, mv: &MoveAction) -> Result<EngineUpdate, EngineError> {
        let mut s = SkirmishState::parse(state)?;
        if Self::terminal_of(&s).ended {
            return Err(EngineError::new("game is over"));
        }
        let me = s.active;
        let them = 1 - me;
        let mut events: Vec<Value> = Vec::new();

        let ends_turn = matches!(mv, MoveAction::EndTurn {});
        if !ends_turn && s.actions_remaining == 0 {
            return Err(EngineError::new("no actions remaining, end_turn required"));
        }

        match mv {
            MoveAction::EndTurn {} => {
                s.active = them;
                s.turn += 1;
                s.actions_remaining = ACTIONS_PER_TURN;
                let income = s.income();
                s.players[s.active].gold += income;
                events.push(json!({
                    "type": "turn_started",
                    "agent": s.agents[s.active],
                    "turn": s.turn,
                    "income": income,
                }));
            }
            MoveAction::Pass {} => {
                s.actions_remaining -= 1;
                events.push(json!({"type": "passed", "agent": s.agents[me]}));
            }
            MoveAction::Recruit { lane } => {
                let lane = Self::check_lane(*lane)?;
                if s.players[me].gold < RECRUIT_COST {
                    return Err(EngineError::new("not enough gold to recruit"));
                }
                s.players[me].gold -= RECRUIT_COST;
                s.players[me].units[lane] += 1;
                s.actions_remaining -= 1;
                events.push(json!({
                    "type": "unit_recruited",
                    "lane": lane,
                    "units": s.players[me].units[lane],
                }));
            }
            MoveAction::Move { from, to } => {
                let from = Self::check_lane(*from)?;
                let to = Self::check_lane(*to)?;
                if from == to {
                    return Err(EngineError::new("move must change lanes"));
                }
                if s.players[me].units[from] == 0 {
                    return Err(EngineError::new("no unit in source lane"));
                }
                s.players[me].units[from] -= 1;
                s.players[me].units[to] += 1;
                s.actions_remaining -= 1;
                events.push(json!({"type": "unit_moved", "from": from, "to": to}));
            }
            MoveAction::Fortify { lane } => {
                let lane = Self::check_lane(*lane)?;
                if s.players[me].gold < FORTIFY_COST {
                    return Err(EngineError::new("not enough gold to fortify"));
                }
                if s.players[me].forts[lane] >= MAX_FORT {
                    return Err(EngineError::new("lane fully fortified"));
                }
                s.players[me].gold -= FORTIFY_COST;
                s.players[me].forts[lane] += 1;
                s.actions_remaining -= 1;
                events.push(json!({
                    "type": "lane_fortified",
                    "lane": lane,
                    "fort": s.players[me].forts[lane],
                }));
            }
            MoveAction::Upgrade {} => {
                if s.players[me].gold < UPGRADE_COST {
                    return Err(EngineError::new("not enough gold to upgrade"));
                }
                if s.players[me].upgrade >= MAX_UPGRADE {
                    return Err(EngineError::new("already fully upgraded"));
                }
                s.players[me].gold -= UPGRADE_COST;
                s.players[me].upgrade += 1;
                s.actions_remaining -= 1;
                events.push(json!({
                    "type": "upgraded",
                    "level": s.players[me].upgrade,
                }));
            }
            MoveAction::Attack { lane } => {
                let lane = Self::check_lane(*lane)?;
                let attackers = s.players[me].units[lane];
                if attackers == 0 {
                    return Err(EngineError::new("no unit in attacking lane"));
                }
                let raw = attackers * (1 + s.players[me].upgrade);
                let blocked = s.players[them].forts[lane].min(raw);
                let mut damage = raw - blocked;
                let defenders = s.players[them].units[lane];
                let killed = defenders.min(damage);
                s.players[them].units[lane] -= killed;
                damage -= killed;
                s.players[them].base_hp -= damage as i32;
                s.actions_remaining -= 1;
                events.push(json!({
                    "type": "attack_resolved",
                    "lane": lane,
                    "attackers": attackers,
                    "blocked": blocked,
                    "defenders_lost": killed,
                    "base_damage": damage,
                }));
                let terminal = Self::terminal_of(&s);
                if terminal.ended {
                    events.push(json!({
                        "type": "base_destroyed",
                        "agent": s.agents[them],
                    }));
                }
            }
        }

        Ok(EngineUpdate {
            state: s.to_value(),
            events,
        })
    }

    fn is_terminal(&self, state: &Value) -> TerminalStatus {
        match SkirmishState::parse(state) {
            Ok(s) => Self::terminal_of(&s),
            Err(_) => TerminalStatus::active(),
        }
    }

    fn current_player(&self, state: &Value) -> Option<String> {
        let s = SkirmishState::parse(state).ok()?;
        if Self::terminal_of(&s).ended {
            return None;
        }
        Some(s.agents[s.active].clone())
    }

    fn turn(&self, state: &Value) -> u64 {
        SkirmishState::parse(state).map(|s| s.turn).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn players() -> [String; 2] {
        ["ag_alpha".to_string(), "ag_beta".to_string()]
    }

    #[test]
    fn test_initial_state_deterministic() {
        let engine = SkirmishEngine::new();
        let a = engine.initial_state(42, &players()).unwrap();
        let b = engine.initial_state(42, &players()).unwrap();
        assert_eq!(a, b);
        let c = engine.initial_state(43, &players()).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_initial_state_rejects_duplicate_players() {
        let engine = SkirmishEngine::new();
        let dup = ["ag_x".to_string(), "ag_x".to_string()];
        assert!(engine.initial_state(1, &dup).is_err());
    }

    #[test]
    fn test_first_player_is_active() {
        let engine = SkirmishEngine::new();
        let state = engine.initial_state(7, &players()).unwrap();
        assert_eq!(engine.current_player(&state).as_deref(), Some("ag_alpha"));
        assert_eq!(engine.turn(&state), 0);
        assert!(!engine.is_terminal(&state).ended);
    }

    #[test]
    fn test_end_turn_rotates_and_pays_income() {
        let engine = SkirmishEngine::new();
        let state = engine.initial_state(7, &players()).unwrap();
        let update = engine.apply(&state, &MoveAction::EndTurn {}).unwrap();
        assert_eq!(
            engine.current_player(&update.state).as_deref(),
            Some("ag_beta")
        );
        assert_eq!(engine.turn(&update.state), 1);
        assert_eq!(update.events[0]["type"], "turn_started");
        assert!(update.events[0]["income"].as_i64().unwrap() >= 2);
    }

    #[test]
    fn test_actions_are_limited() {
        let engine = SkirmishEngine::new();
        let state = engine.initial_state(7, &players()).unwrap();
        let s1 = engine.apply(&state, &MoveAction::Pass {}).unwrap().state;
        let s2 = engine.apply(&s1, &MoveAction::Pass {}).unwrap().state;
        // Two actions spent; only end_turn remains legal.
        assert!(engine.apply(&s2, &MoveAction::Pass {}).is_err());
        assert_eq!(engine.legal_moves(&s2), vec![MoveAction::EndTurn {}]);
        assert!(engine.apply(&s2, &MoveAction::EndTurn {}).is_ok());
    }

    #[test]
    fn test_recruit_spends_gold() {
        let engine = SkirmishEngine::new();
        let state = engine.initial_state(7, &players()).unwrap();
        let gold_before = state["players"][0]["gold"].as_i64().unwrap();
        let update = engine
            .apply(&state, &MoveAction::Recruit { lane: 1 })
            .unwrap();
        let gold_after = update.state["players"][0]["gold"].as_i64().unwrap();
        assert_eq!(gold_before - gold_after, RECRUIT_COST as i64);
        assert_eq!(update.state["players"][0]["units"][1], 1);
    }

    #[test]
    fn test_attack_damages_base_through_empty_lane() {
        let engine = SkirmishEngine::new();
        let state = engine.initial_state(7, &players()).unwrap();
        // Lane 0 starts with 1 unit on both sides; lane 1 is empty for both.
        // Move our lane-2 unit to lane 1, then attack the undefended lane.
        let s = engine
            .apply(&state, &MoveAction::Move { from: 2, to: 1 })
            .unwrap()
            .state;
        let update = engine.apply(&s, &MoveAction::Attack { lane: 1 }).unwrap();
        let hp = update.state["players"][1]["base_hp"].as_i64().unwrap();
        assert_eq!(hp, (STARTING_BASE_HP - 1) as i64);
        assert_eq!(update.events[0]["type"], "attack_resolved");
        assert_eq!(update.events[0]["base_damage"], 1);
    }

    #[test]
    fn test_attack_kills_defenders_first() {
        let engine = SkirmishEngine::new();
        let state = engine.initial_state(7, &players()).unwrap();
        // Lane 0 has one defender; a single attacker kills it, no base damage.
        let update = engine.apply(&state, &MoveAction::Attack { lane: 0 }).unwrap();
        assert_eq!(update.state["players"][1]["units"][0], 0);
        assert_eq!(
            update.state["players"][1]["base_hp"],
            STARTING_BASE_HP as i64
        );
        assert_eq!(update.events[0]["defenders_lost"], 1);
    }

    #[test]
    fn test_illegal_move_leaves_state_untouched() {
        let engine = SkirmishEngine::new();
        let state = engine.initial_state(7, &players()).unwrap();
        let err = engine
            .apply(&state, &MoveAction::Move { from: 1, to: 1 })
            .unwrap_err();
        assert!(err.reason.contains("change lanes"));
    }

    #[test]
    fn test_turn_limit_ends_game() {
        let engine = SkirmishEngine::new();
        let mut state = engine.initial_state(7, &players()).unwrap();
        for _ in 0..TURN_LIMIT {
            state = engine.apply(&state, &MoveAction::EndTurn {}).unwrap().state;
        }
        let terminal = engine.is_terminal(&state);
        assert!(terminal.ended);
        assert_eq!(terminal.reason.as_deref(), Some("turn_limit"));
        assert!(engine.current_player(&state).is_none());
        assert!(engine.legal_moves(&state).is_empty());
        assert!(engine.apply(&state, &MoveAction::EndTurn {}).is_err());
    }

    #[test]
    fn test_determinism_over_move_sequence() {
        let engine = SkirmishEngine::new();
        let moves = [
            MoveAction::Recruit { lane: 0 },
            MoveAction::Attack { lane: 0 },
            MoveAction::EndTurn {},
            MoveAction::Fortify { lane: 0 },
            MoveAction::EndTurn {},
        ];
        let run = || {
            let mut state = engine.initial_state(99, &players()).unwrap();
            for mv in &moves {
                state = engine.apply(&state, mv).unwrap().state;
            }
            state
        };
        assert_eq!(run(), run());
    }
}
