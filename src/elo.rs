// Elo rating updates applied when a match ends.
//
// Both players are rated from the starting ratings captured in
// match_players at pairing time, with a single configurable K-factor.

use serde::{Deserialize, Serialize};

pub const STARTING_RATING: i64 = 1500;
pub const DEFAULT_K: f64 = 32.0;
pub const RATING_FLOOR: i64 = 100;

/// Match outcome from the perspective of one player.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    Win,
    Draw,
    Loss,
}

impl Outcome {
    pub fn score(self) -> f64 {
        match self {
            Outcome::Win => 1.0,
            Outcome::Draw => 0.5,
            Outcome::Loss => 0.0,
        }
    }

    pub fn reverse(self) -> Outcome {
        match self {
            Outcome::Win => Outcome::Loss,
            Outcome::Draw => Outcome::Draw,
            Outcome::Loss => Outcome::Win,
        }
    }
}

/// Expected score for a player rated `rating_a` against `rating_b`.
pub fn expected_score(rating_a: i64, rating_b: i64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf((rating_b - rating_a) as f64 / 400.0))
}

/// New rating after one match.
pub fn calculate_new_rating(rating: i64, opponent_rating: i64, outcome: Outcome, k: f64) -> i64 {
    let expected = expected_score(rating, opponent_rating);
    let new_rating = rating as f64 + k * (outcome.score() - expected);
    (new_rating.round() as i64).max(RATING_FLOOR)
}

/// Rating deltas for both sides of a match, computed from their starting
/// ratings. Returns `(new_rating_a, new_rating_b)`.
pub fn rate_pair(rating_a: i64, rating_b: i64, outcome_a: Outcome, k: f64) -> (i64, i64) {
    let new_a = calculate_new_rating(rating_a, rating_b, outcome_a, k);
    let new_b = calculate_new_rating(rating_b, rating_a, outcome_a.reverse(), k);
    (new_a, new_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_score_equal_ratings() {
        let e = expected_score(1500, 1500);
        assert!((e - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_expected_score_higher_rated() {
        let e = expected_score(1800, 1500);
        assert!(e > 0.8);
        assert!(e < 1.0);
    }

    #[test]
    fn test_win_equal_ratings() {
        let new = calculate_new_rating(1500, 1500, Outcome::Win, DEFAULT_K);
        assert_eq!(new, 1516); // 1500 + 32 * (1 - 0.5)
    }

    #[test]
    fn test_loss_equal_ratings() {
        let new = calculate_new_rating(1500, 1500, Outcome::Loss, DEFAULT_K);
        assert_eq!(new, 1484);
    }

    #[test]
    fn test_draw_equal_ratings() {
        let new = calculate_new_rating(1500, 1500, Outcome::Draw, DEFAULT_K);
        assert_eq!(new, 1500);
    }

    #[test]
    fn test_rating_floor() {
        let new = calculate_new_rating(110, 2200, Outcome::Loss, DEFAULT_K);
        assert!(new >= RATING_FLOOR);
    }

    #[test]
    fn test_zero_sum() {
        let (a, b) = rate_pair(1500, 1500, Outcome::Win, DEFAULT_K);
        assert_eq!((a - 1500) + (b - 1500), 0);
    }

    #[test]
    fn test_rate_pair_upset() {
        // A lower-rated winner gains more than the equal-ratings case.
        let (a, _) = rate_pair(1300, 1700, Outcome::Win, DEFAULT_K);
        assert!(a - 1300 > 16);
    }

    #[test]
    fn test_configurable_k() {
        let new = calculate_new_rating(1500, 1500, Outcome::Win, 16.0);
        assert_eq!(new, 1508);
    }
}
