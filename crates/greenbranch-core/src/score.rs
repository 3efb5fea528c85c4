//! Run scoring.

use crate::domain::ScoreBreakdown;

const BASE_SCORE: u32 = 100;
const SPEED_BONUS: u32 = 10;
const SPEED_LIMIT_SECS: f64 = 300.0;
const FREE_COMMITS: u32 = 20;
const PENALTY_PER_COMMIT: u32 = 2;

/// Score a run from its commit count and wall-clock duration.
///
/// Base 100, +10 when finished under five minutes, -2 for every commit
/// beyond 20, never below zero.
pub fn calculate_score(total_commits: u32, elapsed_seconds: f64) -> ScoreBreakdown {
    let speed_bonus = if elapsed_seconds < SPEED_LIMIT_SECS {
        SPEED_BONUS
    } else {
        0
    };
    let efficiency_penalty = total_commits.saturating_sub(FREE_COMMITS) * PENALTY_PER_COMMIT;
    let final_score = (BASE_SCORE + speed_bonus).saturating_sub(efficiency_penalty);

    ScoreBreakdown {
        base_score: BASE_SCORE,
        speed_bonus,
        efficiency_penalty,
        total_commits,
        final_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_small_run_gets_bonus() {
        let s = calculate_score(3, 42.0);
        assert_eq!(s.speed_bonus, 10);
        assert_eq!(s.efficiency_penalty, 0);
        assert_eq!(s.final_score, 110);
    }

    #[test]
    fn slow_run_with_many_commits_is_penalised() {
        let s = calculate_score(25, 300.0);
        assert_eq!(s.speed_bonus, 0);
        assert_eq!(s.efficiency_penalty, 10);
        assert_eq!(s.final_score, 90);
    }

    #[test]
    fn score_never_goes_negative() {
        assert_eq!(calculate_score(500, 1000.0).final_score, 0);
    }
}
