//! Achievement rules evaluated after every scored call.

use crate::call::{Achievement, Difficulty, UserStats};
use std::collections::HashSet;

/// Score needed for `perfect_pitch`.
pub const PERFECT_PITCH_SCORE: f64 = 90.0;
/// Score on a hard persona needed for `objection_master`.
pub const OBJECTION_MASTER_SCORE: f64 = 85.0;

/// The call that was just scored.
#[derive(Debug, Clone, Copy)]
pub struct ScoredCall {
    pub score: f64,
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AchievementRules;

impl AchievementRules {
    /// Achievements earned by `call`, given stats that already include it.
    ///
    /// Anything in `already_awarded` is never returned again, so evaluating
    /// the same call twice cannot award a badge twice.
    pub fn evaluate(
        &self,
        stats: &UserStats,
        call: ScoredCall,
        already_awarded: &HashSet<Achievement>,
    ) -> Vec<Achievement> {
        let mut earned = Vec::new();

        if stats.total_calls == 1 {
            earned.push(Achievement::FirstCall);
        }
        if call.score >= PERFECT_PITCH_SCORE {
            earned.push(Achievement::PerfectPitch);
        }
        if stats.total_calls == 10 {
            earned.push(Achievement::TenCalls);
        }
        if stats.total_calls == 50 {
            earned.push(Achievement::FiftyCalls);
        }
        if call.difficulty == Difficulty::Hard && call.score >= OBJECTION_MASTER_SCORE {
            earned.push(Achievement::ObjectionMaster);
        }

        earned.retain(|achievement| !already_awarded.contains(achievement));
        earned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(total_calls: u32) -> UserStats {
        UserStats {
            user_id: 1,
            total_calls,
            avg_score: 0.0,
        }
    }

    #[test]
    fn test_first_call_with_high_score() {
        let earned = AchievementRules.evaluate(
            &stats(1),
            ScoredCall { score: 92.0, difficulty: Difficulty::Medium },
            &HashSet::new(),
        );
        assert_eq!(earned, vec![Achievement::FirstCall, Achievement::PerfectPitch]);
    }

    #[test]
    fn test_milestones_are_exact() {
        let call = ScoredCall { score: 40.0, difficulty: Difficulty::Easy };
        assert_eq!(AchievementRules.evaluate(&stats(10), call, &HashSet::new()), vec![Achievement::TenCalls]);
        assert_eq!(AchievementRules.evaluate(&stats(50), call, &HashSet::new()), vec![Achievement::FiftyCalls]);
        assert!(AchievementRules.evaluate(&stats(11), call, &HashSet::new()).is_empty());
    }

    #[test]
    fn test_objection_master_needs_hard_persona() {
        let hard = ScoredCall { score: 86.0, difficulty: Difficulty::Hard };
        let medium = ScoredCall { score: 86.0, difficulty: Difficulty::Medium };
        assert_eq!(
            AchievementRules.evaluate(&stats(3), hard, &HashSet::new()),
            vec![Achievement::ObjectionMaster]
        );
        assert!(AchievementRules.evaluate(&stats(3), medium, &HashSet::new()).is_empty());
    }

    #[test]
    fn test_already_awarded_badges_are_skipped() {
        let awarded: HashSet<_> = [Achievement::PerfectPitch].into_iter().collect();
        let earned = AchievementRules.evaluate(
            &stats(4),
            ScoredCall { score: 97.0, difficulty: Difficulty::Easy },
            &awarded,
        );
        assert!(earned.is_empty());
    }
}
