//! # Call Domain
//!
//! Records the call lifecycle reads and writes, and the collaborators it
//! talks to once a relay session is over.
//!
//! ## Key Components:
//! - **store**: persistence interface plus an in-memory implementation
//! - **analysis**: post-call scoring service
//! - **achievements**: badge rules evaluated after every scored call
//! - **lifecycle**: the controller that runs one call end to end

pub mod achievements;
pub mod analysis;
pub mod lifecycle;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type CallId = u64;
pub type PersonaId = u64;
pub type ScriptId = u64;
pub type UserId = u64;

/// How hard a persona is to win over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sales pitch the trainee practices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub id: ScriptId,
    pub title: String,
    pub content: String,
}

/// A simulated call recipient.
///
/// `personality` and `objections` are free-form structured data, e.g.
/// `{"traits": ["busy"], "behavior": "..."}`. Records written by older
/// tooling store them as JSON-encoded strings; the prompt builder accepts both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: PersonaId,
    pub script_id: ScriptId,
    pub name: String,
    pub difficulty: Difficulty,
    pub personality: serde_json::Value,
    pub objections: serde_json::Value,
}

/// One practice call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: CallId,
    pub user_id: UserId,
    pub persona_id: PersonaId,
    pub transcript: Option<String>,
    pub duration_secs: Option<u64>,
    pub score: Option<f64>,
    /// Full analysis as a JSON document
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CallRecord {
    /// Analysis was attempted and is still missing.
    pub fn awaiting_analysis(&self) -> bool {
        self.transcript.is_some() && self.feedback.is_none()
    }
}

/// Per-user aggregates, updated once per scored call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: UserId,
    pub total_calls: u32,
    pub avg_score: f64,
}

impl UserStats {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }

    /// Count one more scored call and fold its score into the running average.
    pub fn record_score(&mut self, score: f64) {
        let previous_total = self.avg_score * self.total_calls as f64;
        self.total_calls += 1;
        self.avg_score = (previous_total + score) / self.total_calls as f64;
    }
}

/// Badges a user can unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Achievement {
    #[serde(rename = "first_call")]
    FirstCall,
    #[serde(rename = "perfect_pitch")]
    PerfectPitch,
    #[serde(rename = "10_calls")]
    TenCalls,
    #[serde(rename = "50_calls")]
    FiftyCalls,
    #[serde(rename = "objection_master")]
    ObjectionMaster,
}

impl Achievement {
    pub fn id(&self) -> &'static str {
        match self {
            Achievement::FirstCall => "first_call",
            Achievement::PerfectPitch => "perfect_pitch",
            Achievement::TenCalls => "10_calls",
            Achievement::FiftyCalls => "50_calls",
            Achievement::ObjectionMaster => "objection_master",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementRecord {
    pub user_id: UserId,
    pub achievement: Achievement,
    pub unlocked_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_average() {
        let mut stats = UserStats::new(7);
        stats.record_score(80.0);
        stats.record_score(90.0);
        stats.record_score(100.0);
        assert_eq!(stats.total_calls, 3);
        assert!((stats.avg_score - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_achievement_ids_match_serde() {
        for achievement in [
            Achievement::FirstCall,
            Achievement::PerfectPitch,
            Achievement::TenCalls,
            Achievement::FiftyCalls,
            Achievement::ObjectionMaster,
        ] {
            let json = serde_json::to_string(&achievement).unwrap();
            assert_eq!(json, format!("\"{}\"", achievement.id()));
        }
    }
}
