use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// Free-form key-value bag attached to a score record.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Opaque user identifier handed over by the identity chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Quiz,
    Typing,
    Puzzle,
}

impl ActivityKind {
    pub const ALL: [ActivityKind; 3] = [ActivityKind::Quiz, ActivityKind::Typing, ActivityKind::Puzzle];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Quiz => "quiz",
            ActivityKind::Typing => "typing",
            ActivityKind::Puzzle => "puzzle",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "quiz" => Ok(ActivityKind::Quiz),
            "typing" => Ok(ActivityKind::Typing),
            "puzzle" => Ok(ActivityKind::Puzzle),
            other => Err(EngineError::InvalidActivityOutcome(format!(
                "unknown activity kind '{other}'"
            ))),
        }
    }
}

/// One completed activity attempt. Records are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRecord {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: ActivityKind,
    pub value: f64,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Level {
    Beginner,
    Pro,
    Legend,
    UltraLegend,
}

impl Level {
    /// Lowest to highest.
    pub const ALL: [Level; 4] = [Level::Beginner, Level::Pro, Level::Legend, Level::UltraLegend];

    pub fn label(&self) -> &'static str {
        match self {
            Level::Beginner => "Beginner",
            Level::Pro => "Pro",
            Level::Legend => "Legend",
            Level::UltraLegend => "UltraLegend",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindSummary {
    pub kind: ActivityKind,
    pub count: usize,
    pub average: f64,
    pub best: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelProgress {
    pub level: Level,
    pub unlocked: bool,
    pub percent: u8,
}

/// Read-side projection over a user's full score history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerProgressionSnapshot {
    pub level: Level,
    pub unlocked_levels: Vec<Level>,
    pub per_level_progress: Vec<LevelProgress>,
    pub streak_days: u32,
    pub average_quiz_score: f64,
    pub average_typing_wpm: u32,
    pub puzzles_solved: usize,
    pub total_quizzes: usize,
    pub kind_summaries: Vec<KindSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyProgress {
    pub date: NaiveDate,
    pub quiz_count: usize,
    pub typing_count: usize,
    pub puzzle_count: usize,
}

impl DailyProgress {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            quiz_count: 0,
            typing_count: 0,
            puzzle_count: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.quiz_count + self.typing_count + self.puzzle_count
    }
}
