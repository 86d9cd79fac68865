//! Match lifecycle and kits

pub mod kit;
pub mod r#match;

pub use kit::{Kit, KitRegistry, MatchMode, ModeRules};
pub use r#match::{
    CreateMatchError, EndReport, Match, MatchPhase, MatchRegistry, MatchSettings, MatchSummary,
};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Matchmaking category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueClass {
    Ranked,
    Unranked,
}

impl QueueClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueClass::Ranked => "ranked",
            QueueClass::Unranked => "unranked",
        }
    }
}

impl fmt::Display for QueueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ranked" => Ok(QueueClass::Ranked),
            "unranked" => Ok(QueueClass::Unranked),
            other => Err(format!("unknown queue class '{other}'")),
        }
    }
}

/// Decisive outcome handed to rating/stat listeners
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub match_id: Uuid,
    pub winner: Uuid,
    pub loser: Uuid,
    pub kit: String,
    pub queue_class: QueueClass,
    pub arena: String,
    pub duration_secs: u64,
}
