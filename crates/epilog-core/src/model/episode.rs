use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One complete recorded run of an agent.
///
/// Episodes are append-mostly: after creation only the status may
/// transition (once, to a terminal value) and `ended_at` be set. The core
/// never deletes them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Episode {
    pub id: Uuid,
    pub agent_id: String,
    pub status: EpisodeStatus,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub metadata: serde_json::Value,
}

/// Lightweight listing row; no steps, aggregates computed by storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpisodeSummary {
    pub id: Uuid,
    pub agent_id: String,
    pub status: EpisodeStatus,
    pub step_count: i64,
    pub total_tokens: i64,
    pub started_at: String,
    pub ended_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Running,
    Success,
    Failure,
    Partial,
}

impl EpisodeStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, EpisodeStatus::Running)
    }
}

impl std::fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EpisodeStatus::Running => write!(f, "running"),
            EpisodeStatus::Success => write!(f, "success"),
            EpisodeStatus::Failure => write!(f, "failure"),
            EpisodeStatus::Partial => write!(f, "partial"),
        }
    }
}

impl std::str::FromStr for EpisodeStatus {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(EpisodeStatus::Running),
            "success" => Ok(EpisodeStatus::Success),
            "failure" => Ok(EpisodeStatus::Failure),
            "partial" => Ok(EpisodeStatus::Partial),
            _ => Err(crate::error::Error::Validation(format!(
                "invalid episode status: {s}"
            ))),
        }
    }
}
