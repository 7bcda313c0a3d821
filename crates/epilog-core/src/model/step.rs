use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One recorded action within an episode.
///
/// `step_index` is unique within the owning episode. Gaps are permitted
/// (dropped or late events); ordering is by index, never by timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub episode_id: Uuid,
    pub step_index: i64,
    pub step_type: StepType,
    pub model: Option<String>,
    pub tool_name: Option<String>,
    pub tokens: Option<i64>,
    pub payload: serde_json::Value,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    LlmCall,
    ToolCall,
    Decision,
    Observation,
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepType::LlmCall => write!(f, "llm_call"),
            StepType::ToolCall => write!(f, "tool_call"),
            StepType::Decision => write!(f, "decision"),
            StepType::Observation => write!(f, "observation"),
        }
    }
}

impl std::str::FromStr for StepType {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "llm_call" => Ok(StepType::LlmCall),
            "tool_call" => Ok(StepType::ToolCall),
            "decision" => Ok(StepType::Decision),
            "observation" => Ok(StepType::Observation),
            _ => Err(crate::error::Error::Validation(format!(
                "invalid step type: {s}"
            ))),
        }
    }
}
