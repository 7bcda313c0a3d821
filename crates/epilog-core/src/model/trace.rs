use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::episode::EpisodeStatus;
use crate::model::step::StepType;

/// A raw signal from an agent runtime, correlated into episodes by the
/// grouper before it ever reaches ingest.
///
/// Exactly one of `step_type` (a step observation) or `status` (a terminal
/// outcome signal) must be set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceEvent {
    pub correlation_key: String,
    pub agent_id: String,
    pub timestamp: String,
    pub step_type: Option<StepType>,
    pub status: Option<EpisodeStatus>,
    pub model: Option<String>,
    pub tool_name: Option<String>,
    pub tokens: Option<i64>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl TraceEvent {
    pub fn validate(&self) -> Result<()> {
        if self.correlation_key.trim().is_empty() {
            return Err(Error::Validation(
                "correlation_key cannot be empty".to_string(),
            ));
        }
        if self.agent_id.trim().is_empty() {
            return Err(Error::Validation("agent_id cannot be empty".to_string()));
        }
        match (self.step_type, self.status) {
            (Some(_), Some(_)) => Err(Error::Validation(
                "trace event cannot carry both a step_type and a status".to_string(),
            )),
            (None, None) => Err(Error::Validation(
                "trace event must carry a step_type or a status".to_string(),
            )),
            (None, Some(status)) if !status.is_terminal() => Err(Error::Validation(
                "status events must carry a terminal status".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_event(key: &str) -> TraceEvent {
        TraceEvent {
            correlation_key: key.to_string(),
            agent_id: "agent-1".to_string(),
            timestamp: "2025-01-01T00:00:00.000000Z".to_string(),
            step_type: Some(StepType::LlmCall),
            status: None,
            model: Some("gpt-4".to_string()),
            tool_name: None,
            tokens: Some(10),
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn test_valid_step_event() {
        assert!(step_event("k1").validate().is_ok());
    }

    #[test]
    fn test_empty_correlation_key_rejected() {
        assert!(step_event("  ").validate().is_err());
    }

    #[test]
    fn test_both_kinds_rejected() {
        let mut event = step_event("k1");
        event.status = Some(EpisodeStatus::Success);
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_neither_kind_rejected() {
        let mut event = step_event("k1");
        event.step_type = None;
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_running_status_event_rejected() {
        let mut event = step_event("k1");
        event.step_type = None;
        event.status = Some(EpisodeStatus::Running);
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_terminal_status_event_ok() {
        let mut event = step_event("k1");
        event.step_type = None;
        event.status = Some(EpisodeStatus::Failure);
        assert!(event.validate().is_ok());
    }
}
