use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::episode::{Episode, EpisodeStatus};
use crate::model::link::{Link, LinkRelation};
use crate::model::step::{Step, StepType};
use crate::query::{retry_write, with_deadline, LedgerEngine};
use crate::time;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInput {
    pub step_index: i64,
    pub step_type: StepType,
    pub model: Option<String>,
    pub tool_name: Option<String>,
    pub tokens: Option<i64>,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: Option<String>,
}

/// A causal edge from the episode being ingested to an existing one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkInput {
    pub episode_id: Uuid,
    pub relation: LinkRelation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub agent_id: String,
    pub status: Option<EpisodeStatus>,
    pub metadata: Option<serde_json::Value>,
    pub steps: Vec<StepInput>,
    pub links: Option<Vec<LinkInput>>,
}

#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub episode_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendRequest {
    pub episode_id: Uuid,
    pub steps: Vec<StepInput>,
}

#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendResponse {
    pub episode_id: Uuid,
    pub appended: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishRequest {
    pub episode_id: Uuid,
    pub status: EpisodeStatus,
}

/// Reject duplicate (Conflict) and decreasing (Validation) indices.
/// `committed_max` carries the episode's highest already-committed index
/// when appending.
fn validate_indices<I>(indices: I, committed_max: Option<i64>) -> Result<()>
where
    I: IntoIterator<Item = i64>,
{
    let mut prev = committed_max;
    for index in indices {
        if index < 0 {
            return Err(Error::Validation(format!(
                "step_index must be non-negative, got {index}"
            )));
        }
        match prev {
            Some(p) if index == p => {
                return Err(Error::Conflict(format!("duplicate step_index {index}")));
            }
            Some(p) if index < p => {
                return Err(Error::Validation(format!(
                    "step_index {index} is out of order, must exceed {p}"
                )));
            }
            _ => {}
        }
        prev = Some(index);
    }
    Ok(())
}

fn build_steps(episode_id: Uuid, inputs: Vec<StepInput>, default_ts: &str) -> Result<Vec<Step>> {
    let mut steps = Vec::with_capacity(inputs.len());
    for input in inputs {
        let timestamp = match input.timestamp {
            Some(raw) => time::normalize(&raw)?,
            None => default_ts.to_string(),
        };
        steps.push(Step {
            episode_id,
            step_index: input.step_index,
            step_type: input.step_type,
            model: input.model,
            tool_name: input.tool_name,
            tokens: input.tokens,
            payload: input.payload,
            timestamp,
        });
    }
    Ok(steps)
}

pub async fn execute(engine: &LedgerEngine, request: IngestRequest) -> Result<IngestResponse> {
    // Validation happens in order, before any durable mutation.
    if request.agent_id.trim().is_empty() {
        return Err(Error::Validation("agent_id cannot be empty".to_string()));
    }
    validate_indices(request.steps.iter().map(|s| s.step_index), None)?;
    if let Some(ref links) = request.links {
        for link in links {
            if !engine.storage.episode_exists(link.episode_id).await? {
                return Err(Error::NotFound(format!(
                    "link target episode {} not found",
                    link.episode_id
                )));
            }
        }
    }

    let now = time::now();
    let status = request.status.unwrap_or(EpisodeStatus::Running);
    let episode = Episode {
        id: Uuid::now_v7(),
        agent_id: request.agent_id,
        status,
        started_at: now.clone(),
        ended_at: status.is_terminal().then(|| now.clone()),
        metadata: request
            .metadata
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new())),
    };
    let steps = build_steps(episode.id, request.steps, &now)?;

    let (episode_ref, steps_ref) = (&episode, steps.as_slice());
    with_deadline(
        &engine.config,
        "ingest",
        retry_write(&engine.config, move || async move {
            engine
                .storage
                .insert_episode_with_steps(episode_ref, steps_ref)
                .await
        }),
    )
    .await?;

    if let Some(links) = request.links {
        for input in links {
            let link = Link {
                from_episode_id: episode.id,
                to_episode_id: input.episode_id,
                relation: input.relation,
                created_at: now.clone(),
            };
            engine.storage.insert_link(&link).await?;
        }
    }

    Ok(IngestResponse {
        episode_id: episode.id,
    })
}

pub async fn append(engine: &LedgerEngine, request: AppendRequest) -> Result<AppendResponse> {
    if request.steps.is_empty() {
        return Err(Error::Validation("no steps to append".to_string()));
    }

    let lock = engine.locks.acquire(request.episode_id).await;
    let _guard = lock.lock().await;

    let episode = engine
        .storage
        .get_episode(request.episode_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("episode {} not found", request.episode_id)))?;
    if episode.status.is_terminal() {
        return Err(Error::Conflict(format!(
            "cannot append to terminal episode {} ({})",
            episode.id, episode.status
        )));
    }

    let committed_max = engine.storage.max_step_index(request.episode_id).await?;
    validate_indices(request.steps.iter().map(|s| s.step_index), committed_max)?;

    let now = time::now();
    let steps = build_steps(request.episode_id, request.steps, &now)?;

    let (episode_id, steps_ref) = (request.episode_id, steps.as_slice());
    with_deadline(
        &engine.config,
        "append",
        retry_write(&engine.config, move || async move {
            engine.storage.append_steps(episode_id, steps_ref).await
        }),
    )
    .await?;

    Ok(AppendResponse {
        episode_id: request.episode_id,
        appended: steps.len(),
    })
}

pub async fn finish(engine: &LedgerEngine, request: FinishRequest) -> Result<()> {
    if !request.status.is_terminal() {
        return Err(Error::Validation(
            "finish requires a terminal status".to_string(),
        ));
    }

    let lock = engine.locks.acquire(request.episode_id).await;
    let _guard = lock.lock().await;

    let ended_at = time::now();
    let (episode_id, status, ended_at_ref) = (request.episode_id, request.status, ended_at.as_str());
    with_deadline(
        &engine.config,
        "finish",
        retry_write(&engine.config, move || async move {
            engine
                .storage
                .update_status(episode_id, status, ended_at_ref)
                .await
        }),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::storage::duckdb::DuckDbStorage;
    use std::sync::Arc;

    fn create_engine() -> LedgerEngine {
        let storage = Arc::new(DuckDbStorage::open_in_memory().unwrap());
        LedgerEngine::new(storage, LedgerConfig::default())
    }

    fn step(index: i64, step_type: StepType) -> StepInput {
        StepInput {
            step_index: index,
            step_type,
            model: None,
            tool_name: None,
            tokens: Some(100),
            payload: serde_json::json!({}),
            timestamp: None,
        }
    }

    fn request(agent_id: &str, steps: Vec<StepInput>) -> IngestRequest {
        IngestRequest {
            agent_id: agent_id.to_string(),
            status: None,
            metadata: None,
            steps,
            links: None,
        }
    }

    #[tokio::test]
    async fn test_ingest_and_get() {
        let engine = create_engine();
        let mut llm = step(0, StepType::LlmCall);
        llm.model = Some("gpt-4".to_string());
        llm.tokens = Some(150);
        let mut tool = step(1, StepType::ToolCall);
        tool.tool_name = Some("web_search".to_string());
        tool.tokens = Some(200);

        let response = engine
            .ingest(request("a1", vec![llm, tool]))
            .await
            .unwrap();

        let detail = engine.get(response.episode_id).await.unwrap();
        assert_eq!(detail.episode.agent_id, "a1");
        assert_eq!(detail.episode.status, EpisodeStatus::Running);
        assert!(detail.episode.ended_at.is_none());
        assert_eq!(detail.steps.len(), 2);
        assert_eq!(detail.steps[0].step_index, 0);
        assert_eq!(detail.steps[0].model.as_deref(), Some("gpt-4"));
        assert_eq!(detail.steps[1].tool_name.as_deref(), Some("web_search"));
    }

    #[tokio::test]
    async fn test_ingest_empty_agent_id() {
        let engine = create_engine();
        let result = engine.ingest(request("  ", vec![])).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_ingest_duplicate_index_leaves_store_unchanged() {
        let engine = create_engine();
        let result = engine
            .ingest(request(
                "a1",
                vec![step(0, StepType::LlmCall), step(0, StepType::ToolCall)],
            ))
            .await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(engine.episode_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ingest_decreasing_index_rejected() {
        let engine = create_engine();
        let result = engine
            .ingest(request(
                "a1",
                vec![step(2, StepType::LlmCall), step(1, StepType::ToolCall)],
            ))
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(engine.episode_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ingest_negative_index_rejected() {
        let engine = create_engine();
        let result = engine
            .ingest(request("a1", vec![step(-1, StepType::Decision)]))
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_ingest_terminal_status_sets_ended_at() {
        let engine = create_engine();
        let mut req = request("a1", vec![step(0, StepType::Observation)]);
        req.status = Some(EpisodeStatus::Success);
        let response = engine.ingest(req).await.unwrap();

        let detail = engine.get(response.episode_id).await.unwrap();
        assert_eq!(detail.episode.status, EpisodeStatus::Success);
        assert!(detail.episode.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_ingest_with_link_to_existing_episode() {
        let engine = create_engine();
        let first = engine.ingest(request("a1", vec![])).await.unwrap();

        let mut retry = request("a1", vec![]);
        retry.links = Some(vec![LinkInput {
            episode_id: first.episode_id,
            relation: LinkRelation::Retries,
        }]);
        let second = engine.ingest(retry).await.unwrap();

        let ancestors = engine.ancestry(second.episode_id).await.unwrap();
        assert_eq!(ancestors, vec![first.episode_id]);
    }

    #[tokio::test]
    async fn test_ingest_with_unknown_link_target() {
        let engine = create_engine();
        let mut req = request("a1", vec![step(0, StepType::LlmCall)]);
        req.links = Some(vec![LinkInput {
            episode_id: Uuid::now_v7(),
            relation: LinkRelation::CausedBy,
        }]);
        let result = engine.ingest(req).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        // Rejected before any durable mutation.
        assert_eq!(engine.episode_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_append_with_gaps_allowed() {
        let engine = create_engine();
        let created = engine
            .ingest(request("a1", vec![step(0, StepType::LlmCall)]))
            .await
            .unwrap();

        let response = engine
            .append(AppendRequest {
                episode_id: created.episode_id,
                steps: vec![step(2, StepType::ToolCall), step(7, StepType::Decision)],
            })
            .await
            .unwrap();
        assert_eq!(response.appended, 2);

        let detail = engine.get(created.episode_id).await.unwrap();
        let indices: Vec<i64> = detail.steps.iter().map(|s| s.step_index).collect();
        assert_eq!(indices, vec![0, 2, 7]);
    }

    #[tokio::test]
    async fn test_append_below_committed_max_rejected() {
        let engine = create_engine();
        let created = engine
            .ingest(request("a1", vec![step(5, StepType::LlmCall)]))
            .await
            .unwrap();

        // Equal to the committed maximum is a duplicate.
        let result = engine
            .append(AppendRequest {
                episode_id: created.episode_id,
                steps: vec![step(5, StepType::ToolCall)],
            })
            .await;
        assert!(matches!(result, Err(Error::Conflict(_))));

        // Below it is out of order.
        let result = engine
            .append(AppendRequest {
                episode_id: created.episode_id,
                steps: vec![step(3, StepType::ToolCall)],
            })
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));

        let detail = engine.get(created.episode_id).await.unwrap();
        assert_eq!(detail.steps.len(), 1);
    }

    #[tokio::test]
    async fn test_append_to_terminal_episode_rejected() {
        let engine = create_engine();
        let created = engine
            .ingest(request("a1", vec![step(0, StepType::LlmCall)]))
            .await
            .unwrap();
        engine
            .finish(FinishRequest {
                episode_id: created.episode_id,
                status: EpisodeStatus::Success,
            })
            .await
            .unwrap();

        let result = engine
            .append(AppendRequest {
                episode_id: created.episode_id,
                steps: vec![step(1, StepType::ToolCall)],
            })
            .await;
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_append_to_unknown_episode() {
        let engine = create_engine();
        let result = engine
            .append(AppendRequest {
                episode_id: Uuid::now_v7(),
                steps: vec![step(0, StepType::LlmCall)],
            })
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_finish_is_monotonic() {
        let engine = create_engine();
        let created = engine.ingest(request("a1", vec![])).await.unwrap();

        engine
            .finish(FinishRequest {
                episode_id: created.episode_id,
                status: EpisodeStatus::Failure,
            })
            .await
            .unwrap();

        // A second transition can never succeed.
        let result = engine
            .finish(FinishRequest {
                episode_id: created.episode_id,
                status: EpisodeStatus::Success,
            })
            .await;
        assert!(matches!(result, Err(Error::Conflict(_))));

        let detail = engine.get(created.episode_id).await.unwrap();
        assert_eq!(detail.episode.status, EpisodeStatus::Failure);
    }

    #[tokio::test]
    async fn test_finish_rejects_running() {
        let engine = create_engine();
        let created = engine.ingest(request("a1", vec![])).await.unwrap();
        let result = engine
            .finish(FinishRequest {
                episode_id: created.episode_id,
                status: EpisodeStatus::Running,
            })
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_validate_indices_against_committed_max() {
        assert!(validate_indices([0, 1, 2], None).is_ok());
        assert!(validate_indices([3, 9], Some(2)).is_ok());
        assert!(matches!(
            validate_indices([2], Some(2)),
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            validate_indices([1], Some(2)),
            Err(Error::Validation(_))
        ));
        assert!(validate_indices(std::iter::empty(), Some(5)).is_ok());
    }
}
