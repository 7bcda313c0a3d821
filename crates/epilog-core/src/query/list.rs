use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cursor::PageCursor;
use crate::error::{Error, Result};
use crate::model::episode::{Episode, EpisodeStatus, EpisodeSummary};
use crate::model::step::Step;
use crate::query::LedgerEngine;
use crate::storage::EpisodeFilter;
use crate::time;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListRequest {
    pub agent_id: Option<String>,
    pub status: Option<EpisodeStatus>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub episodes: Vec<EpisodeSummary>,
    pub next_cursor: Option<String>,
}

/// Full episode with its step_index-ordered steps.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeDetail {
    pub episode: Episode,
    pub steps: Vec<Step>,
}

pub async fn execute(engine: &LedgerEngine, request: ListRequest) -> Result<ListResponse> {
    let limit = request
        .limit
        .unwrap_or(engine.config.default_page_size)
        .clamp(1, engine.config.max_page_size);

    let cursor = match request.cursor.as_deref() {
        Some(token) => Some(PageCursor::decode(token)?),
        None => None,
    };

    let filter = EpisodeFilter {
        agent_id: request.agent_id,
        status: request.status,
        since: request.since.as_deref().map(time::normalize).transpose()?,
        until: request.until.as_deref().map(time::normalize).transpose()?,
    };

    // Fetch one row past the page to learn whether more pages exist.
    let mut episodes = engine
        .storage
        .list_episodes(&filter, cursor.as_ref(), limit + 1)
        .await?;

    let next_cursor = if episodes.len() > limit {
        episodes.truncate(limit);
        episodes
            .last()
            .map(|last| PageCursor::new(last.started_at.clone(), last.id).encode())
    } else {
        None
    };

    Ok(ListResponse {
        episodes,
        next_cursor,
    })
}

pub async fn get(engine: &LedgerEngine, episode_id: Uuid) -> Result<EpisodeDetail> {
    let episode = engine
        .storage
        .get_episode(episode_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("episode {episode_id} not found")))?;
    let steps = engine.storage.get_steps(episode_id, 0).await?;
    Ok(EpisodeDetail { episode, steps })
}
