use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::step::Step;
use crate::query::LedgerEngine;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayRequest {
    pub episode_id: Uuid,
    pub from_index: Option<i64>,
}

impl ReplayRequest {
    pub fn new(episode_id: Uuid) -> Self {
        Self {
            episode_id,
            from_index: None,
        }
    }
}

/// Finite, restartable, read-only pass over an episode's steps in strict
/// step_index order.
///
/// Holds a snapshot taken at construction; iterating never touches
/// storage, so repeated passes over the same value are identical.
#[derive(Debug, Clone)]
pub struct EpisodeReplay {
    episode_id: Uuid,
    steps: Vec<Step>,
    pos: usize,
}

impl EpisodeReplay {
    pub fn episode_id(&self) -> Uuid {
        self.episode_id
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Rewind to the first step of the snapshot.
    pub fn restart(&mut self) {
        self.pos = 0;
    }
}

impl Iterator for EpisodeReplay {
    type Item = Step;

    fn next(&mut self) -> Option<Step> {
        let step = self.steps.get(self.pos)?.clone();
        self.pos += 1;
        Some(step)
    }
}

pub async fn execute(engine: &LedgerEngine, request: ReplayRequest) -> Result<EpisodeReplay> {
    if !engine.storage.episode_exists(request.episode_id).await? {
        return Err(Error::NotFound(format!(
            "episode {} not found",
            request.episode_id
        )));
    }

    let from_index = request.from_index.unwrap_or(0);
    let steps = engine
        .storage
        .get_steps(request.episode_id, from_index)
        .await?;

    // The storage constraint makes duplicates impossible; if one shows up
    // anyway the ledger is corrupt and replay must not paper over it.
    for window in steps.windows(2) {
        if window[1].step_index <= window[0].step_index {
            return Err(Error::InconsistentLedger(format!(
                "episode {} stores step_index {} after {}",
                request.episode_id, window[1].step_index, window[0].step_index
            )));
        }
    }

    Ok(EpisodeReplay {
        episode_id: request.episode_id,
        steps,
        pos: 0,
    })
}
