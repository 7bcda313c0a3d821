use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::link::{Link, LinkDirection, LinkRelation};
use crate::query::LedgerEngine;
use crate::time;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRequest {
    pub from_episode_id: Uuid,
    pub to_episode_id: Uuid,
    pub relation: LinkRelation,
}

pub async fn add_link(engine: &LedgerEngine, request: LinkRequest) -> Result<Link> {
    if request.from_episode_id == request.to_episode_id {
        return Err(Error::Validation(format!(
            "self-loop rejected: {} cannot link to itself",
            request.from_episode_id
        )));
    }
    for id in [request.from_episode_id, request.to_episode_id] {
        if !engine.storage.episode_exists(id).await? {
            return Err(Error::NotFound(format!("episode {id} not found")));
        }
    }

    let link = Link {
        from_episode_id: request.from_episode_id,
        to_episode_id: request.to_episode_id,
        relation: request.relation,
        created_at: time::now(),
    };
    engine.storage.insert_link(&link).await?;
    Ok(link)
}

/// Walk `caused_by`/`retries` edges backward from `episode_id`, collecting
/// ancestor ids in visit order. Revisiting any node aborts with Cycle
/// rather than looping.
pub async fn ancestry(engine: &LedgerEngine, episode_id: Uuid) -> Result<Vec<Uuid>> {
    if !engine.storage.episode_exists(episode_id).await? {
        return Err(Error::NotFound(format!("episode {episode_id} not found")));
    }

    let mut visited: HashSet<Uuid> = HashSet::from([episode_id]);
    let mut order: Vec<Uuid> = Vec::new();
    let mut stack: Vec<Uuid> = vec![episode_id];

    while let Some(current) = stack.pop() {
        let links = engine
            .storage
            .get_links(current, LinkDirection::Outgoing)
            .await?;
        for link in links.iter().filter(|l| l.relation.is_ancestry_edge()) {
            if !visited.insert(link.to_episode_id) {
                return Err(Error::Cycle(format!(
                    "ancestry of {episode_id} revisits {}",
                    link.to_episode_id
                )));
            }
            order.push(link.to_episode_id);
            stack.push(link.to_episode_id);
        }
    }

    Ok(order)
}

/// Direct `spawned_child` targets of an episode, as an unordered set.
pub async fn children(engine: &LedgerEngine, episode_id: Uuid) -> Result<HashSet<Uuid>> {
    if !engine.storage.episode_exists(episode_id).await? {
        return Err(Error::NotFound(format!("episode {episode_id} not found")));
    }

    let links = engine
        .storage
        .get_links(episode_id, LinkDirection::Outgoing)
        .await?;
    Ok(links
        .into_iter()
        .filter(|l| l.relation == LinkRelation::SpawnedChild)
        .map(|l| l.to_episode_id)
        .collect())
}
