use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Typed causal relation between two episodes.
///
/// Self-loops are rejected; the (from, to, relation) triple is unique.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Link {
    pub from_episode_id: Uuid,
    pub to_episode_id: Uuid,
    pub relation: LinkRelation,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkRelation {
    CausedBy,
    Retries,
    SpawnedChild,
}

impl LinkRelation {
    /// Edges the ancestry walk follows.
    pub fn is_ancestry_edge(self) -> bool {
        matches!(self, LinkRelation::CausedBy | LinkRelation::Retries)
    }
}

impl std::fmt::Display for LinkRelation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkRelation::CausedBy => write!(f, "caused_by"),
            LinkRelation::Retries => write!(f, "retries"),
            LinkRelation::SpawnedChild => write!(f, "spawned_child"),
        }
    }
}

impl std::str::FromStr for LinkRelation {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "caused_by" => Ok(LinkRelation::CausedBy),
            "retries" => Ok(LinkRelation::Retries),
            "spawned_child" => Ok(LinkRelation::SpawnedChild),
            _ => Err(crate::error::Error::Validation(format!(
                "invalid link relation: {s}"
            ))),
        }
    }
}

/// Which endpoint of a link the lookup matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    Outgoing,
    Incoming,
}
