pub mod duckdb;
pub mod migrations;

use uuid::Uuid;

use crate::cursor::PageCursor;
use crate::error::Result;
use crate::model::episode::{Episode, EpisodeStatus, EpisodeSummary};
use crate::model::link::{Link, LinkDirection};
use crate::model::step::Step;

/// Conjunction of optional listing predicates; absent fields apply no
/// constraint.
#[derive(Debug, Clone, Default)]
pub struct EpisodeFilter {
    pub agent_id: Option<String>,
    pub status: Option<EpisodeStatus>,
    pub since: Option<String>,
    pub until: Option<String>,
}

/// Durable ledger primitives. Multi-row writes are atomic; reads observe
/// a consistent snapshot, never a partially committed episode.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    /// Insert an episode and all of its steps in one transaction.
    async fn insert_episode_with_steps(&self, episode: &Episode, steps: &[Step]) -> Result<()>;

    /// Append further steps to an existing episode in one transaction.
    async fn append_steps(&self, episode_id: Uuid, steps: &[Step]) -> Result<()>;

    async fn get_episode(&self, id: Uuid) -> Result<Option<Episode>>;

    /// Steps of an episode with `step_index >= from_index`, index order.
    async fn get_steps(&self, episode_id: Uuid, from_index: i64) -> Result<Vec<Step>>;

    /// Highest committed step index, `None` for an episode with no steps.
    async fn max_step_index(&self, episode_id: Uuid) -> Result<Option<i64>>;

    /// Filtered summaries ordered by (started_at DESC, id DESC), starting
    /// strictly after `cursor` when given.
    async fn list_episodes(
        &self,
        filter: &EpisodeFilter,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<Vec<EpisodeSummary>>;

    async fn count_episodes(&self, filter: &EpisodeFilter) -> Result<i64>;

    /// Transition a running episode to a terminal status. Fails with
    /// Conflict if the episode is already terminal, NotFound if absent.
    async fn update_status(&self, id: Uuid, status: EpisodeStatus, ended_at: &str) -> Result<()>;

    async fn insert_link(&self, link: &Link) -> Result<()>;

    async fn get_links(&self, id: Uuid, direction: LinkDirection) -> Result<Vec<Link>>;

    async fn episode_exists(&self, id: Uuid) -> Result<bool>;
}
