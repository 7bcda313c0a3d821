pub mod ingest;
pub mod links;
pub mod list;
pub mod replay;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::error::{Error, Result};
use crate::storage::{EpisodeFilter, StorageBackend};

/// Write sections keyed by episode id.
///
/// At most one writer per episode at a time; writers against different
/// episodes proceed fully in parallel. This is the only lock scope — there
/// is deliberately no single mutex across all episodes.
pub(crate) struct EpisodeLocks {
    inner: tokio::sync::Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl EpisodeLocks {
    fn new() -> Self {
        Self {
            inner: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn acquire(&self, id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().await;
        map.entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

pub struct LedgerEngine {
    pub storage: Arc<dyn StorageBackend>,
    pub config: LedgerConfig,
    pub(crate) locks: EpisodeLocks,
}

impl LedgerEngine {
    pub fn new(storage: Arc<dyn StorageBackend>, config: LedgerConfig) -> Self {
        Self {
            storage,
            config,
            locks: EpisodeLocks::new(),
        }
    }

    pub async fn ingest(&self, request: ingest::IngestRequest) -> Result<ingest::IngestResponse> {
        ingest::execute(self, request).await
    }

    pub async fn append(&self, request: ingest::AppendRequest) -> Result<ingest::AppendResponse> {
        ingest::append(self, request).await
    }

    pub async fn finish(&self, request: ingest::FinishRequest) -> Result<()> {
        ingest::finish(self, request).await
    }

    pub async fn list(&self, request: list::ListRequest) -> Result<list::ListResponse> {
        list::execute(self, request).await
    }

    pub async fn get(&self, episode_id: Uuid) -> Result<list::EpisodeDetail> {
        list::get(self, episode_id).await
    }

    pub async fn replay(&self, request: replay::ReplayRequest) -> Result<replay::EpisodeReplay> {
        replay::execute(self, request).await
    }

    pub async fn link(&self, request: links::LinkRequest) -> Result<crate::model::link::Link> {
        links::add_link(self, request).await
    }

    pub async fn ancestry(&self, episode_id: Uuid) -> Result<Vec<Uuid>> {
        links::ancestry(self, episode_id).await
    }

    pub async fn children(&self, episode_id: Uuid) -> Result<HashSet<Uuid>> {
        links::children(self, episode_id).await
    }

    pub async fn episode_count(&self) -> Result<i64> {
        self.storage.count_episodes(&EpisodeFilter::default()).await
    }
}

/// Retry a write a bounded number of times with linear backoff, but only
/// for transient storage failures. Every other error kind surfaces as-is.
pub(crate) async fn retry_write<T, F, Fut>(config: &LedgerConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Err(Error::Storage(msg)) if attempt < config.retry_attempts => {
                attempt += 1;
                tracing::warn!("transient storage failure, attempt {attempt}: {msg}");
                tokio::time::sleep(config.retry_backoff * attempt).await;
            }
            other => return other,
        }
    }
}

/// Run a write under the configured deadline. On expiry the future is
/// dropped before any transaction commits, so the store stays unchanged.
pub(crate) async fn with_deadline<T>(
    config: &LedgerConfig,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(config.write_deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(format!(
            "{what} exceeded the {:?} write deadline",
            config.write_deadline
        ))),
    }
}
