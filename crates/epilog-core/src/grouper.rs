use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::Result;
use crate::model::episode::EpisodeStatus;
use crate::model::trace::TraceEvent;
use crate::query::ingest::{IngestRequest, StepInput};
use crate::query::LedgerEngine;
use crate::time;

/// Pending steps for one correlation key, accumulated until the key goes
/// idle.
struct Accumulation {
    agent_id: String,
    /// Step events only, kept sorted by timestamp; arrival order breaks
    /// ties.
    events: Vec<TraceEvent>,
    terminal: Option<EpisodeStatus>,
    last_arrival: Instant,
}

/// Buckets raw, possibly out-of-order trace events into episode-shaped
/// batches and hands them to ingest once their correlation key has been
/// idle past the configured window.
///
/// Flushing removes the key, so an event arriving after the flush starts a
/// new episode for that key — a closed episode is never reopened.
pub struct TraceGrouper {
    engine: Arc<LedgerEngine>,
    pending: Mutex<HashMap<String, Accumulation>>,
    idle_window: Duration,
}

impl TraceGrouper {
    pub fn new(engine: Arc<LedgerEngine>) -> Self {
        let idle_window = engine.config.idle_window;
        Self {
            engine,
            pending: Mutex::new(HashMap::new()),
            idle_window,
        }
    }

    /// Accept one raw event into its key's open accumulation window.
    pub async fn offer(&self, mut event: TraceEvent) -> Result<()> {
        event.validate()?;
        event.timestamp = time::normalize(&event.timestamp)?;

        let mut pending = self.pending.lock().await;
        let acc = pending
            .entry(event.correlation_key.clone())
            .or_insert_with(|| Accumulation {
                agent_id: event.agent_id.clone(),
                events: Vec::new(),
                terminal: None,
                last_arrival: Instant::now(),
            });
        acc.last_arrival = Instant::now();

        if let Some(status) = event.status {
            acc.terminal = Some(status);
        } else {
            let pos = acc
                .events
                .partition_point(|e| e.timestamp <= event.timestamp);
            acc.events.insert(pos, event);
        }
        Ok(())
    }

    /// Flush every accumulation idle longer than the window. Returns the
    /// number of episodes created. Safe to call concurrently with `offer`
    /// and idempotent: a key flushed once is simply gone.
    pub async fn sweep(&self) -> usize {
        let due: Vec<(String, Accumulation)> = {
            let mut pending = self.pending.lock().await;
            let due_keys: Vec<String> = pending
                .iter()
                .filter(|(_, acc)| acc.last_arrival.elapsed() >= self.idle_window)
                .map(|(key, _)| key.clone())
                .collect();
            due_keys
                .into_iter()
                .filter_map(|key| pending.remove(&key).map(|acc| (key, acc)))
                .collect()
        };
        self.flush_batch(due).await
    }

    /// Flush everything regardless of age. Shutdown path.
    pub async fn flush_all(&self) -> usize {
        let due: Vec<(String, Accumulation)> =
            { self.pending.lock().await.drain().collect() };
        self.flush_batch(due).await
    }

    pub async fn pending_keys(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn flush_batch(&self, due: Vec<(String, Accumulation)>) -> usize {
        let mut flushed = 0;
        for (key, acc) in due {
            match self.flush_one(&key, acc).await {
                Ok(episode_id) => {
                    flushed += 1;
                    tracing::info!("flushed correlation key {key} as episode {episode_id}");
                }
                Err(e) => {
                    tracing::error!("failed to flush correlation key {key}: {e}");
                }
            }
        }
        flushed
    }

    async fn flush_one(&self, key: &str, acc: Accumulation) -> Result<Uuid> {
        // No explicit terminal signal means the episode went quiet
        // mid-flight; it is recorded as partial, never as success.
        let status = acc.terminal.unwrap_or(EpisodeStatus::Partial);

        let mut steps = Vec::with_capacity(acc.events.len());
        for (position, event) in acc.events.into_iter().enumerate() {
            let Some(step_type) = event.step_type else {
                continue;
            };
            steps.push(StepInput {
                step_index: position as i64,
                step_type,
                model: event.model,
                tool_name: event.tool_name,
                tokens: event.tokens,
                payload: event.payload,
                timestamp: Some(event.timestamp),
            });
        }

        let response = self
            .engine
            .ingest(IngestRequest {
                agent_id: acc.agent_id,
                status: Some(status),
                metadata: Some(serde_json::json!({ "correlation_key": key })),
                steps,
                links: None,
            })
            .await?;
        Ok(response.episode_id)
    }
}

/// Handle to the background sweep task; dropping the handle does not stop
/// the task, `shutdown` does.
pub struct SweeperHandle {
    stop: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweep loop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

/// Start the periodic sweep as an explicit, cancellable task.
pub fn spawn_sweeper(grouper: Arc<TraceGrouper>, interval: Duration) -> SweeperHandle {
    let (stop, mut stopped) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    grouper.sweep().await;
                }
                _ = stopped.changed() => break,
            }
        }
    });
    SweeperHandle { stop, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::model::step::StepType;
    use crate::query::list::ListRequest;
    use crate::storage::duckdb::DuckDbStorage;

    fn create_grouper(idle_window: Duration) -> (Arc<LedgerEngine>, TraceGrouper) {
        let storage = Arc::new(DuckDbStorage::open_in_memory().unwrap());
        let config = LedgerConfig {
            idle_window,
            ..Default::default()
        };
        let engine = Arc::new(LedgerEngine::new(storage, config));
        let grouper = TraceGrouper::new(engine.clone());
        (engine, grouper)
    }

    fn event(key: &str, ts: &str) -> TraceEvent {
        TraceEvent {
            correlation_key: key.to_string(),
            agent_id: "agent-1".to_string(),
            timestamp: ts.to_string(),
            step_type: Some(StepType::LlmCall),
            status: None,
            model: Some("gpt-4".to_string()),
            tool_name: None,
            tokens: Some(10),
            payload: serde_json::json!({}),
        }
    }

    fn status_event(key: &str, ts: &str, status: EpisodeStatus) -> TraceEvent {
        let mut e = event(key, ts);
        e.step_type = None;
        e.status = Some(status);
        e
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_key_flushes_as_one_partial_episode() {
        let (engine, grouper) = create_grouper(Duration::from_secs(30));

        // Deliberately out of timestamp order.
        grouper.offer(event("k1", "2025-06-01T10:00:02Z")).await.unwrap();
        grouper.offer(event("k1", "2025-06-01T10:00:00Z")).await.unwrap();
        grouper.offer(event("k1", "2025-06-01T10:00:01Z")).await.unwrap();

        // Still within the idle window: nothing flushes.
        assert_eq!(grouper.sweep().await, 0);
        assert_eq!(grouper.pending_keys().await, 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(grouper.sweep().await, 1);
        assert_eq!(grouper.pending_keys().await, 0);

        let page = engine.list(ListRequest::default()).await.unwrap();
        assert_eq!(page.episodes.len(), 1);
        assert_eq!(page.episodes[0].status, EpisodeStatus::Partial);
        assert_eq!(page.episodes[0].step_count, 3);

        // Steps are indexed by timestamp-sorted position.
        let detail = engine.get(page.episodes[0].id).await.unwrap();
        let timestamps: Vec<&str> = detail.steps.iter().map(|s| s.timestamp.as_str()).collect();
        let mut sorted = timestamps.clone();
        sorted.sort();
        assert_eq!(timestamps, sorted);
        let indices: Vec<i64> = detail.steps.iter().map(|s| s.step_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_is_idempotent() {
        let (_engine, grouper) = create_grouper(Duration::from_secs(30));
        grouper.offer(event("k1", "2025-06-01T10:00:00Z")).await.unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(grouper.sweep().await, 1);
        assert_eq!(grouper.sweep().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_event_starts_new_episode() {
        let (engine, grouper) = create_grouper(Duration::from_secs(30));

        for i in 0..3 {
            grouper
                .offer(event("k1", &format!("2025-06-01T10:00:0{i}Z")))
                .await
                .unwrap();
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(grouper.sweep().await, 1);

        // A 4th event for the same key after the flush: new episode, the
        // closed one is untouched.
        grouper.offer(event("k1", "2025-06-01T10:05:00Z")).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(grouper.sweep().await, 1);

        let page = engine.list(ListRequest::default()).await.unwrap();
        assert_eq!(page.episodes.len(), 2);
        let counts: Vec<i64> = page.episodes.iter().map(|e| e.step_count).collect();
        assert!(counts.contains(&3));
        assert!(counts.contains(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_terminal_status_wins_over_partial() {
        let (engine, grouper) = create_grouper(Duration::from_secs(30));

        grouper.offer(event("k1", "2025-06-01T10:00:00Z")).await.unwrap();
        grouper
            .offer(status_event("k1", "2025-06-01T10:00:01Z", EpisodeStatus::Success))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(grouper.sweep().await, 1);

        let page = engine.list(ListRequest::default()).await.unwrap();
        assert_eq!(page.episodes[0].status, EpisodeStatus::Success);
        // The status signal is not a step.
        assert_eq!(page.episodes[0].step_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_flush_independently() {
        let (_engine, grouper) = create_grouper(Duration::from_secs(30));

        grouper.offer(event("k1", "2025-06-01T10:00:00Z")).await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;
        grouper.offer(event("k2", "2025-06-01T10:00:20Z")).await.unwrap();
        tokio::time::advance(Duration::from_secs(15)).await;

        // k1 has been idle 35s, k2 only 15s.
        assert_eq!(grouper.sweep().await, 1);
        assert_eq!(grouper.pending_keys().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_arrival_extends_the_window() {
        let (_engine, grouper) = create_grouper(Duration::from_secs(30));

        grouper.offer(event("k1", "2025-06-01T10:00:00Z")).await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;
        grouper.offer(event("k1", "2025-06-01T10:00:20Z")).await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;

        // 40s since the first event but only 20s since the last.
        assert_eq!(grouper.sweep().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_all_drains_everything() {
        let (engine, grouper) = create_grouper(Duration::from_secs(3600));
        grouper.offer(event("k1", "2025-06-01T10:00:00Z")).await.unwrap();
        grouper.offer(event("k2", "2025-06-01T10:00:00Z")).await.unwrap();

        assert_eq!(grouper.flush_all().await, 2);
        assert_eq!(grouper.pending_keys().await, 0);
        assert_eq!(engine.episode_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_invalid_event_rejected_before_buffering() {
        let (_engine, grouper) = create_grouper(Duration::from_secs(30));
        let mut bad = event("k1", "2025-06-01T10:00:00Z");
        bad.step_type = None;
        assert!(grouper.offer(bad).await.is_err());
        assert_eq!(grouper.pending_keys().await, 0);
    }

    #[tokio::test]
    async fn test_sweeper_task_starts_and_stops() {
        let (_engine, grouper) = create_grouper(Duration::from_secs(30));
        let handle = spawn_sweeper(Arc::new(grouper), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.shutdown().await;
    }
}
