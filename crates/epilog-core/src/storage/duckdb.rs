use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use uuid::Uuid;

use crate::cursor::PageCursor;
use crate::error::{Error, Result};
use crate::model::episode::{Episode, EpisodeStatus, EpisodeSummary};
use crate::model::link::{Link, LinkDirection};
use crate::model::step::Step;
use crate::storage::{EpisodeFilter, StorageBackend};

pub struct DuckDbStorage {
    conn: Arc<Mutex<duckdb::Connection>>,
}

impl DuckDbStorage {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = duckdb::Connection::open(path)?;
        super::migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = duckdb::Connection::open_in_memory()?;
        super::migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn row_to_episode(row: &duckdb::Row<'_>) -> duckdb::Result<Episode> {
    let id_str: String = row.get(0)?;
    let metadata_json: Option<String> = row.get(5)?;

    Ok(Episode {
        id: Uuid::parse_str(&id_str).unwrap(),
        agent_id: row.get(1)?,
        status: row.get::<_, String>(2)?.parse().unwrap(),
        started_at: row.get(3)?,
        ended_at: row.get(4)?,
        metadata: metadata_json
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new())),
    })
}

fn row_to_summary(row: &duckdb::Row<'_>) -> duckdb::Result<EpisodeSummary> {
    let id_str: String = row.get(0)?;

    Ok(EpisodeSummary {
        id: Uuid::parse_str(&id_str).unwrap(),
        agent_id: row.get(1)?,
        status: row.get::<_, String>(2)?.parse().unwrap(),
        step_count: row.get(3)?,
        total_tokens: row.get(4)?,
        started_at: row.get(5)?,
        ended_at: row.get(6)?,
    })
}

fn row_to_step(row: &duckdb::Row<'_>) -> duckdb::Result<Step> {
    let episode_id_str: String = row.get(0)?;
    let payload_json: Option<String> = row.get(6)?;

    Ok(Step {
        episode_id: Uuid::parse_str(&episode_id_str).unwrap(),
        step_index: row.get(1)?,
        step_type: row.get::<_, String>(2)?.parse().unwrap(),
        model: row.get(3)?,
        tool_name: row.get(4)?,
        tokens: row.get(5)?,
        payload: payload_json
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or(serde_json::Value::Null),
        timestamp: row.get(7)?,
    })
}

fn row_to_link(row: &duckdb::Row<'_>) -> duckdb::Result<Link> {
    let from_str: String = row.get(0)?;
    let to_str: String = row.get(1)?;

    Ok(Link {
        from_episode_id: Uuid::parse_str(&from_str).unwrap(),
        to_episode_id: Uuid::parse_str(&to_str).unwrap(),
        relation: row.get::<_, String>(2)?.parse().unwrap(),
        created_at: row.get(3)?,
    })
}

const INSERT_STEP: &str = "INSERT INTO steps (episode_id, step_index, step_type, model, tool_name, tokens, payload, timestamp) VALUES (?, ?, ?, ?, ?, ?, ?, ?)";

const SELECT_SUMMARY: &str = "SELECT e.id, e.agent_id, e.status, \
    CAST((SELECT COUNT(*) FROM steps s WHERE s.episode_id = e.id) AS BIGINT) AS step_count, \
    CAST((SELECT COALESCE(SUM(s.tokens), 0) FROM steps s WHERE s.episode_id = e.id) AS BIGINT) AS total_tokens, \
    e.started_at, e.ended_at FROM episodes e";

/// Append the filter's predicates to `conditions`/`params` as numbered
/// placeholders.
fn push_filter_conditions(
    filter: &EpisodeFilter,
    conditions: &mut Vec<String>,
    params: &mut Vec<Box<dyn duckdb::ToSql>>,
) {
    if let Some(ref agent_id) = filter.agent_id {
        conditions.push(format!("e.agent_id = ${}", params.len() + 1));
        params.push(Box::new(agent_id.clone()));
    }
    if let Some(status) = filter.status {
        conditions.push(format!("e.status = ${}", params.len() + 1));
        params.push(Box::new(status.to_string()));
    }
    if let Some(ref since) = filter.since {
        conditions.push(format!("e.started_at >= ${}", params.len() + 1));
        params.push(Box::new(since.clone()));
    }
    if let Some(ref until) = filter.until {
        conditions.push(format!("e.started_at <= ${}", params.len() + 1));
        params.push(Box::new(until.clone()));
    }
}

#[async_trait::async_trait]
impl StorageBackend for DuckDbStorage {
    async fn insert_episode_with_steps(&self, episode: &Episode, steps: &[Step]) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let metadata_json = serde_json::to_string(&episode.metadata)?;

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO episodes (id, agent_id, status, started_at, ended_at, metadata) VALUES (?, ?, ?, ?, ?, ?)",
            duckdb::params![
                episode.id.to_string(),
                episode.agent_id,
                episode.status.to_string(),
                episode.started_at,
                episode.ended_at,
                metadata_json,
            ],
        )?;
        {
            let mut stmt = tx.prepare(INSERT_STEP)?;
            for step in steps {
                stmt.execute(duckdb::params![
                    step.episode_id.to_string(),
                    step.step_index,
                    step.step_type.to_string(),
                    step.model,
                    step.tool_name,
                    step.tokens,
                    serde_json::to_string(&step.payload)?,
                    step.timestamp,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn append_steps(&self, episode_id: Uuid, steps: &[Step]) -> Result<()> {
        let mut conn = self.conn.lock().await;

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(INSERT_STEP)?;
            for step in steps {
                stmt.execute(duckdb::params![
                    episode_id.to_string(),
                    step.step_index,
                    step.step_type.to_string(),
                    step.model,
                    step.tool_name,
                    step.tokens,
                    serde_json::to_string(&step.payload)?,
                    step.timestamp,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn get_episode(&self, id: Uuid) -> Result<Option<Episode>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, agent_id, status, started_at, ended_at, metadata FROM episodes WHERE id = ?",
        )?;
        let result = stmt.query_row([id.to_string()], row_to_episode);
        match result {
            Ok(episode) => Ok(Some(episode)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::Storage(e.to_string())),
        }
    }

    async fn get_steps(&self, episode_id: Uuid, from_index: i64) -> Result<Vec<Step>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT episode_id, step_index, step_type, model, tool_name, tokens, payload, timestamp \
             FROM steps WHERE episode_id = ? AND step_index >= ? ORDER BY step_index ASC",
        )?;
        let rows = stmt.query_map(
            duckdb::params![episode_id.to_string(), from_index],
            row_to_step,
        )?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(|e| Error::Storage(e.to_string()))?);
        }
        Ok(results)
    }

    async fn max_step_index(&self, episode_id: Uuid) -> Result<Option<i64>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT MAX(step_index) FROM steps WHERE episode_id = ?")?;
        let result: Option<i64> = stmt
            .query_row([episode_id.to_string()], |row| row.get(0))
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(result)
    }

    async fn list_episodes(
        &self,
        filter: &EpisodeFilter,
        cursor: Option<&PageCursor>,
        limit: usize,
    ) -> Result<Vec<EpisodeSummary>> {
        let conn = self.conn.lock().await;
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn duckdb::ToSql>> = Vec::new();

        push_filter_conditions(filter, &mut conditions, &mut params);

        if let Some(cursor) = cursor {
            // Strictly after the cursor row in (started_at DESC, id DESC).
            conditions.push(format!(
                "(e.started_at < ${p1} OR (e.started_at = ${p2} AND e.id < ${p3}))",
                p1 = params.len() + 1,
                p2 = params.len() + 2,
                p3 = params.len() + 3,
            ));
            params.push(Box::new(cursor.started_at.clone()));
            params.push(Box::new(cursor.started_at.clone()));
            params.push(Box::new(cursor.id.to_string()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "{SELECT_SUMMARY}{where_clause} ORDER BY e.started_at DESC, e.id DESC LIMIT {limit}"
        );

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn duckdb::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), row_to_summary)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(|e| Error::Storage(e.to_string()))?);
        }
        Ok(results)
    }

    async fn count_episodes(&self, filter: &EpisodeFilter) -> Result<i64> {
        let conn = self.conn.lock().await;
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn duckdb::ToSql>> = Vec::new();

        push_filter_conditions(filter, &mut conditions, &mut params);

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let sql = format!("SELECT COUNT(*) FROM episodes e{where_clause}");
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn duckdb::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let count: i64 = stmt
            .query_row(param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(count)
    }

    async fn update_status(&self, id: Uuid, status: EpisodeStatus, ended_at: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        let affected = conn.execute(
            "UPDATE episodes SET status = ?, ended_at = ? WHERE id = ? AND status = 'running'",
            duckdb::params![status.to_string(), ended_at, id.to_string()],
        )?;
        if affected == 0 {
            let mut stmt = conn.prepare("SELECT status FROM episodes WHERE id = ?")?;
            let existing = stmt.query_row([id.to_string()], |row| row.get::<_, String>(0));
            return match existing {
                Ok(current) => Err(Error::Conflict(format!(
                    "episode {id} is already terminal ({current})"
                ))),
                Err(duckdb::Error::QueryReturnedNoRows) => {
                    Err(Error::NotFound(format!("episode {id} not found")))
                }
                Err(e) => Err(Error::Storage(e.to_string())),
            };
        }
        Ok(())
    }

    async fn insert_link(&self, link: &Link) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO links (from_episode_id, to_episode_id, relation, created_at) VALUES (?, ?, ?, ?)",
            duckdb::params![
                link.from_episode_id.to_string(),
                link.to_episode_id.to_string(),
                link.relation.to_string(),
                link.created_at,
            ],
        )?;
        Ok(())
    }

    async fn get_links(&self, id: Uuid, direction: LinkDirection) -> Result<Vec<Link>> {
        let conn = self.conn.lock().await;
        let sql = match direction {
            LinkDirection::Outgoing => {
                "SELECT from_episode_id, to_episode_id, relation, created_at FROM links WHERE from_episode_id = ?"
            }
            LinkDirection::Incoming => {
                "SELECT from_episode_id, to_episode_id, relation, created_at FROM links WHERE to_episode_id = ?"
            }
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([id.to_string()], row_to_link)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(|e| Error::Storage(e.to_string()))?);
        }
        Ok(results)
    }

    async fn episode_exists(&self, id: Uuid) -> Result<bool> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT 1 FROM episodes WHERE id = ?")?;
        let result = stmt.query_row([id.to_string()], |row| row.get::<_, i32>(0));
        match result {
            Ok(_) => Ok(true),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(Error::Storage(e.to_string())),
        }
    }
}
