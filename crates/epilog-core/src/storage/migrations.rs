pub const CREATE_EPISODES_TABLE: &str = "
CREATE TABLE IF NOT EXISTS episodes (
    id VARCHAR PRIMARY KEY,
    agent_id VARCHAR NOT NULL,
    status VARCHAR NOT NULL DEFAULT 'running',
    started_at VARCHAR NOT NULL,
    ended_at VARCHAR,
    metadata JSON
);
CREATE INDEX IF NOT EXISTS idx_episodes_agent_id ON episodes(agent_id);
CREATE INDEX IF NOT EXISTS idx_episodes_status ON episodes(status);
CREATE INDEX IF NOT EXISTS idx_episodes_started_at ON episodes(started_at);
";

// steps is append-only; the UNIQUE constraint is the last line of defense
// for index monotonicity when the engine-level checks are bypassed.
pub const CREATE_STEPS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS steps (
    episode_id VARCHAR NOT NULL,
    step_index BIGINT NOT NULL,
    step_type VARCHAR NOT NULL,
    model VARCHAR,
    tool_name VARCHAR,
    tokens BIGINT,
    payload JSON,
    timestamp VARCHAR NOT NULL,
    UNIQUE (episode_id, step_index)
);
CREATE INDEX IF NOT EXISTS idx_steps_episode_id ON steps(episode_id);
";

pub const CREATE_LINKS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS links (
    from_episode_id VARCHAR NOT NULL,
    to_episode_id VARCHAR NOT NULL,
    relation VARCHAR NOT NULL,
    created_at VARCHAR NOT NULL,
    UNIQUE (from_episode_id, to_episode_id, relation),
    CHECK (from_episode_id <> to_episode_id)
);
CREATE INDEX IF NOT EXISTS idx_links_from ON links(from_episode_id);
CREATE INDEX IF NOT EXISTS idx_links_to ON links(to_episode_id);
";

pub fn run_migrations(conn: &duckdb::Connection) -> duckdb::Result<()> {
    conn.execute_batch(CREATE_EPISODES_TABLE)?;
    conn.execute_batch(CREATE_STEPS_TABLE)?;
    conn.execute_batch(CREATE_LINKS_TABLE)?;
    Ok(())
}
