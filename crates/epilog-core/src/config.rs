use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub db_path: PathBuf,
    /// Hard cap on `list` page sizes.
    pub max_page_size: usize,
    pub default_page_size: usize,
    /// Deadline for a single write; on expiry the store is left unchanged.
    pub write_deadline: Duration,
    /// Retries for transient storage failures before surfacing as fatal.
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
    /// An accumulation idle longer than this is flushed by the sweep.
    pub idle_window: Duration,
    pub sweep_interval: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("epilog.db"),
            max_page_size: 500,
            default_page_size: 50,
            write_deadline: Duration::from_secs(10),
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(50),
            idle_window: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
        }
    }
}
