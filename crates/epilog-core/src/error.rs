use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("cycle detected: {0}")]
    Cycle(String),

    #[error("inconsistent ledger: {0}")]
    InconsistentLedger(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<duckdb::Error> for Error {
    fn from(e: duckdb::Error) -> Self {
        let msg = e.to_string();
        // DuckDB reports UNIQUE and CHECK violations as constraint errors.
        if msg.contains("Constraint Error") || msg.contains("constraint") {
            Error::Conflict(msg)
        } else {
            Error::Storage(msg)
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
