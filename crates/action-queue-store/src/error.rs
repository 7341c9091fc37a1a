//! Queue store error types.

use thiserror::Error;

/// Queue store error type.
#[derive(Error, Debug)]
pub enum QueueError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Executor connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Caller passed an action the queue cannot hold
    #[error("Invalid action: {0}")]
    InvalidAction(String),
}

/// Result type alias using QueueError.
pub type QueueResult<T> = Result<T, QueueError>;
