//! Error types for dispatch and the engine facade.

use action_queue_store::QueueError;
use message_cache::CacheError;
use network_quality_monitor::MonitorError;
use sync_config_and_utils::CoreError;
use thiserror::Error;

/// Outcome of a failed remote dispatch.
///
/// The split decides retry policy: transient failures count toward the
/// action's attempts and drive backoff, permanent ones end the action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Network unreachable, timeout, throttling or a server-side error.
    #[error("transient dispatch failure: {0}")]
    Transient(String),

    /// Validation, authorization or payload rejection.
    #[error("permanent dispatch failure: {0}")]
    Permanent(String),
}

impl DispatchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(msg) | Self::Permanent(msg) => msg,
        }
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors surfaced to engine callers.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The caller broke the enqueue contract.
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Network monitor error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    Config(#[from] CoreError),

    /// HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// The engine has been shut down.
    #[error("Engine is stopped")]
    Stopped,
}

pub type EngineResult<T> = Result<T, EngineError>;
