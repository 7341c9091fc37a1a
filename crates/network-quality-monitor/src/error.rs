//! Error types for network monitoring.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// Transport-level failure that is not a plain "unreachable".
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Probe could not be constructed or configured.
    #[error("Probe configuration error: {0}")]
    Config(String),

    /// `start` was called on a monitor whose loop is already running.
    #[error("Network monitor already started")]
    AlreadyStarted,
}

pub type MonitorResult<T> = Result<T, MonitorError>;
