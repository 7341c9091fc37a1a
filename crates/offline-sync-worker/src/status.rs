//! Observable sync state and drain reports.

use action_queue_store::QueuedAction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Snapshot of the processor's state, published on every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_syncing: bool,
    /// When the last drain finished.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Drains in a row that ended with retryable failures.
    pub consecutive_failures: u32,
    pub queue_depth: usize,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// Rejected by the remote; never retried.
    Permanent,
    /// Retry budget used up.
    Exhausted,
}

/// An action that will never be dispatched again and is gone from the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalFailure {
    pub action: QueuedAction,
    pub reason: TerminalReason,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Completed,
    Skipped(SkipReason),
    /// Another drain held the guard; this trigger was coalesced into it.
    AlreadyRunning,
}

/// What one call to `process_queue` did.
#[derive(Debug, Clone, PartialEq)]
pub struct DrainReport {
    pub outcome: DrainOutcome,
    pub dispatched: usize,
    pub confirmed: usize,
    pub retried: usize,
    pub terminal: usize,
    /// Claimed actions handed back unattempted because a stop was requested.
    pub released: usize,
    pub storage_errors: usize,
    /// Delay waited before returning, when retries remain.
    pub backoff: Option<Duration>,
}

impl DrainReport {
    pub(crate) fn new(outcome: DrainOutcome) -> Self {
        Self {
            outcome,
            dispatched: 0,
            confirmed: 0,
            retried: 0,
            terminal: 0,
            released: 0,
            storage_errors: 0,
            backoff: None,
        }
    }

    /// Retryable trouble happened; this drain counts as a failure.
    pub fn has_retryable_failures(&self) -> bool {
        self.retried > 0 || self.storage_errors > 0
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == DrainOutcome::Completed
    }
}
