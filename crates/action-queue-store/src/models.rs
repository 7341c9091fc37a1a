//! Queue model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Locally generated action identifier, stable across retries.
///
/// The id is the only handle used to confirm, retry or remove an action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    /// Generate a fresh UUID v4 id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What kind of remote mutation an action represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Message,
    FileUpload,
    ApiCall,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::FileUpload => "file_upload",
            Self::ApiCall => "api_call",
        }
    }

    /// Strict parse; unknown values mean the row is corrupt.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "message" => Some(Self::Message),
            "file_upload" => Some(Self::FileUpload),
            "api_call" => Some(Self::ApiCall),
            _ => None,
        }
    }
}

/// Dispatch priority band. Lower rank drains first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionPriority {
    High,
    Medium,
    Low,
}

impl ActionPriority {
    pub fn rank(&self) -> i64 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }

    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            0 => Some(Self::High),
            1 => Some(Self::Medium),
            2 => Some(Self::Low),
            _ => None,
        }
    }
}

impl Default for ActionPriority {
    fn default() -> Self {
        Self::Medium
    }
}

/// Durable sync state of a queued row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Waiting to be dispatched.
    Pending,
    /// Claimed by a drain; reset to Pending on restart if never resolved.
    InFlight,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
        }
    }
}

/// An action awaiting remote confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
    pub id: ActionId,
    pub kind: ActionKind,
    pub priority: ActionPriority,
    /// Conversation or other target key the action applies to.
    pub target: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// Failed dispatches so far.
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl QueuedAction {
    /// True once no retry budget remains.
    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt)
    }
}

/// What recording a failed dispatch did to the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Back to pending with this many failed attempts.
    Retry(u32),
    /// Budget spent; the row was deleted together with the increment.
    Exhausted(u32),
    /// No row with that id.
    Missing,
}

/// A new action for insertion. The store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewQueuedAction {
    pub kind: ActionKind,
    pub priority: ActionPriority,
    pub target: Option<String>,
    pub payload: serde_json::Value,
    pub max_attempts: u32,
}

impl NewQueuedAction {
    /// Contract checks applied before anything touches disk.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.payload.is_null() {
            return Err("payload must not be null".to_string());
        }
        if let Some(target) = &self.target {
            if target.trim().is_empty() {
                return Err("target must not be blank".to_string());
            }
        }
        if self.kind == ActionKind::Message && self.target.is_none() {
            return Err("message actions need a conversation target".to_string());
        }
        Ok(())
    }
}
