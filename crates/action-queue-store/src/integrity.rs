//! Row integrity checks.
//!
//! Raw rows come off the executor thread untouched; decoding and checksum
//! verification run here, on the caller's side.

use crate::queries::RawActionRow;
use crate::{ActionId, ActionKind, ActionPriority, QueuedAction};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex SHA-256 of the stored payload text.
pub fn payload_checksum(payload_json: &str) -> String {
    let digest = Sha256::digest(payload_json.as_bytes());
    digest.iter().map(|byte| format!("{:02x}", byte)).collect()
}

/// Why a stored row was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Corruption {
    UnknownKind(String),
    UnknownPriority(i64),
    ChecksumMismatch,
    InvalidPayload(String),
    InvalidTimestamp(i64),
    InvalidCounter(i64),
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownKind(kind) => write!(f, "unknown kind {:?}", kind),
            Self::UnknownPriority(rank) => write!(f, "unknown priority rank {}", rank),
            Self::ChecksumMismatch => f.write_str("payload checksum mismatch"),
            Self::InvalidPayload(err) => write!(f, "payload is not valid JSON: {}", err),
            Self::InvalidTimestamp(ms) => write!(f, "timestamp out of range: {}", ms),
            Self::InvalidCounter(value) => write!(f, "attempt counter out of range: {}", value),
        }
    }
}

fn decode_timestamp(ms: i64) -> Result<DateTime<Utc>, Corruption> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or(Corruption::InvalidTimestamp(ms))
}

fn decode_counter(value: i64) -> Result<u32, Corruption> {
    u32::try_from(value).map_err(|_| Corruption::InvalidCounter(value))
}

/// Decode a raw row, verifying every field before trusting it.
pub(crate) fn decode_row(raw: RawActionRow) -> Result<QueuedAction, Corruption> {
    let kind = ActionKind::parse(&raw.kind).ok_or_else(|| Corruption::UnknownKind(raw.kind.clone()))?;
    let priority = ActionPriority::from_rank(raw.priority_rank)
        .ok_or(Corruption::UnknownPriority(raw.priority_rank))?;

    if payload_checksum(&raw.payload) != raw.checksum {
        return Err(Corruption::ChecksumMismatch);
    }
    let payload: serde_json::Value = serde_json::from_str(&raw.payload)
        .map_err(|e| Corruption::InvalidPayload(e.to_string()))?;

    let created_at = decode_timestamp(raw.created_at_ms)?;
    let last_attempt_at = raw.last_attempt_at_ms.map(decode_timestamp).transpose()?;

    Ok(QueuedAction {
        id: ActionId::from_string(raw.id),
        kind,
        priority,
        target: raw.target,
        payload,
        created_at,
        attempt: decode_counter(raw.attempt)?,
        max_attempts: decode_counter(raw.max_attempts)?,
        last_error: raw.last_error,
        last_attempt_at,
    })
}
