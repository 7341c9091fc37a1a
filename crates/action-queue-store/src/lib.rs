//! Durable action queue for the offline sync engine.
//!
//! This crate provides:
//! - `AsyncDatabase`: SQLite on a dedicated executor thread
//! - Versioned migrations for the `queued_actions` table
//! - `QueueStore`: the transactional per-action queue API
//! - `SqliteQueueStore`: the crash-durable implementation
//!
//! # Ordering
//!
//! `dequeue_pending` returns High before Medium before Low, and FIFO within a
//! band (`created_at`, then insertion sequence).
//!
//! # Durability
//!
//! An action is committed before `enqueue` returns. Actions claimed by a drain
//! but never confirmed are returned to `pending` when the store is reopened.
//! A failed attempt that spends the last of an action's budget deletes the row
//! in the same transaction as the increment.

mod error;
mod executor;
mod integrity;
mod migrations;
mod models;
pub mod queries;
mod store;

pub use error::{QueueError, QueueResult};
pub use executor::AsyncDatabase;
pub use integrity::{payload_checksum, Corruption};
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use models::{
    ActionId, ActionKind, ActionPriority, AttemptOutcome, NewQueuedAction, QueuedAction,
    SyncState,
};
pub use store::{QueueStore, SqliteQueueStore};
