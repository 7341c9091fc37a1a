//! Database migrations.
//!
//! Migrations run in order and are tracked in the `migrations` table.

use crate::QueueResult;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> QueueResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    info!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_queued_actions(conn)?;
    }

    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> QueueResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: the queued_actions table.
///
/// `payload` is JSON text guarded by a SHA-256 `checksum`. `enqueue_seq`
/// breaks `created_at_ms` ties so FIFO holds within a millisecond.
fn migrate_v1_queued_actions(conn: &Connection) -> QueueResult<()> {
    info!("Applying migration v1: queued_actions");

    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS queued_actions (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            priority_rank INTEGER NOT NULL,
            target TEXT,
            payload TEXT NOT NULL,
            checksum TEXT NOT NULL,
            sync_state TEXT NOT NULL DEFAULT 'pending',
            attempt INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL,
            last_error TEXT,
            created_at_ms INTEGER NOT NULL,
            last_attempt_at_ms INTEGER,
            enqueue_seq INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_queued_actions_dequeue
            ON queued_actions(sync_state, priority_rank, created_at_ms, enqueue_seq);
        CREATE INDEX IF NOT EXISTS idx_queued_actions_target
            ON queued_actions(target);
        ",
    )?;
    record_migration(&tx, 1, "queued_actions")?;
    tx.commit()?;

    Ok(())
}
