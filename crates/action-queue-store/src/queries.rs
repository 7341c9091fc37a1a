//! Standalone query functions over the `queued_actions` table.
//!
//! Each function takes a `&Connection` and runs on the executor thread.
//! Rows come back raw; see `integrity` for decoding.

use crate::{AttemptOutcome, QueueResult, SyncState};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

const SELECT_COLUMNS: &str = "id, kind, priority_rank, target, payload, checksum, attempt,
     max_attempts, last_error, created_at_ms, last_attempt_at_ms";

const DEQUEUE_ORDER: &str = "ORDER BY priority_rank ASC, created_at_ms ASC, enqueue_seq ASC";

/// A row exactly as stored, before integrity checks.
#[derive(Debug, Clone)]
pub struct RawActionRow {
    pub id: String,
    pub kind: String,
    pub priority_rank: i64,
    pub target: Option<String>,
    pub payload: String,
    pub checksum: String,
    pub attempt: i64,
    pub max_attempts: i64,
    pub last_error: Option<String>,
    pub created_at_ms: i64,
    pub last_attempt_at_ms: Option<i64>,
}

impl RawActionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            priority_rank: row.get(2)?,
            target: row.get(3)?,
            payload: row.get(4)?,
            checksum: row.get(5)?,
            attempt: row.get(6)?,
            max_attempts: row.get(7)?,
            last_error: row.get(8)?,
            created_at_ms: row.get(9)?,
            last_attempt_at_ms: row.get(10)?,
        })
    }
}

/// Insert a new pending row. `enqueue_seq` is assigned here.
pub fn insert_action(conn: &Connection, row: &RawActionRow) -> QueueResult<()> {
    conn.execute(
        "INSERT INTO queued_actions (id, kind, priority_rank, target, payload, checksum, sync_state,
             attempt, max_attempts, last_error, created_at_ms, last_attempt_at_ms, enqueue_seq)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
             (SELECT COALESCE(MAX(enqueue_seq), 0) + 1 FROM queued_actions))",
        params![
            row.id,
            row.kind,
            row.priority_rank,
            row.target,
            row.payload,
            row.checksum,
            SyncState::Pending.as_str(),
            row.attempt,
            row.max_attempts,
            row.last_error,
            row.created_at_ms,
            row.last_attempt_at_ms,
        ],
    )?;
    debug!(id = %row.id, kind = %row.kind, "Inserted queued action");
    Ok(())
}

/// Claim up to `limit` pending rows in dequeue order, marking them in flight.
///
/// Select and update share one transaction so two drains can never claim the
/// same row.
pub fn claim_pending(conn: &Connection, limit: usize) -> QueueResult<Vec<RawActionRow>> {
    let tx = conn.unchecked_transaction()?;

    let rows = {
        let mut stmt = tx.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM queued_actions WHERE sync_state = ?1 {DEQUEUE_ORDER} LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![SyncState::Pending.as_str(), limit as i64], RawActionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    {
        let mut update = tx.prepare("UPDATE queued_actions SET sync_state = ?1 WHERE id = ?2")?;
        for row in &rows {
            update.execute(params![SyncState::InFlight.as_str(), row.id])?;
        }
    }

    tx.commit()?;
    Ok(rows)
}

/// Delete one row. Returns whether it existed.
pub fn delete_action(conn: &Connection, id: &str) -> QueueResult<bool> {
    let affected = conn.execute("DELETE FROM queued_actions WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}

/// Delete several rows in one transaction.
pub fn delete_actions(conn: &Connection, ids: &[String]) -> QueueResult<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut removed = 0;
    {
        let mut stmt = tx.prepare("DELETE FROM queued_actions WHERE id = ?1")?;
        for id in ids {
            removed += stmt.execute(params![id])?;
        }
    }
    tx.commit()?;
    Ok(removed)
}

/// Record a failed dispatch: bump `attempt`, store the error and hand the row
/// back to `pending`. A row whose budget is now spent is deleted in the same
/// transaction, so a crash can never leave it behind for another send.
pub fn record_failed_attempt(
    conn: &Connection,
    id: &str,
    error: &str,
    now_ms: i64,
) -> QueueResult<AttemptOutcome> {
    let tx = conn.unchecked_transaction()?;
    let counts: Option<(i64, i64)> = tx
        .query_row(
            "UPDATE queued_actions
             SET attempt = attempt + 1, last_error = ?2, last_attempt_at_ms = ?3, sync_state = ?4
             WHERE id = ?1
             RETURNING attempt, max_attempts",
            params![id, error, now_ms, SyncState::Pending.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let outcome = match counts {
        None => AttemptOutcome::Missing,
        Some((attempt, max_attempts)) if attempt >= max_attempts => {
            tx.execute("DELETE FROM queued_actions WHERE id = ?1", params![id])?;
            AttemptOutcome::Exhausted(attempt_count(attempt))
        }
        Some((attempt, _)) => AttemptOutcome::Retry(attempt_count(attempt)),
    };

    tx.commit()?;
    Ok(outcome)
}

fn attempt_count(raw: i64) -> u32 {
    u32::try_from(raw).unwrap_or(u32::MAX)
}

/// Return claimed rows to `pending` without touching their attempt count.
pub fn release_actions(conn: &Connection, ids: &[String]) -> QueueResult<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut released = 0;
    {
        let mut stmt = tx.prepare(
            "UPDATE queued_actions SET sync_state = ?1 WHERE id = ?2 AND sync_state = ?3",
        )?;
        for id in ids {
            released += stmt.execute(params![
                SyncState::Pending.as_str(),
                id,
                SyncState::InFlight.as_str()
            ])?;
        }
    }
    tx.commit()?;
    Ok(released)
}

/// Reset every in-flight row to pending. Used on open.
pub fn reset_in_flight(conn: &Connection) -> QueueResult<usize> {
    let reset = conn.execute(
        "UPDATE queued_actions SET sync_state = ?1 WHERE sync_state = ?2",
        params![SyncState::Pending.as_str(), SyncState::InFlight.as_str()],
    )?;
    Ok(reset)
}

/// Every row in dequeue order, regardless of state.
pub fn list_all(conn: &Connection) -> QueueResult<Vec<RawActionRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM queued_actions {DEQUEUE_ORDER}"))?;
    let rows = stmt
        .query_map([], RawActionRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Rows addressed to one target, in dequeue order.
pub fn list_for_target(conn: &Connection, target: &str) -> QueueResult<Vec<RawActionRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM queued_actions WHERE target = ?1 {DEQUEUE_ORDER}"
    ))?;
    let rows = stmt
        .query_map(params![target], RawActionRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Total rows, pending and in flight.
pub fn count_actions(conn: &Connection) -> QueueResult<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM queued_actions", [], |row| row.get(0))?;
    Ok(count as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{payload_checksum, run_migrations};

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn row(id: &str, rank: i64, created_at_ms: i64) -> RawActionRow {
        let payload = format!(r#"{{"id":"{}"}}"#, id);
        RawActionRow {
            id: id.to_string(),
            kind: "api_call".to_string(),
            priority_rank: rank,
            target: None,
            checksum: payload_checksum(&payload),
            payload,
            attempt: 0,
            max_attempts: 3,
            last_error: None,
            created_at_ms,
            last_attempt_at_ms: None,
        }
    }

    fn ids(rows: &[RawActionRow]) -> Vec<&str> {
        rows.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_claim_orders_by_priority_then_time_then_sequence() {
        let conn = conn();
        insert_action(&conn, &row("low", 2, 1)).unwrap();
        insert_action(&conn, &row("high-late", 0, 5)).unwrap();
        insert_action(&conn, &row("high-early-a", 0, 3)).unwrap();
        insert_action(&conn, &row("high-early-b", 0, 3)).unwrap();
        insert_action(&conn, &row("medium", 1, 0)).unwrap();

        let claimed = claim_pending(&conn, 10).unwrap();
        assert_eq!(
            ids(&claimed),
            vec!["high-early-a", "high-early-b", "high-late", "medium", "low"]
        );
    }

    #[test]
    fn test_claimed_rows_are_not_claimed_twice() {
        let conn = conn();
        insert_action(&conn, &row("a", 1, 1)).unwrap();
        insert_action(&conn, &row("b", 1, 2)).unwrap();

        assert_eq!(ids(&claim_pending(&conn, 1).unwrap()), vec!["a"]);
        assert_eq!(ids(&claim_pending(&conn, 5).unwrap()), vec!["b"]);
        assert!(claim_pending(&conn, 5).unwrap().is_empty());

        assert_eq!(reset_in_flight(&conn).unwrap(), 2);
        assert_eq!(claim_pending(&conn, 5).unwrap().len(), 2);
    }

    #[test]
    fn test_failed_attempt_returns_row_to_pending() {
        let conn = conn();
        insert_action(&conn, &row("a", 0, 1)).unwrap();
        claim_pending(&conn, 1).unwrap();

        assert_eq!(record_failed_attempt(&conn, "a", "boom", 42).unwrap(), Some(1));
        assert_eq!(record_failed_attempt(&conn, "missing", "boom", 42).unwrap(), None);

        let claimed = claim_pending(&conn, 1).unwrap();
        assert_eq!(claimed[0].attempt, 1);
        assert_eq!(claimed[0].last_error.as_deref(), Some("boom"));
        assert_eq!(claimed[0].last_attempt_at_ms, Some(42));
    }

    #[test]
    fn test_release_only_touches_in_flight_rows() {
        let conn = conn();
        insert_action(&conn, &row("a", 0, 1)).unwrap();
        insert_action(&conn, &row("b", 0, 2)).unwrap();
        claim_pending(&conn, 1).unwrap();

        let released = release_actions(&conn, &["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(released, 1);
        assert_eq!(claim_pending(&conn, 5).unwrap().len(), 2);
    }

    #[test]
    fn test_delete_and_count() {
        let conn = conn();
        insert_action(&conn, &row("a", 0, 1)).unwrap();
        insert_action(&conn, &row("b", 0, 2)).unwrap();
        insert_action(&conn, &row("c", 0, 3)).unwrap();
        assert_eq!(count_actions(&conn).unwrap(), 3);

        assert!(delete_action(&conn, "a").unwrap());
        assert!(!delete_action(&conn, "a").unwrap());
        assert_eq!(delete_actions(&conn, &["b".to_string(), "zz".to_string()]).unwrap(), 1);
        assert_eq!(count_actions(&conn).unwrap(), 1);
    }

    #[test]
    fn test_last_failed_attempt_deletes_row() {
        let conn = conn();
        insert_action(&conn, &row("a", 0, 1)).unwrap();
        claim_pending(&conn, 1).unwrap();

        assert_eq!(record_failed_attempt(&conn, "a", "503", 10).unwrap(), AttemptOutcome::Retry(1));
        assert_eq!(record_failed_attempt(&conn, "a", "503", 20).unwrap(), AttemptOutcome::Retry(2));
        assert_eq!(count_actions(&conn).unwrap(), 1);

        assert_eq!(
            record_failed_attempt(&conn, "a", "timeout", 30).unwrap(),
            AttemptOutcome::Exhausted(3)
        );
        assert_eq!(count_actions(&conn).unwrap(), 0);
        assert_eq!(record_failed_attempt(&conn, "a", "late", 40).unwrap(), AttemptOutcome::Missing);
    }

    #[test]
    fn test_list_for_target() {
        let conn = conn();
        let mut a = row("a", 1, 1);
        a.target = Some("conv-1".to_string());
        let mut b = row("b", 0, 2);
        b.target = Some("conv-2".to_string());
        insert_action(&conn, &a).unwrap();
        insert_action(&conn, &b).unwrap();

        assert_eq!(ids(&list_for_target(&conn, "conv-1").unwrap()), vec!["a"]);
        assert_eq!(ids(&list_all(&conn).unwrap()), vec!["b", "a"]);
    }
}
