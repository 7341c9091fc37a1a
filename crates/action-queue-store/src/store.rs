//! The queue API and its SQLite implementation.

use crate::integrity::{decode_row, payload_checksum};
use crate::queries::{self, RawActionRow};
use crate::{
    ActionId, AsyncDatabase, AttemptOutcome, NewQueuedAction, QueueError, QueueResult,
    QueuedAction,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{debug, info, warn};

/// Durable store of actions awaiting remote confirmation.
///
/// Every operation is atomic per action. An action returned by
/// `dequeue_pending` stays claimed until it is confirmed, retried, released
/// or removed, so concurrent drains never see the same action twice.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a new action. The write is committed before this returns.
    async fn enqueue(&self, action: NewQueuedAction) -> QueueResult<QueuedAction>;

    /// Claim up to `limit` pending actions, highest priority first and FIFO
    /// within a band. Corrupt rows are dropped and logged.
    async fn dequeue_pending(&self, limit: usize) -> QueueResult<Vec<QueuedAction>>;

    /// The remote side accepted the action; delete it.
    async fn mark_confirmed(&self, id: &ActionId) -> QueueResult<bool>;

    /// Record a retryable failure. When this spends the last attempt the row
    /// is deleted atomically with the increment and `Exhausted` is returned.
    async fn increment_attempt(&self, id: &ActionId, error: &str) -> QueueResult<AttemptOutcome>;

    /// Put claimed actions back without counting an attempt.
    async fn release(&self, ids: &[ActionId]) -> QueueResult<usize>;

    /// Delete an action without confirming it (permanent failure or exhaustion).
    async fn remove(&self, id: &ActionId) -> QueueResult<bool>;

    /// All actions, pending and in flight, in dequeue order.
    async fn all(&self) -> QueueResult<Vec<QueuedAction>>;

    /// Queued actions for one target, in dequeue order.
    async fn pending_for_target(&self, target: &str) -> QueueResult<Vec<QueuedAction>>;

    /// Number of queued actions.
    async fn depth(&self) -> QueueResult<usize>;
}

/// SQLite-backed [`QueueStore`].
#[derive(Clone)]
pub struct SqliteQueueStore {
    db: AsyncDatabase,
}

impl SqliteQueueStore {
    /// Open (or create) the queue at `path` and recover interrupted drains.
    pub async fn open(path: &Path) -> QueueResult<Self> {
        let store = Self {
            db: AsyncDatabase::open(path).await?,
        };
        store.recover().await?;
        Ok(store)
    }

    /// Open a non-durable queue, mostly for tests.
    pub async fn open_in_memory() -> QueueResult<Self> {
        let store = Self {
            db: AsyncDatabase::open_in_memory().await?,
        };
        store.recover().await?;
        Ok(store)
    }

    /// Return rows left in flight by a previous process to `pending`.
    pub async fn recover(&self) -> QueueResult<usize> {
        let reset = self.db.call(queries::reset_in_flight).await?;
        if reset > 0 {
            info!(count = reset, "Recovered in-flight actions from previous run");
        }
        Ok(reset)
    }

    pub fn database(&self) -> &AsyncDatabase {
        &self.db
    }

    /// Close the underlying connection after queued statements finish.
    pub async fn close(self) -> QueueResult<()> {
        self.db.close().await
    }

    /// Decode raw rows, deleting any that fail integrity checks.
    async fn decode_rows(&self, rows: Vec<RawActionRow>) -> QueueResult<Vec<QueuedAction>> {
        let mut actions = Vec::with_capacity(rows.len());
        let mut corrupt = Vec::new();

        for raw in rows {
            let id = raw.id.clone();
            match decode_row(raw) {
                Ok(action) => actions.push(action),
                Err(reason) => {
                    warn!(id = %id, reason = %reason, "Dropping corrupt queued action");
                    corrupt.push(id);
                }
            }
        }

        if !corrupt.is_empty() {
            let removed = self
                .db
                .call(move |conn| queries::delete_actions(conn, &corrupt))
                .await?;
            warn!(count = removed, "Removed corrupt queued actions");
        }

        Ok(actions)
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn enqueue(&self, action: NewQueuedAction) -> QueueResult<QueuedAction> {
        action.validate().map_err(QueueError::InvalidAction)?;

        let payload_text = serde_json::to_string(&action.payload)?;
        // Stored timestamps have millisecond resolution; return exactly what
        // a later read will produce.
        let created_at_ms = Utc::now().timestamp_millis();
        let created_at = DateTime::from_timestamp_millis(created_at_ms).unwrap_or_else(Utc::now);
        let queued = QueuedAction {
            id: ActionId::new(),
            kind: action.kind,
            priority: action.priority,
            target: action.target,
            payload: action.payload,
            created_at,
            attempt: 0,
            max_attempts: action.max_attempts,
            last_error: None,
            last_attempt_at: None,
        };

        let raw = RawActionRow {
            id: queued.id.as_str().to_string(),
            kind: queued.kind.as_str().to_string(),
            priority_rank: queued.priority.rank(),
            target: queued.target.clone(),
            checksum: payload_checksum(&payload_text),
            payload: payload_text,
            attempt: 0,
            max_attempts: i64::from(queued.max_attempts),
            last_error: None,
            created_at_ms,
            last_attempt_at_ms: None,
        };

        self.db.call(move |conn| queries::insert_action(conn, &raw)).await?;

        debug!(
            id = %queued.id,
            kind = queued.kind.as_str(),
            priority = ?queued.priority,
            "Enqueued action"
        );
        Ok(queued)
    }

    async fn dequeue_pending(&self, limit: usize) -> QueueResult<Vec<QueuedAction>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let rows = self
            .db
            .call(move |conn| queries::claim_pending(conn, limit))
            .await?;
        self.decode_rows(rows).await
    }

    async fn mark_confirmed(&self, id: &ActionId) -> QueueResult<bool> {
        let id = id.as_str().to_string();
        let removed = self
            .db
            .call(move |conn| queries::delete_action(conn, &id))
            .await?;
        Ok(removed)
    }

    async fn increment_attempt(&self, id: &ActionId, error: &str) -> QueueResult<AttemptOutcome> {
        let id = id.as_str().to_string();
        let error = error.to_string();
        let now_ms = Utc::now().timestamp_millis();
        self.db
            .call(move |conn| queries::record_failed_attempt(conn, &id, &error, now_ms))
            .await
    }

    async fn release(&self, ids: &[ActionId]) -> QueueResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = ids.iter().map(|id| id.as_str().to_string()).collect();
        self.db
            .call(move |conn| queries::release_actions(conn, &ids))
            .await
    }

    async fn remove(&self, id: &ActionId) -> QueueResult<bool> {
        let id = id.as_str().to_string();
        self.db
            .call(move |conn| queries::delete_action(conn, &id))
            .await
    }

    async fn all(&self) -> QueueResult<Vec<QueuedAction>> {
        let rows = self.db.call(queries::list_all).await?;
        self.decode_rows(rows).await
    }

    async fn pending_for_target(&self, target: &str) -> QueueResult<Vec<QueuedAction>> {
        let target = target.to_string();
        let rows = self
            .db
            .call(move |conn| queries::list_for_target(conn, &target))
            .await?;
        self.decode_rows(rows).await
    }

    async fn depth(&self) -> QueueResult<usize> {
        self.db.call(queries::count_actions).await
    }
}
