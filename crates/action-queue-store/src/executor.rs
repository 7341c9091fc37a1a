//! Async SQLite executor using a dedicated background thread.
//!
//! All statements are sent through a channel and executed in FIFO order on
//! one thread. This is what serialises operations targeting the same action:
//! two writes to one id can never interleave.
//!
//! Only SQL and lightweight row mapping belong inside [`AsyncDatabase::call`].
//! Checksums, JSON decoding and anything else CPU-bound happen on the caller's
//! side so the queue thread is never starved.

use crate::{migrations, QueueError, QueueResult};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::info;

fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> QueueError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => QueueError::Sqlite(e),
        tokio_rusqlite::Error::Close(_) => QueueError::Connection("Connection closed".to_string()),
        other => QueueError::Connection(other.to_string()),
    }
}

/// Async SQLite database with a dedicated executor thread.
#[derive(Clone)]
pub struct AsyncDatabase {
    conn: Connection,
    path: String,
}

impl AsyncDatabase {
    /// Open a database at the given path.
    ///
    /// Creates the file and parent directory if needed, enables WAL with
    /// `synchronous = FULL` so a committed enqueue survives a crash, and runs
    /// pending migrations.
    pub async fn open(path: &Path) -> QueueResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();
        info!(path = %path_str, "Opening action queue database");

        let conn = Connection::open(&path_str)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        Self::initialize(conn, path_str).await
    }

    /// Open a private in-memory database (nothing survives a restart).
    pub async fn open_in_memory() -> QueueResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        Self::initialize(conn, ":memory:".to_string()).await
    }

    async fn initialize(conn: Connection, path: String) -> QueueResult<Self> {
        conn.call(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = FULL;
                PRAGMA temp_store = MEMORY;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
            Ok(())
        })
        .await
        .map_err(from_tokio_rusqlite)?;

        conn.call(|conn| {
            migrations::run_migrations(conn)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            Ok(())
        })
        .await
        .map_err(from_tokio_rusqlite)?;

        info!(path = %path, "Action queue database ready");

        Ok(Self { conn, path })
    }

    /// Execute a closure on the database connection.
    ///
    /// The closure runs on the dedicated SQLite thread; the caller's task is
    /// parked until the result is ready.
    pub async fn call<F, T>(&self, f: F) -> QueueResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> QueueResult<T> + Send + 'static,
        T: Send + 'static,
    {
        // Our own result rides inside tokio_rusqlite's Ok so domain errors
        // come back untouched.
        let outer_result = self
            .conn
            .call(move |conn| Ok(f(conn)))
            .await;

        match outer_result {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    /// Execute a closure that returns a rusqlite::Result.
    pub async fn call_sqlite<F, T>(&self, f: F) -> QueueResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(conn)?))
            .await
            .map_err(from_tokio_rusqlite)
    }

    /// Close the connection after pending operations complete.
    pub async fn close(self) -> QueueResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| QueueError::Connection(format!("Failed to close database: {:?}", e)))?;
        info!(path = %self.path, "Action queue database closed");
        Ok(())
    }
}
