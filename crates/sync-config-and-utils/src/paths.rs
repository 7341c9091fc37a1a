//! File system paths for the sync engine.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Database filename under the base directory.
const DATABASE_FILE_NAME: &str = "action-queue.sqlite";

/// Resolves where the engine keeps its config, queue database and logs.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory (~/.offline-sync)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.offline-sync`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir().ok_or(CoreError::HomeDirUnavailable)?;

        Ok(Self {
            base_dir: home.join(".offline-sync"),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.offline-sync).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.offline-sync/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the durable queue database path (~/.offline-sync/action-queue.sqlite).
    pub fn database_file(&self) -> PathBuf {
        self.base_dir.join(DATABASE_FILE_NAME)
    }

    /// Get the logs directory (~/.offline-sync/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the JSONL log file path (~/.offline-sync/logs/engine.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("engine.jsonl")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        for dir in [self.base_dir.clone(), self.logs_dir()] {
            std::fs::create_dir_all(&dir)
                .map_err(|source| CoreError::CreateDir { path: dir, source })?;
        }
        Ok(())
    }
}
