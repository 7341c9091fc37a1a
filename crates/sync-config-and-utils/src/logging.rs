//! Logging bootstrap.
//!
//! The engine is a library, so the host calls [`init_logging`] once at
//! startup. Lines go to the JSONL file under [`Paths::log_file`]; stderr gets a
//! compact copy unless `OFFLINE_SYNC_LOG_STDERR` is set to a false value.

use crate::{Config, Paths};
use observability::LogConfig;

const SERVICE_NAME: &str = "offline-sync";
const STDERR_ENV: &str = "OFFLINE_SYNC_LOG_STDERR";

/// Install the global subscriber. `RUST_LOG` overrides `config.log_level`.
pub fn init_logging(config: &Config, paths: &Paths) {
    let stderr = std::env::var(STDERR_ENV).ok();
    observability::init_with_config(log_config(config, paths, stderr.as_deref()));
}

fn log_config(config: &Config, paths: &Paths, stderr: Option<&str>) -> LogConfig {
    let level = config.log_level.trim();
    LogConfig {
        service_name: SERVICE_NAME.to_string(),
        default_level: if level.is_empty() { "info" } else { level }.to_string(),
        log_path: Some(paths.log_file()),
        also_stderr: stderr.map_or(true, |raw| !is_false(raw)),
    }
}

fn is_false(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off")
}
