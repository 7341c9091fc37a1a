//! # Observability
//!
//! Structured logging for the offline sync engine.
//!
//! Components are log producers only. They call [`init`] once (usually via the
//! host application's bootstrap) and use the standard `tracing` macros
//! everywhere else. Where the lines end up is decided here:
//!
//! - one JSON object per line, appended to `~/.offline-sync/logs/engine.jsonl`
//!   (or [`LogConfig::log_path`])
//! - optionally a compact human-readable stream on stderr
//!
//! ```rust,ignore
//! observability::init("offline-sync");
//! tracing::info!(queue_depth = 3, "engine started");
//! ```
//!
//! `RUST_LOG` always wins over [`LogConfig::default_level`].

mod json_layer;
mod writer;

pub use json_layer::{JsonLayer, LogEntry};
pub use writer::{AppendLogWriter, WriterFactory};

use std::io;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, written into every log line.
    pub service_name: String,

    /// Default filter (e.g. "debug", "info,action_queue_store=debug").
    pub default_level: String,

    /// Custom JSONL file path. Defaults to `~/.offline-sync/logs/engine.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also emit compact logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Default JSONL location, `None` when no home directory can be resolved.
pub fn default_log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| {
        home.join(".offline-sync")
            .join("logs")
            .join("engine.jsonl")
    })
}

/// Initialize logging with defaults for the given service.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with a custom configuration.
///
/// If the log file cannot be opened the JSON layer is skipped and logs go to
/// stderr instead, so a read-only home directory never takes the engine down.
/// Calling this twice is a no-op for the second call.
pub fn init_with_config(config: LogConfig) {
    let file_writer = config
        .log_path
        .clone()
        .or_else(default_log_path)
        .map(|path| AppendLogWriter::open(&path).map(|writer| (path, writer)));

    let (json_layer, log_path, open_error) = match file_writer {
        Some(Ok((path, writer))) => (
            Some(JsonLayer::new(
                config.service_name.clone(),
                WriterFactory::new(writer),
            )),
            Some(path),
            None,
        ),
        Some(Err(err)) => (None, None, Some(err)),
        None => (None, None, None),
    };

    let stderr_enabled = config.also_stderr || json_layer.is_none();
    let stderr_layer = stderr_enabled.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    let installed = tracing_subscriber::registry()
        .with(json_layer.map(|layer| layer.with_filter(env_filter(&config.default_level))))
        .with(stderr_layer)
        .try_init();

    if installed.is_err() {
        return;
    }

    if let Some(err) = open_error {
        tracing::warn!(error = %err, "log file unavailable, logging to stderr only");
    }
    if let Some(path) = log_path {
        tracing::info!(
            service = %config.service_name,
            log_path = %path.display(),
            "observability initialized"
        );
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}
