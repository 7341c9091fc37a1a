//! Configuration management for the sync engine.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default remote API URL (can be overridden at compile time via OFFLINE_SYNC_DEFAULT_API_URL).
pub const DEFAULT_API_URL: &str = match option_env!("OFFLINE_SYNC_DEFAULT_API_URL") {
    Some(url) => url,
    None => "https://api.offline-sync.dev",
};

/// Default probe URL used for latency/throughput sampling.
pub const DEFAULT_PROBE_URL: &str = match option_env!("OFFLINE_SYNC_DEFAULT_PROBE_URL") {
    Some(url) => url,
    None => "https://api.offline-sync.dev/ping",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Main engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Base URL of the remote API actions are dispatched to.
    #[serde(default = "default_api_url")]
    pub remote_api_url: String,
    /// Small resource fetched to measure latency and throughput.
    #[serde(default = "default_probe_url")]
    pub probe_url: String,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub batcher: BatcherSettings,
}

/// Queue draining, retry and backoff settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Sync interval on a Good connection.
    pub base_sync_interval_ms: u64,
    /// Batch size on a Good connection.
    pub base_batch_size: usize,
    /// Upper bound for the adapted sync interval.
    pub max_sync_interval_ms: u64,
    /// `max_attempts` applied when an action does not specify one.
    pub default_max_attempts: u32,
    /// First retry delay.
    pub backoff_base_ms: u64,
    /// Cap for the exponential backoff.
    pub backoff_max_ms: u64,
    /// Timeout for a single remote dispatch.
    pub dispatch_timeout_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            base_sync_interval_ms: 30_000,
            base_batch_size: 20,
            max_sync_interval_ms: 300_000,
            default_max_attempts: 5,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
            dispatch_timeout_ms: 15_000,
        }
    }
}

impl SyncSettings {
    pub fn base_sync_interval(&self) -> Duration {
        Duration::from_millis(self.base_sync_interval_ms)
    }

    pub fn max_sync_interval(&self) -> Duration {
        Duration::from_millis(self.max_sync_interval_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }
}

/// Network sampling settings and quality thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Period between background samples.
    pub sample_period_ms: u64,
    /// Timeout for a single probe request.
    pub probe_timeout_ms: u64,
    /// Latency below which (with enough throughput) the link is Excellent.
    pub excellent_latency_ms: u64,
    /// Throughput (KB/s) above which (with low latency) the link is Excellent.
    pub excellent_throughput: f64,
    /// Latency below which (with enough throughput) the link is Good.
    pub good_latency_ms: u64,
    /// Throughput (KB/s) above which (with acceptable latency) the link is Good.
    pub good_throughput: f64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            sample_period_ms: 30_000,
            probe_timeout_ms: 5_000,
            excellent_latency_ms: 100,
            excellent_throughput: 500.0,
            good_latency_ms: 300,
            good_throughput: 100.0,
        }
    }
}

impl NetworkSettings {
    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// In-memory message cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Process-wide cap on cached messages across all conversations.
    pub max_cached_messages: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_cached_messages: 500,
        }
    }
}

/// Batcher flush settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherSettings {
    /// Flush as soon as this many operations are buffered.
    pub max_batch_size: usize,
    /// Flush this long after the first unflushed operation.
    pub idle_timeout_ms: u64,
}

impl Default for BatcherSettings {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            idle_timeout_ms: 100,
        }
    }
}

impl BatcherSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_probe_url() -> String {
    DEFAULT_PROBE_URL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            remote_api_url: default_api_url(),
            probe_url: default_probe_url(),
            sync: SyncSettings::default(),
            network: NetworkSettings::default(),
            cache: CacheSettings::default(),
            batcher: BatcherSettings::default(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides and validate.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            debug!(path = %config_path.display(), "Loading config file");
            Self::load_from_file(&config_path)?
        } else {
            debug!(path = %config_path.display(), "No config file, using defaults");
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| CoreError::ParseConfig {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self).map_err(CoreError::EncodeConfig)?;
        let path = paths.config_file();
        std::fs::write(&path, content).map_err(|source| CoreError::WriteConfig { path, source })
    }

    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("OFFLINE_SYNC_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(url) = std::env::var("OFFLINE_SYNC_API_URL") {
            self.remote_api_url = url;
        }
        if let Ok(url) = std::env::var("OFFLINE_SYNC_PROBE_URL") {
            self.probe_url = url;
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        self.remote_api_url()?;
        self.probe_url()?;

        let sync = &self.sync;
        check(sync.base_batch_size > 0, "sync.base_batch_size", "must be > 0")?;
        check(sync.default_max_attempts > 0, "sync.default_max_attempts", "must be > 0")?;
        check(
            sync.backoff_base_ms <= sync.backoff_max_ms,
            "sync.backoff_base_ms",
            "must not exceed sync.backoff_max_ms",
        )?;
        check(
            sync.base_sync_interval_ms > 0 && sync.base_sync_interval_ms <= sync.max_sync_interval_ms,
            "sync.base_sync_interval_ms",
            "must be in 1..=sync.max_sync_interval_ms",
        )?;
        check(
            self.network.good_latency_ms >= self.network.excellent_latency_ms,
            "network.good_latency_ms",
            "must be >= network.excellent_latency_ms",
        )?;
        check(self.cache.max_cached_messages > 0, "cache.max_cached_messages", "must be > 0")?;
        check(self.batcher.max_batch_size > 0, "batcher.max_batch_size", "must be > 0")
    }

    /// Get the remote API URL as a parsed URL.
    pub fn remote_api_url(&self) -> CoreResult<Url> {
        parse_url("remote_api_url", &self.remote_api_url)
    }

    /// Get the probe URL as a parsed URL.
    pub fn probe_url(&self) -> CoreResult<Url> {
        parse_url("probe_url", &self.probe_url)
    }
}

fn check(ok: bool, setting: &'static str, reason: &'static str) -> CoreResult<()> {
    if ok {
        Ok(())
    } else {
        Err(CoreError::InvalidSetting { setting, reason })
    }
}

fn parse_url(setting: &'static str, raw: &str) -> CoreResult<Url> {
    Url::parse(raw).map_err(|source| CoreError::InvalidUrl { setting, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.remote_api_url, DEFAULT_API_URL);
        assert_eq!(config.sync.base_sync_interval(), Duration::from_secs(30));
        assert_eq!(config.sync.max_sync_interval(), Duration::from_secs(300));
        assert_eq!(config.network.sample_period(), Duration::from_secs(30));
        assert_eq!(config.batcher.idle_timeout(), Duration::from_millis(100));
        assert_eq!(config.cache.max_cached_messages, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_load_from_file_partial() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        let config_json = r#"{
            "log_level": "debug",
            "sync": { "backoff_base_ms": 250 },
            "cache": { "max_cached_messages": 42 }
        }"#;

        std::fs::write(&config_path, config_json).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.sync.backoff_base_ms, 250);
        assert_eq!(config.sync.backoff_max_ms, 60_000);
        assert_eq!(config.cache.max_cached_messages, 42);
        assert_eq!(config.network, NetworkSettings::default());
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let mut config = Config::default();
        config.sync.default_max_attempts = 9;
        config.save(&paths).unwrap();

        let loaded = Config::load(&paths).unwrap();
        assert_eq!(loaded.sync.default_max_attempts, 9);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.sync, SyncSettings::default());
    }

    #[test]
    fn test_config_invalid_url() {
        let mut config = Config::default();
        config.remote_api_url = "not a valid url".to_string();

        assert!(config.remote_api_url().is_err());
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidUrl { setting: "remote_api_url", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_backoff() {
        let mut config = Config::default();
        config.sync.backoff_base_ms = 10_000;
        config.sync.backoff_max_ms = 1_000;

        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidSetting { setting: "sync.backoff_base_ms", .. }
        ));
        assert!(err.to_string().contains("must not exceed sync.backoff_max_ms"));
    }

    #[test]
    fn test_malformed_config_file_names_path() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, "{ \"sync\": ").unwrap();

        let err = Config::load_from_file(&config_path).unwrap_err();
        match &err {
            CoreError::ParseConfig { path, .. } => assert_eq!(path, &config_path),
            other => panic!("expected ParseConfig, got {:?}", other),
        }
        assert!(err.to_string().contains("config.json"));

        let missing = dir.path().join("missing.json");
        assert!(matches!(
            Config::load_from_file(&missing),
            Err(CoreError::ReadConfig { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let mut config = Config::default();
        config.cache.max_cached_messages = 0;
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidSetting { setting: "cache.max_cached_messages", .. })
        ));

        let mut config = Config::default();
        config.batcher.max_batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.sync.default_max_attempts = 0;
        assert!(config.validate().is_err());
    }
}
