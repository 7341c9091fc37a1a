//! Errors from resolving the engine's directories and from loading, saving or
//! checking its configuration. Each variant names the file or setting at fault.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// No home directory to put `~/.offline-sync` under.
    #[error("Could not determine home directory")]
    HomeDirUnavailable,

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read config file {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Config file {path} is not valid: {source}")]
    ParseConfig {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    WriteConfig {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to encode config: {0}")]
    EncodeConfig(#[source] serde_json::Error),

    /// A setting the engine cannot run with, by its dotted key.
    #[error("Invalid setting {setting}: {reason}")]
    InvalidSetting {
        setting: &'static str,
        reason: &'static str,
    },

    #[error("Invalid URL in {setting}: {source}")]
    InvalidUrl {
        setting: &'static str,
        source: url::ParseError,
    },
}

pub type CoreResult<T> = Result<T, CoreError>;
