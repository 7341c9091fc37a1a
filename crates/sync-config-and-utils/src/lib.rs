//! Configuration, filesystem paths, and logging bootstrap for the offline sync engine.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    BatcherSettings, CacheSettings, Config, NetworkSettings, SyncSettings, DEFAULT_API_URL,
    DEFAULT_LOG_LEVEL, DEFAULT_PROBE_URL,
};
pub use error::{CoreError, CoreResult};
pub use logging::init_logging;
pub use paths::Paths;
