//! Network quality monitoring and adaptive sync parameters.
//!
//! [`NetworkMonitor`] samples reachability with a [`NetworkProbe`] on a fixed
//! period and on connectivity events, classifies each sample into a
//! [`NetworkQuality`] tier, and publishes [`NetworkSnapshot`]s. Tier changes
//! are broadcast once per change.
//!
//! [`AdaptiveController`] turns the latest snapshot plus a resource
//! conservation level into [`AdaptiveParameters`] for the sync processor.

mod adaptive;
mod error;
mod monitor;
mod probe;
mod quality;

pub use adaptive::{
    compute_parameters, AdaptiveConfig, AdaptiveController, AdaptiveParameters,
    ConservationLevel, ConservationSignal, ConservationSwitch, PayloadQuality,
};
pub use error::{MonitorError, MonitorResult};
pub use monitor::{ConnectivityEvent, NetworkMonitor, QualityChange};
pub use probe::{HttpProbe, NetworkProbe, ProbeOutcome};
pub use quality::{NetworkQuality, NetworkSnapshot, QualityThresholds};
