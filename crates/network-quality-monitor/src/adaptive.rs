//! Adaptive sync parameters.
//!
//! [`compute_parameters`] is a pure function of the latest snapshot, the
//! static configuration and the current conservation level. Nothing here is
//! persisted; parameters are recomputed whenever they are needed.

use crate::{NetworkQuality, NetworkSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sync_config_and_utils::SyncSettings;

/// Fidelity of payloads the dispatcher should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadQuality {
    Low,
    Medium,
    High,
}

/// Coarse resource-conservation indicator (battery saver and the like).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConservationLevel {
    #[default]
    Normal,
    Reduced,
    Critical,
}

impl ConservationLevel {
    pub fn interval_multiplier(&self) -> u32 {
        match self {
            Self::Normal => 1,
            Self::Reduced => 2,
            Self::Critical => 10,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Reduced => 1,
            Self::Critical => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Reduced,
            2 => Self::Critical,
            _ => Self::Normal,
        }
    }
}

/// Source of the current conservation level.
pub trait ConservationSignal: Send + Sync {
    fn level(&self) -> ConservationLevel;
}

/// A conservation signal a collaborator sets by hand.
#[derive(Debug, Default)]
pub struct ConservationSwitch {
    level: AtomicU8,
}

impl ConservationSwitch {
    pub fn new(level: ConservationLevel) -> Self {
        Self {
            level: AtomicU8::new(level.to_u8()),
        }
    }

    pub fn set(&self, level: ConservationLevel) {
        self.level.store(level.to_u8(), Ordering::Relaxed);
    }
}

impl ConservationSignal for ConservationSwitch {
    fn level(&self) -> ConservationLevel {
        ConservationLevel::from_u8(self.level.load(Ordering::Relaxed))
    }
}

/// Static inputs to the mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveConfig {
    pub base_sync_interval: Duration,
    pub max_sync_interval: Duration,
    pub base_batch_size: usize,
    pub dispatch_timeout: Duration,
}

impl AdaptiveConfig {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            base_sync_interval: settings.base_sync_interval(),
            max_sync_interval: settings.max_sync_interval(),
            base_batch_size: settings.base_batch_size,
            dispatch_timeout: settings.dispatch_timeout(),
        }
    }
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self::from_settings(&SyncSettings::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveParameters {
    pub sync_interval: Duration,
    pub batch_size: usize,
    pub payload_quality: PayloadQuality,
    /// JPEG-style quality percentage for image uploads.
    pub image_quality: u8,
    /// Maximum vertical resolution for video uploads.
    pub max_video_resolution: u32,
    pub background_sync_enabled: bool,
    pub dispatch_timeout: Duration,
}

/// Map a snapshot to sync behaviour.
///
/// | tier      | interval | batch   | quality |
/// |-----------|----------|---------|---------|
/// | Excellent | base     | base ×2 | High    |
/// | Good      | base     | base    | Medium  |
/// | Poor      | base ×4  | base /2 | Low     |
/// | Offline   | max      | base    | Low, background sync off |
///
/// The conservation multiplier applies on top; the interval never exceeds
/// `max_sync_interval`.
pub fn compute_parameters(
    snapshot: &NetworkSnapshot,
    config: &AdaptiveConfig,
    conservation: ConservationLevel,
) -> AdaptiveParameters {
    let base_batch = config.base_batch_size.max(1);

    let (interval_multiplier, batch_size, payload_quality, image_quality, max_video_resolution) =
        match snapshot.quality {
            NetworkQuality::Excellent => (1, base_batch * 2, PayloadQuality::High, 90, 1080),
            NetworkQuality::Good => (1, base_batch, PayloadQuality::Medium, 75, 720),
            NetworkQuality::Poor => (4, (base_batch / 2).max(1), PayloadQuality::Low, 50, 360),
            NetworkQuality::Offline => (1, base_batch, PayloadQuality::Low, 50, 360),
        };

    let sync_interval = if snapshot.quality == NetworkQuality::Offline {
        config.max_sync_interval
    } else {
        config
            .base_sync_interval
            .saturating_mul(interval_multiplier)
            .saturating_mul(conservation.interval_multiplier())
            .min(config.max_sync_interval)
    };

    // Slow links get more time per request before a dispatch counts as failed.
    let dispatch_timeout = match snapshot.quality {
        NetworkQuality::Poor => config.dispatch_timeout.saturating_mul(2),
        _ => config.dispatch_timeout,
    };

    AdaptiveParameters {
        sync_interval,
        batch_size,
        payload_quality,
        image_quality,
        max_video_resolution,
        background_sync_enabled: snapshot.quality.is_online(),
        dispatch_timeout,
    }
}

/// Holds the static config and conservation source.
#[derive(Clone)]
pub struct AdaptiveController {
    config: AdaptiveConfig,
    conservation: Option<Arc<dyn ConservationSignal>>,
}

impl AdaptiveController {
    pub fn new(config: AdaptiveConfig) -> Self {
        Self {
            config,
            conservation: None,
        }
    }

    pub fn with_conservation(mut self, signal: Arc<dyn ConservationSignal>) -> Self {
        self.conservation = Some(signal);
        self
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    pub fn conservation_level(&self) -> ConservationLevel {
        self.conservation
            .as_ref()
            .map(|signal| signal.level())
            .unwrap_or_default()
    }

    pub fn compute(&self, snapshot: &NetworkSnapshot) -> AdaptiveParameters {
        compute_parameters(snapshot, &self.config, self.conservation_level())
    }
}
