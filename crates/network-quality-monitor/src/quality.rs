use crate::ProbeOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use sync_config_and_utils::NetworkSettings;

/// Coarse network condition bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkQuality {
    Excellent,
    Good,
    Poor,
    Offline,
}

impl NetworkQuality {
    pub fn is_online(&self) -> bool {
        !matches!(self, Self::Offline)
    }
}

/// One immutable sample of network conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub quality: NetworkQuality,
    pub latency_ms: u64,
    /// KB/s of probe body received.
    pub throughput_estimate: f64,
    pub sampled_at: DateTime<Utc>,
}

impl NetworkSnapshot {
    pub fn offline() -> Self {
        Self {
            quality: NetworkQuality::Offline,
            latency_ms: 0,
            throughput_estimate: 0.0,
            sampled_at: Utc::now(),
        }
    }
}

/// Latency/throughput cut-offs for each online tier.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityThresholds {
    pub excellent_latency: Duration,
    pub excellent_throughput: f64,
    pub good_latency: Duration,
    pub good_throughput: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self::from_settings(&NetworkSettings::default())
    }
}

impl QualityThresholds {
    pub fn from_settings(settings: &NetworkSettings) -> Self {
        Self {
            excellent_latency: Duration::from_millis(settings.excellent_latency_ms),
            excellent_throughput: settings.excellent_throughput,
            good_latency: Duration::from_millis(settings.good_latency_ms),
            good_throughput: settings.good_throughput,
        }
    }

    /// Classify a reachable sample. Both bounds are strict.
    pub fn classify(&self, latency: Duration, throughput: f64) -> NetworkQuality {
        if latency < self.excellent_latency && throughput > self.excellent_throughput {
            NetworkQuality::Excellent
        } else if latency < self.good_latency && throughput > self.good_throughput {
            NetworkQuality::Good
        } else {
            NetworkQuality::Poor
        }
    }

    /// Build a snapshot from a probe outcome.
    pub fn snapshot(&self, outcome: &ProbeOutcome) -> NetworkSnapshot {
        match outcome {
            ProbeOutcome::Unreachable => NetworkSnapshot::offline(),
            ProbeOutcome::Reachable { latency, .. } => {
                let throughput = outcome.throughput_kbps();
                NetworkSnapshot {
                    quality: self.classify(*latency, throughput),
                    latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                    throughput_estimate: throughput,
                    sampled_at: Utc::now(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_classify_tiers() {
        let t = QualityThresholds::default();
        assert_eq!(t.classify(ms(50), 800.0), NetworkQuality::Excellent);
        assert_eq!(t.classify(ms(50), 300.0), NetworkQuality::Good);
        assert_eq!(t.classify(ms(200), 800.0), NetworkQuality::Good);
        assert_eq!(t.classify(ms(200), 50.0), NetworkQuality::Poor);
        assert_eq!(t.classify(ms(900), 5000.0), NetworkQuality::Poor);
    }

    #[test]
    fn test_classify_boundaries_are_strict() {
        let t = QualityThresholds::default();
        assert_eq!(t.classify(ms(100), 501.0), NetworkQuality::Good);
        assert_eq!(t.classify(ms(99), 500.0), NetworkQuality::Good);
        assert_eq!(t.classify(ms(300), 1000.0), NetworkQuality::Poor);
        assert_eq!(t.classify(ms(299), 100.0), NetworkQuality::Poor);
    }

    #[test]
    fn test_snapshot_from_outcomes() {
        let t = QualityThresholds::default();
        assert_eq!(t.snapshot(&ProbeOutcome::Unreachable).quality, NetworkQuality::Offline);

        let outcome = ProbeOutcome::Reachable {
            latency: ms(40),
            bytes: 1024 * 100,
            elapsed: ms(100),
        };
        let snapshot = t.snapshot(&outcome);
        assert_eq!(snapshot.quality, NetworkQuality::Excellent);
        assert_eq!(snapshot.latency_ms, 40);
        assert!((snapshot.throughput_estimate - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_custom_thresholds_from_settings() {
        let settings = NetworkSettings {
            good_latency_ms: 1000,
            good_throughput: 1.0,
            ..NetworkSettings::default()
        };
        let t = QualityThresholds::from_settings(&settings);
        assert_eq!(t.classify(ms(800), 2.0), NetworkQuality::Good);
    }
}
