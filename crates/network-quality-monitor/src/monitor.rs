//! The network monitor service.
//!
//! Snapshots are published on a `watch` channel so readers always see the
//! latest one. Tier transitions go out on a `broadcast` channel. Because the
//! previous snapshot is swapped out atomically on publish, each transition is
//! announced exactly once even when samples race.

use crate::{MonitorError, MonitorResult, NetworkProbe, NetworkQuality, NetworkSnapshot, QualityThresholds};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use sync_config_and_utils::NetworkSettings;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

const CONNECTIVITY_CHANNEL_SIZE: usize = 32;
const QUALITY_CHANNEL_SIZE: usize = 16;

/// Connectivity transition reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

/// A change of tier between two consecutive snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityChange {
    pub previous: NetworkQuality,
    pub current: NetworkQuality,
    pub snapshot: NetworkSnapshot,
}

impl QualityChange {
    /// Offline to any online tier.
    pub fn is_reconnect(&self) -> bool {
        !self.previous.is_online() && self.current.is_online()
    }
}

pub struct NetworkMonitor {
    probe: Arc<dyn NetworkProbe>,
    thresholds: QualityThresholds,
    sample_period: Duration,
    snapshot_tx: watch::Sender<NetworkSnapshot>,
    change_tx: broadcast::Sender<QualityChange>,
    events_tx: mpsc::Sender<ConnectivityEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ConnectivityEvent>>>,
}

impl NetworkMonitor {
    pub fn new(probe: Arc<dyn NetworkProbe>, settings: &NetworkSettings) -> Self {
        Self::with_thresholds(
            probe,
            QualityThresholds::from_settings(settings),
            settings.sample_period(),
        )
    }

    /// The monitor starts out Offline until the first sample lands.
    pub fn with_thresholds(
        probe: Arc<dyn NetworkProbe>,
        thresholds: QualityThresholds,
        sample_period: Duration,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(NetworkSnapshot::offline());
        let (change_tx, _) = broadcast::channel(QUALITY_CHANNEL_SIZE);
        let (events_tx, events_rx) = mpsc::channel(CONNECTIVITY_CHANNEL_SIZE);

        Self {
            probe,
            thresholds,
            sample_period,
            snapshot_tx,
            change_tx,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Latest published snapshot.
    pub fn current(&self) -> NetworkSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<NetworkSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Notifications for tier changes only.
    pub fn on_quality_change(&self) -> broadcast::Receiver<QualityChange> {
        self.change_tx.subscribe()
    }

    /// Channel for platform connectivity events.
    pub fn connectivity_sender(&self) -> mpsc::Sender<ConnectivityEvent> {
        self.events_tx.clone()
    }

    /// Probe now and publish the result.
    pub async fn sample(&self) -> NetworkSnapshot {
        let snapshot = match self.probe.probe().await {
            Ok(outcome) => self.thresholds.snapshot(&outcome),
            Err(e) => {
                warn!(error = %e, "Network probe failed, treating as offline");
                NetworkSnapshot::offline()
            }
        };
        self.publish(snapshot.clone());
        snapshot
    }

    /// Publish an Offline snapshot without probing.
    pub fn mark_offline(&self) -> NetworkSnapshot {
        let snapshot = NetworkSnapshot::offline();
        self.publish(snapshot.clone());
        snapshot
    }

    fn publish(&self, snapshot: NetworkSnapshot) {
        let current = snapshot.quality;
        let previous = self.snapshot_tx.send_replace(snapshot.clone()).quality;

        debug!(
            quality = ?current,
            latency_ms = snapshot.latency_ms,
            throughput = snapshot.throughput_estimate,
            "Network snapshot published"
        );

        if previous != current {
            info!(previous = ?previous, current = ?current, "Network quality changed");
            // No receivers is fine; the change is still reflected in the watch.
            let _ = self.change_tx.send(QualityChange {
                previous,
                current,
                snapshot,
            });
        }
    }

    /// Spawn the sampling loop.
    ///
    /// Samples immediately, then every `sample_period`, and on each
    /// connectivity event. Exits when `shutdown` flips to true.
    pub fn start(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> MonitorResult<JoinHandle<()>> {
        let mut events = self.events_rx.lock().take().ok_or(MonitorError::AlreadyStarted)?;
        let monitor = Arc::clone(self);

        Ok(tokio::spawn(async move {
            let mut ticker = interval(monitor.sample_period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(period_ms = monitor.sample_period.as_millis() as u64, "Network monitor started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.sample().await;
                    }
                    Some(event) = events.recv() => {
                        debug!(event = ?event, "Connectivity event");
                        match event {
                            ConnectivityEvent::Offline => {
                                monitor.mark_offline();
                            }
                            ConnectivityEvent::Online => {
                                monitor.sample().await;
                                ticker.reset();
                            }
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Network monitor stopped");
        }))
    }
}
