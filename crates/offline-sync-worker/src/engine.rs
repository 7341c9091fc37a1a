//! Engine facade.
//!
//! One constructed [`OfflineSyncEngine`] owns the queue, network monitor,
//! processor, batcher and conversation cache, and runs two background tasks:
//! the monitor's sampling loop and the sync loop. Collaborators talk to the
//! engine only; it has an explicit start and shutdown.

use crate::{
    DrainReport, EngineError, EngineResult, HttpDispatcher, ProcessorConfig, RemoteDispatcher,
    SyncProcessor, SyncStatus, TerminalFailure,
};
use action_queue_store::{
    ActionId, ActionKind, ActionPriority, NewQueuedAction, QueueStore, QueuedAction,
    SqliteQueueStore,
};
use message_cache::{Batcher, CachedMessage, ChatOp, ConversationStore};
use network_quality_monitor::{
    AdaptiveConfig, AdaptiveController, ConnectivityEvent, ConservationSignal, HttpProbe,
    NetworkMonitor, NetworkProbe, NetworkSnapshot, QualityChange,
};
use parking_lot::Mutex;
use std::future::pending;
use std::sync::Arc;
use sync_config_and_utils::{Config, Paths};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// An action as submitted by a collaborator.
#[derive(Debug, Clone)]
pub struct NewAction {
    pub kind: ActionKind,
    pub priority: ActionPriority,
    pub target: Option<String>,
    pub payload: serde_json::Value,
    /// Falls back to the configured default.
    pub max_attempts: Option<u32>,
}

impl NewAction {
    pub fn message(conversation_key: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: ActionKind::Message,
            priority: ActionPriority::High,
            target: Some(conversation_key.into()),
            payload,
            max_attempts: None,
        }
    }

    pub fn file_upload(payload: serde_json::Value) -> Self {
        Self {
            kind: ActionKind::FileUpload,
            priority: ActionPriority::Low,
            target: None,
            payload,
            max_attempts: None,
        }
    }

    pub fn api_call(payload: serde_json::Value) -> Self {
        Self {
            kind: ActionKind::ApiCall,
            priority: ActionPriority::Medium,
            target: None,
            payload,
            max_attempts: None,
        }
    }

    pub fn with_priority(mut self, priority: ActionPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Wires an engine from config, with optional injected collaborators.
pub struct EngineBuilder {
    config: Config,
    paths: Option<Paths>,
    store: Option<Arc<dyn QueueStore>>,
    dispatcher: Option<Arc<dyn RemoteDispatcher>>,
    probe: Option<Arc<dyn NetworkProbe>>,
    conservation: Option<Arc<dyn ConservationSignal>>,
    auth_token: Option<String>,
}

impl EngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            paths: None,
            store: None,
            dispatcher: None,
            probe: None,
            conservation: None,
            auth_token: None,
        }
    }

    pub fn paths(mut self, paths: Paths) -> Self {
        self.paths = Some(paths);
        self
    }

    pub fn store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn RemoteDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn NetworkProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn conservation(mut self, signal: Arc<dyn ConservationSignal>) -> Self {
        self.conservation = Some(signal);
        self
    }

    /// Bearer token for the default HTTP dispatcher.
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub async fn start(self) -> EngineResult<OfflineSyncEngine> {
        let config = self.config;
        config.validate()?;

        let store: Arc<dyn QueueStore> = match self.store {
            Some(store) => store,
            None => {
                let paths = match self.paths {
                    Some(paths) => paths,
                    None => Paths::new()?,
                };
                Arc::new(SqliteQueueStore::open(&paths.database_file()).await?)
            }
        };

        let probe: Arc<dyn NetworkProbe> = match self.probe {
            Some(probe) => probe,
            None => Arc::new(HttpProbe::new(config.probe_url()?, config.network.probe_timeout())?),
        };

        let dispatcher: Arc<dyn RemoteDispatcher> = match self.dispatcher {
            Some(dispatcher) => dispatcher,
            None => {
                let url = config.remote_api_url()?;
                let mut http = HttpDispatcher::new(url.as_str(), config.sync.dispatch_timeout())?;
                if let Some(token) = self.auth_token {
                    http = http.with_auth_token(token);
                }
                Arc::new(http)
            }
        };

        let monitor = Arc::new(NetworkMonitor::new(probe, &config.network));

        let conversations = Arc::new(ConversationStore::new(config.cache.max_cached_messages));
        let batcher = Arc::new(Batcher::spawn(conversations.clone(), &config.batcher));

        let mut controller = AdaptiveController::new(AdaptiveConfig::from_settings(&config.sync));
        if let Some(signal) = self.conservation {
            controller = controller.with_conservation(signal);
        }

        let processor = Arc::new(
            SyncProcessor::new(
                store.clone(),
                dispatcher,
                monitor.subscribe(),
                controller,
                ProcessorConfig::from_settings(&config.sync),
            )
            .with_message_batcher(batcher.clone()),
        );
        processor.refresh_queue_depth().await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let trigger = Arc::new(Notify::new());

        // Subscribe before the monitor's first sample so the first reconnect is seen.
        let changes = monitor.on_quality_change();
        let monitor_task = monitor.start(shutdown_rx.clone())?;
        let sync_task = tokio::spawn(run_sync_loop(
            processor.clone(),
            changes,
            trigger.clone(),
            shutdown_rx,
        ));

        info!(
            default_max_attempts = config.sync.default_max_attempts,
            cache_cap = config.cache.max_cached_messages,
            "Offline sync engine started"
        );

        Ok(OfflineSyncEngine {
            store,
            monitor,
            processor,
            conversations,
            batcher,
            default_max_attempts: config.sync.default_max_attempts,
            trigger,
            shutdown_tx,
            tasks: Mutex::new(vec![monitor_task, sync_task]),
        })
    }
}

pub struct OfflineSyncEngine {
    store: Arc<dyn QueueStore>,
    monitor: Arc<NetworkMonitor>,
    processor: Arc<SyncProcessor>,
    conversations: Arc<ConversationStore>,
    batcher: Arc<Batcher<ChatOp>>,
    default_max_attempts: u32,
    trigger: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl OfflineSyncEngine {
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Start with the SQLite queue under `paths` and HTTP collaborators from `config`.
    pub async fn start(config: Config, paths: Paths) -> EngineResult<Self> {
        EngineBuilder::new(config).paths(paths).start().await
    }

    /// Validate and durably queue an action. Returns once it is committed.
    pub async fn enqueue_action(&self, action: NewAction) -> EngineResult<ActionId> {
        if self.processor.is_stopped() {
            return Err(EngineError::Stopped);
        }

        let new_action = NewQueuedAction {
            kind: action.kind,
            priority: action.priority,
            target: action.target,
            payload: action.payload,
            max_attempts: action.max_attempts.unwrap_or(self.default_max_attempts),
        };
        new_action.validate().map_err(EngineError::InvalidAction)?;

        let queued = self.store.enqueue(new_action).await?;
        info!(
            action_id = %queued.id,
            kind = queued.kind.as_str(),
            priority = ?queued.priority,
            "Action queued"
        );

        self.processor.refresh_queue_depth().await;
        if self.monitor.current().quality.is_online() {
            self.trigger.notify_one();
        }
        Ok(queued.id)
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.processor.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.processor.subscribe_status()
    }

    pub fn subscribe_terminal_failures(&self) -> broadcast::Receiver<TerminalFailure> {
        self.processor.subscribe_terminal_failures()
    }

    /// Ask the sync loop for a drain soon. Coalesces with a drain in progress.
    pub fn trigger_sync(&self) {
        self.trigger.notify_one();
    }

    /// Drain now on the caller's task.
    pub async fn sync_now(&self) -> DrainReport {
        self.processor.process_queue().await
    }

    /// Everything still queued, in dispatch order.
    pub async fn pending_actions(&self) -> EngineResult<Vec<QueuedAction>> {
        Ok(self.store.all().await?)
    }

    pub fn network_snapshot(&self) -> NetworkSnapshot {
        self.monitor.current()
    }

    /// Where the platform reports online/offline transitions.
    pub fn connectivity_sender(&self) -> mpsc::Sender<ConnectivityEvent> {
        self.monitor.connectivity_sender()
    }

    pub fn cached_messages(&self, conversation_key: &str) -> Vec<CachedMessage> {
        self.conversations.messages(conversation_key)
    }

    pub fn unread_count(&self, conversation_key: &str) -> usize {
        self.conversations.unread_count(conversation_key)
    }

    /// Buffer a message received from the remote for display.
    pub fn apply_incoming_message(
        &self,
        conversation_key: &str,
        message: CachedMessage,
        mark_unread: bool,
    ) -> EngineResult<()> {
        let message_id = message.id.clone();
        self.batcher.add(ChatOp::UpsertMessage {
            conversation_key: conversation_key.to_string(),
            message,
        })?;
        if mark_unread {
            self.batcher.add(ChatOp::IncrementUnread {
                conversation_key: conversation_key.to_string(),
                message_id,
            })?;
        }
        Ok(())
    }

    pub fn mark_conversation_read(&self, conversation_key: &str) -> EngineResult<()> {
        self.batcher.add(ChatOp::ClearUnread {
            conversation_key: conversation_key.to_string(),
        })?;
        Ok(())
    }

    /// Apply buffered cache operations now.
    pub async fn flush_cache(&self) -> EngineResult<()> {
        self.batcher.flush().await?;
        Ok(())
    }

    /// Stop the timers, wait for any in-flight drain, flush the cache.
    ///
    /// Queued actions stay on disk for the next start.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.processor.stop();
        let _ = self.shutdown_tx.send(true);

        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Engine task ended abnormally");
            }
        }

        // A second shutdown finds the batcher already closed.
        let _ = self.batcher.close().await;

        info!("Offline sync engine stopped");
        Ok(())
    }
}

/// Wake on interval tick, reconnect, manual trigger, or right after a
/// backoff; exit on shutdown once the current drain is done.
///
/// The tick is measured from the end of the last drain, not from the last
/// wake-up. A quality change only moves the deadline to `last_drain` plus
/// the new interval.
async fn run_sync_loop(
    processor: Arc<SyncProcessor>,
    mut changes: broadcast::Receiver<QualityChange>,
    trigger: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut drain_now = true;
    let mut last_drain = Instant::now();

    loop {
        if *shutdown.borrow() {
            break;
        }

        if drain_now {
            let report = processor.process_queue().await;
            last_drain = Instant::now();
            drain_now = report.backoff.is_some() && !processor.is_stopped();
            if drain_now {
                continue;
            }
        }

        let params = processor.current_parameters();
        let deadline = last_drain + params.sync_interval;
        let tick = async move {
            if params.background_sync_enabled {
                tokio::time::sleep_until(deadline).await;
            } else {
                pending::<()>().await;
            }
        };

        tokio::select! {
            _ = tick => {
                debug!("Sync interval elapsed");
                drain_now = true;
            }
            change = changes.recv() => match change {
                Ok(change) => {
                    if change.is_reconnect() {
                        info!(quality = ?change.current, "Reconnected, draining queue");
                        drain_now = true;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Missed quality changes");
                    drain_now = true;
                }
                Err(RecvError::Closed) => break,
            },
            _ = trigger.notified() => {
                debug!("Manual sync trigger");
                drain_now = true;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    debug!("Sync loop stopped");
}
