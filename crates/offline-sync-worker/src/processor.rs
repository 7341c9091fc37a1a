//! The sync processor: drains the action queue when the network allows.
//!
//! ```text
//! Idle --tick | reconnect | trigger--> Draining --all ok--> Idle
//!                                      Draining --retryable failure--> BackingOff --> Idle
//! ```
//!
//! A drain holds an atomic guard from before its first await until its
//! backoff has elapsed. A trigger that finds the guard taken returns
//! `AlreadyRunning` instead of queueing a second drain.

use crate::backoff::compute_backoff;
use crate::{
    DispatchContext, DispatchError, DrainOutcome, DrainReport, RemoteDispatcher, SkipReason,
    SyncStatus, TerminalFailure, TerminalReason,
};
use action_queue_store::{ActionId, ActionKind, AttemptOutcome, QueueStore, QueuedAction};
use chrono::Utc;
use message_cache::{Batcher, CachedMessage, ChatOp};
use network_quality_monitor::{AdaptiveController, AdaptiveParameters, NetworkSnapshot};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sync_config_and_utils::SyncSettings;
use tokio::sync::{broadcast, watch, Notify};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const TERMINAL_CHANNEL_SIZE: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorConfig {
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl ProcessorConfig {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            backoff_base: settings.backoff_base(),
            backoff_max: settings.backoff_max(),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::from_settings(&SyncSettings::default())
    }
}

/// Clears the single-flight flag however the drain ends.
struct DrainGuard<'a> {
    processor: &'a SyncProcessor,
}

impl<'a> DrainGuard<'a> {
    fn acquire(processor: &'a SyncProcessor) -> Option<Self> {
        processor
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        processor.status_tx.send_modify(|s| s.is_syncing = true);
        Some(Self { processor })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.processor.status_tx.send_modify(|s| s.is_syncing = false);
        self.processor.syncing.store(false, Ordering::Release);
    }
}

pub struct SyncProcessor {
    store: Arc<dyn QueueStore>,
    dispatcher: Arc<dyn RemoteDispatcher>,
    network: watch::Receiver<NetworkSnapshot>,
    controller: AdaptiveController,
    config: ProcessorConfig,
    message_batcher: Option<Arc<Batcher<ChatOp>>>,
    syncing: AtomicBool,
    stopped: AtomicBool,
    stop_notify: Notify,
    status_tx: watch::Sender<SyncStatus>,
    terminal_tx: broadcast::Sender<TerminalFailure>,
}

impl SyncProcessor {
    pub fn new(
        store: Arc<dyn QueueStore>,
        dispatcher: Arc<dyn RemoteDispatcher>,
        network: watch::Receiver<NetworkSnapshot>,
        controller: AdaptiveController,
        config: ProcessorConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::default());
        let (terminal_tx, _) = broadcast::channel(TERMINAL_CHANNEL_SIZE);
        Self {
            store,
            dispatcher,
            network,
            controller,
            config,
            message_batcher: None,
            syncing: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stop_notify: Notify::new(),
            status_tx,
            terminal_tx,
        }
    }

    /// Confirmed messages are pushed into the conversation cache through this batcher.
    pub fn with_message_batcher(mut self, batcher: Arc<Batcher<ChatOp>>) -> Self {
        self.message_batcher = Some(batcher);
        self
    }

    pub fn status(&self) -> SyncStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_terminal_failures(&self) -> broadcast::Receiver<TerminalFailure> {
        self.terminal_tx.subscribe()
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Parameters for the current network snapshot.
    pub fn current_parameters(&self) -> AdaptiveParameters {
        let snapshot = self.network.borrow().clone();
        self.controller.compute(&snapshot)
    }

    /// Refuse new drains and cut any backoff short. An in-flight dispatch is
    /// allowed to finish; queued actions stay durable.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            info!("Sync processor stopping");
        }
        self.stop_notify.notify_waiters();
    }

    /// Re-read the queue depth into the published status.
    pub async fn refresh_queue_depth(&self) {
        match self.store.depth().await {
            Ok(depth) => self.status_tx.send_modify(|s| s.queue_depth = depth),
            Err(e) => warn!(error = %e, "Failed to read queue depth"),
        }
    }

    /// Run one drain if online, not stopped and not already draining.
    ///
    /// Never fails: dispatch and storage errors are folded into the report,
    /// the published status and terminal-failure notifications.
    pub async fn process_queue(&self) -> DrainReport {
        if self.is_stopped() {
            return DrainReport::new(DrainOutcome::Skipped(SkipReason::Stopped));
        }

        let snapshot = self.network.borrow().clone();
        if !snapshot.quality.is_online() {
            debug!("Skipping drain while offline");
            return DrainReport::new(DrainOutcome::Skipped(SkipReason::Offline));
        }

        let Some(_guard) = DrainGuard::acquire(self) else {
            debug!("Drain already in progress, coalescing trigger");
            return DrainReport::new(DrainOutcome::AlreadyRunning);
        };

        let params = self.controller.compute(&snapshot);
        let mut report = self.drain(&params).await;

        let failures = if report.has_retryable_failures() {
            let mut failures = 0;
            self.status_tx.send_modify(|s| {
                s.consecutive_failures = s.consecutive_failures.saturating_add(1);
                failures = s.consecutive_failures;
            });
            failures
        } else {
            self.status_tx.send_modify(|s| {
                s.consecutive_failures = 0;
                s.last_error = None;
            });
            0
        };

        let depth = self.store.depth().await.ok();
        self.status_tx.send_modify(|s| {
            s.last_sync_at = Some(Utc::now());
            if let Some(depth) = depth {
                s.queue_depth = depth;
            }
        });

        info!(
            dispatched = report.dispatched,
            confirmed = report.confirmed,
            retried = report.retried,
            terminal = report.terminal,
            consecutive_failures = failures,
            "Drain finished"
        );

        if report.retried > 0 || report.storage_errors > 0 {
            let delay = compute_backoff(failures, self.config.backoff_base, self.config.backoff_max);
            report.backoff = Some(delay);
            self.back_off(delay).await;
        }

        report
    }

    async fn back_off(&self, delay: Duration) {
        let stopped = self.stop_notify.notified();
        if self.is_stopped() {
            return;
        }
        info!(delay_ms = delay.as_millis() as u64, "Backing off before next drain");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stopped => {
                debug!("Backoff interrupted by stop");
            }
        }
    }

    async fn drain(&self, params: &AdaptiveParameters) -> DrainReport {
        let mut report = DrainReport::new(DrainOutcome::Completed);

        let claimed = match self.store.dequeue_pending(params.batch_size).await {
            Ok(actions) => actions,
            Err(e) => {
                error!(error = %e, "Failed to dequeue pending actions");
                self.record_error(e.to_string());
                report.storage_errors += 1;
                return report;
            }
        };
        debug!(count = claimed.len(), batch_size = params.batch_size, "Claimed actions");

        let ctx = DispatchContext::from(params);
        let mut claimed: VecDeque<QueuedAction> = claimed.into();

        while let Some(action) = claimed.pop_front() {
            if self.is_stopped() {
                claimed.push_front(action);
                report.released += self.release_all(claimed).await;
                break;
            }

            // Left over from a run that spent the budget but never deleted the row.
            if action.is_exhausted() {
                self.expire_spent(action, &mut report).await;
                continue;
            }

            report.dispatched += 1;
            let result = match timeout(ctx.timeout, self.dispatcher.send(&action, &ctx)).await {
                Ok(result) => result,
                Err(_) => Err(DispatchError::Transient(format!(
                    "dispatch timed out after {}ms",
                    ctx.timeout.as_millis()
                ))),
            };

            match result {
                Ok(()) => self.confirm(action, &mut report).await,
                Err(DispatchError::Transient(msg)) => self.retry_or_exhaust(action, msg, &mut report).await,
                Err(DispatchError::Permanent(msg)) => self.fail_permanently(action, msg, &mut report).await,
            }
        }

        report
    }

    async fn confirm(&self, action: QueuedAction, report: &mut DrainReport) {
        match self.store.mark_confirmed(&action.id).await {
            Ok(_) => {
                report.confirmed += 1;
                debug!(action_id = %action.id, "Action confirmed");
                self.apply_confirmed_message(&action);
            }
            Err(e) => {
                error!(action_id = %action.id, error = %e, "Failed to confirm action");
                self.record_error(e.to_string());
                report.storage_errors += 1;
                self.release_after_store_error(&action.id).await;
            }
        }
    }

    fn apply_confirmed_message(&self, action: &QueuedAction) {
        let (Some(batcher), ActionKind::Message, Some(target)) =
            (&self.message_batcher, action.kind, &action.target)
        else {
            return;
        };

        let op = ChatOp::UpsertMessage {
            conversation_key: target.clone(),
            message: CachedMessage {
                id: action.id.to_string(),
                body: action.payload.clone(),
                created_at: action.created_at,
            },
        };
        if let Err(e) = batcher.add(op) {
            warn!(action_id = %action.id, error = %e, "Could not cache confirmed message");
        }
    }

    async fn retry_or_exhaust(&self, action: QueuedAction, msg: String, report: &mut DrainReport) {
        self.record_error(msg.clone());

        match self.store.increment_attempt(&action.id, &msg).await {
            Ok(AttemptOutcome::Exhausted(attempt)) => {
                warn!(
                    action_id = %action.id,
                    attempt,
                    max_attempts = action.max_attempts,
                    error = %msg,
                    "Action exhausted its retries"
                );
                report.terminal += 1;
                let action = QueuedAction {
                    attempt,
                    last_error: Some(msg.clone()),
                    ..action
                };
                self.report_terminal(action, TerminalReason::Exhausted, msg);
            }
            Ok(AttemptOutcome::Retry(attempt)) => {
                warn!(
                    action_id = %action.id,
                    attempt,
                    max_attempts = action.max_attempts,
                    error = %msg,
                    "Dispatch failed, will retry"
                );
                report.retried += 1;
            }
            Ok(AttemptOutcome::Missing) => {
                debug!(action_id = %action.id, "Action vanished before retry was recorded");
            }
            Err(e) => {
                error!(action_id = %action.id, error = %e, "Failed to record attempt");
                report.storage_errors += 1;
                self.release_after_store_error(&action.id).await;
            }
        }
    }

    async fn fail_permanently(&self, action: QueuedAction, msg: String, report: &mut DrainReport) {
        warn!(action_id = %action.id, error = %msg, "Action rejected permanently");
        if let Err(e) = self.store.remove(&action.id).await {
            error!(action_id = %action.id, error = %e, "Failed to remove rejected action");
            report.storage_errors += 1;
            self.release_after_store_error(&action.id).await;
            return;
        }
        report.terminal += 1;
        self.report_terminal(action, TerminalReason::Permanent, msg);
    }

    /// Terminal without a send: the stored attempt count already meets the budget.
    async fn expire_spent(&self, action: QueuedAction, report: &mut DrainReport) {
        let msg = action
            .last_error
            .clone()
            .unwrap_or_else(|| "retry budget already spent".to_string());
        warn!(
            action_id = %action.id,
            attempt = action.attempt,
            max_attempts = action.max_attempts,
            "Dropping action with no attempts left"
        );
        if let Err(e) = self.store.remove(&action.id).await {
            error!(action_id = %action.id, error = %e, "Failed to remove exhausted action");
            report.storage_errors += 1;
            self.release_after_store_error(&action.id).await;
            return;
        }
        report.terminal += 1;
        self.report_terminal(action, TerminalReason::Exhausted, msg);
    }

    fn report_terminal(&self, action: QueuedAction, reason: TerminalReason, error: String) {
        // Nobody listening is fine; the failure is already logged.
        let _ = self.terminal_tx.send(TerminalFailure {
            action,
            reason,
            error,
        });
    }

    async fn release_all(&self, remaining: VecDeque<QueuedAction>) -> usize {
        let ids: Vec<_> = remaining.into_iter().map(|a| a.id).collect();
        match self.store.release(&ids).await {
            Ok(released) => {
                info!(count = released, "Released claimed actions on stop");
                released
            }
            Err(e) => {
                error!(error = %e, "Failed to release claimed actions");
                0
            }
        }
    }

    /// Best effort: hand a claimed action back so the next drain sees it.
    async fn release_after_store_error(&self, id: &ActionId) {
        if let Err(e) = self.store.release(std::slice::from_ref(id)).await {
            error!(action_id = %id, error = %e, "Failed to release action after storage error");
        }
    }

    fn record_error(&self, message: String) {
        self.status_tx.send_modify(|s| s.last_error = Some(message));
    }
}
