//! Operation batcher.
//!
//! A spawned task owns the buffer and is fed through an unbounded channel, so
//! `add` never blocks and never drops. The buffer is applied to the target in
//! insertion order when it reaches `max_batch_size` or when `idle_timeout`
//! has passed since the first unflushed operation, whichever comes first.

use crate::{CacheError, CacheResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use sync_config_and_utils::BatcherSettings;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

/// Receives flushed batches.
///
/// Batches may be re-applied after a crash mid-flush, so implementations
/// should apply each operation idempotently.
#[async_trait]
pub trait FlushTarget<T>: Send + Sync {
    async fn apply(&self, batch: Vec<T>);
}

enum Command<T> {
    Add(T),
    Flush(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

pub struct Batcher<T> {
    tx: mpsc::UnboundedSender<Command<T>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> Batcher<T> {
    pub fn spawn(target: Arc<dyn FlushTarget<T>>, settings: &BatcherSettings) -> Self {
        Self::with_limits(target, settings.max_batch_size, settings.idle_timeout())
    }

    pub fn with_limits(
        target: Arc<dyn FlushTarget<T>>,
        max_batch_size: usize,
        idle_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(rx, target, max_batch_size.max(1), idle_timeout));
        Self {
            tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Buffer one operation.
    pub fn add(&self, op: T) -> CacheResult<()> {
        self.tx.send(Command::Add(op)).map_err(|_| CacheError::Closed)
    }

    /// Apply everything buffered so far and wait until it has been applied.
    pub async fn flush(&self) -> CacheResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(ack_tx))
            .map_err(|_| CacheError::Closed)?;
        ack_rx.await.map_err(|_| CacheError::Closed)
    }

    /// Flush the tail and stop the task. Later calls fail with `Closed`.
    pub async fn close(&self) -> CacheResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Command::Close(ack_tx))
            .map_err(|_| CacheError::Closed)?;
        ack_rx.await.map_err(|_| CacheError::Closed)?;

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        Ok(())
    }
}

async fn apply_buffer<T>(target: &Arc<dyn FlushTarget<T>>, buffer: &mut Vec<T>) {
    if buffer.is_empty() {
        return;
    }
    let batch = std::mem::take(buffer);
    trace!(size = batch.len(), "Flushing batch");
    target.apply(batch).await;
}

async fn run<T>(
    mut rx: mpsc::UnboundedReceiver<Command<T>>,
    target: Arc<dyn FlushTarget<T>>,
    max_batch_size: usize,
    idle_timeout: Duration,
) {
    let mut buffer: Vec<T> = Vec::with_capacity(max_batch_size);
    let mut deadline: Option<Instant> = None;

    loop {
        let command = match deadline {
            Some(at) => {
                tokio::select! {
                    command = rx.recv() => command,
                    _ = sleep_until(at) => {
                        apply_buffer(&target, &mut buffer).await;
                        deadline = None;
                        continue;
                    }
                }
            }
            None => rx.recv().await,
        };

        match command {
            Some(Command::Add(op)) => {
                if buffer.is_empty() {
                    deadline = Some(Instant::now() + idle_timeout);
                }
                buffer.push(op);
                if buffer.len() >= max_batch_size {
                    apply_buffer(&target, &mut buffer).await;
                    deadline = None;
                }
            }
            Some(Command::Flush(ack)) => {
                apply_buffer(&target, &mut buffer).await;
                deadline = None;
                let _ = ack.send(());
            }
            Some(Command::Close(ack)) => {
                apply_buffer(&target, &mut buffer).await;
                let _ = ack.send(());
                break;
            }
            None => {
                apply_buffer(&target, &mut buffer).await;
                break;
            }
        }
    }

    debug!("Batcher stopped");
}
