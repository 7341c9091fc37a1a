use super::harness::{MemoryQueueStore, Reply, ScriptedDispatcher, TestHarness};
use crate::{DrainOutcome, ProcessorConfig, SkipReason, SyncProcessor};
use action_queue_store::{
    ActionKind, ActionPriority, NewQueuedAction, QueueStore, SqliteQueueStore,
};
use network_quality_monitor::{AdaptiveConfig, AdaptiveController, NetworkQuality};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::watch;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_stop_mid_batch_releases_rest() {
    let h = TestHarness::new();
    h.dispatcher.set_delay(Duration::from_millis(500));
    h.enqueue(ActionPriority::High, "first").await;
    h.enqueue(ActionPriority::High, "second").await;
    h.enqueue(ActionPriority::High, "third").await;

    let processor = h.processor.clone();
    let drain = tokio::spawn(async move { processor.process_queue().await });

    // Stop while the first dispatch is in flight.
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.processor.stop();

    let report = drain.await.unwrap();
    assert_eq!(report.confirmed, 1);
    assert_eq!(report.released, 2);
    assert_eq!(h.dispatcher.sent_labels(), vec!["first"]);

    // Released actions are claimable again.
    assert_eq!(h.store.pending_count(), 2);
    let claimed = h.store.dequeue_pending(10).await.unwrap();
    assert_eq!(claimed.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stop_cuts_backoff_short() {
    let h = TestHarness::with_config(ProcessorConfig {
        backoff_base: Duration::from_secs(30),
        backoff_max: Duration::from_secs(60),
    });
    h.dispatcher.script([Reply::Transient]);
    h.enqueue(ActionPriority::High, "a").await;

    let processor = h.processor.clone();
    let started = Instant::now();
    let drain = tokio::spawn(async move { processor.process_queue().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.processor.is_syncing());
    h.processor.stop();

    let report = drain.await.unwrap();
    assert_eq!(report.backoff, Some(Duration::from_secs(30)));
    assert!(started.elapsed() < Duration::from_secs(30));
    assert!(!h.processor.is_syncing());
}

#[tokio::test]
async fn test_stopped_processor_skips() {
    let h = TestHarness::new();
    h.enqueue(ActionPriority::High, "a").await;
    h.processor.stop();

    let report = h.processor.process_queue().await;

    assert_eq!(report.outcome, DrainOutcome::Skipped(SkipReason::Stopped));
    assert!(h.dispatcher.sent().is_empty());
    assert_eq!(h.store.pending_count(), 1);
}

#[tokio::test]
async fn test_actions_survive_stop_and_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("queue.db");

    {
        let store = Arc::new(SqliteQueueStore::open(&path).await.unwrap());
        for label in ["a", "b", "c"] {
            store
                .enqueue(NewQueuedAction {
                    kind: ActionKind::ApiCall,
                    priority: ActionPriority::Medium,
                    target: None,
                    payload: json!({ "label": label }),
                    max_attempts: 3,
                })
                .await
                .unwrap();
        }

        let (_network, network_rx) = watch::channel(super::harness::snapshot(NetworkQuality::Offline));
        let processor = SyncProcessor::new(
            store.clone(),
            ScriptedDispatcher::new(),
            network_rx,
            AdaptiveController::new(AdaptiveConfig::default()),
            ProcessorConfig::default(),
        );
        processor.process_queue().await;
        processor.stop();
    }

    let store = Arc::new(SqliteQueueStore::open(&path).await.unwrap());
    let dispatcher = ScriptedDispatcher::new();
    let (_network, network_rx) = watch::channel(super::harness::snapshot(NetworkQuality::Good));
    let processor = SyncProcessor::new(
        store.clone(),
        dispatcher.clone(),
        network_rx,
        AdaptiveController::new(AdaptiveConfig::default()),
        ProcessorConfig::default(),
    );

    let report = processor.process_queue().await;
    assert_eq!(report.confirmed, 3);
    assert_eq!(dispatcher.sent_labels(), vec!["a", "b", "c"]);
    assert_eq!(store.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn test_memory_store_matches_release_semantics() {
    let store = MemoryQueueStore::new();
    let h = TestHarness::with_store(store.clone(), ProcessorConfig::default());
    let a = h.enqueue(ActionPriority::Low, "a").await;

    let claimed = store.dequeue_pending(5).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert!(store.dequeue_pending(5).await.unwrap().is_empty());

    assert_eq!(store.release(&[a.id.clone()]).await.unwrap(), 1);
    assert_eq!(store.release(&[a.id]).await.unwrap(), 0);
    assert_eq!(store.pending_count(), 1);
}
