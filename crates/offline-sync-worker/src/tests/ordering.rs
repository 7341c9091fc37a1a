use super::harness::TestHarness;
use crate::{DrainOutcome, SkipReason};
use action_queue_store::ActionPriority;
use network_quality_monitor::NetworkQuality;

#[tokio::test]
async fn test_offline_queue_drains_by_priority_on_reconnect() {
    let h = TestHarness::new();
    h.set_quality(NetworkQuality::Offline);

    h.enqueue(ActionPriority::Low, "low").await;
    h.enqueue(ActionPriority::High, "high").await;
    h.enqueue(ActionPriority::Medium, "medium").await;

    let report = h.processor.process_queue().await;
    assert_eq!(report.outcome, DrainOutcome::Skipped(SkipReason::Offline));
    assert!(h.dispatcher.sent().is_empty());
    assert_eq!(h.store.pending_count(), 3);

    h.set_quality(NetworkQuality::Good);
    let report = h.processor.process_queue().await;

    assert!(report.is_completed());
    assert_eq!(report.confirmed, 3);
    assert_eq!(h.dispatcher.sent_labels(), vec!["high", "medium", "low"]);
    assert_eq!(h.store.pending_count(), 0);

    let status = h.processor.status();
    assert_eq!(status.queue_depth, 0);
    assert!(status.last_sync_at.is_some());
    assert!(!status.is_syncing);
}

#[tokio::test]
async fn test_fifo_within_each_priority_band() {
    let h = TestHarness::new();
    for (priority, label) in [
        (ActionPriority::Low, "l1"),
        (ActionPriority::High, "h1"),
        (ActionPriority::Low, "l2"),
        (ActionPriority::Medium, "m1"),
        (ActionPriority::High, "h2"),
        (ActionPriority::Medium, "m2"),
        (ActionPriority::High, "h3"),
    ] {
        h.enqueue(priority, label).await;
    }

    h.processor.process_queue().await;

    assert_eq!(
        h.dispatcher.sent_labels(),
        vec!["h1", "h2", "h3", "m1", "m2", "l1", "l2"]
    );
}

#[tokio::test]
async fn test_poor_network_halves_batch() {
    let h = TestHarness::new();
    for i in 0..25 {
        h.enqueue(ActionPriority::Medium, &format!("a{}", i)).await;
    }

    h.set_quality(NetworkQuality::Poor);
    let report = h.processor.process_queue().await;
    assert_eq!(report.dispatched, 10);
    assert_eq!(h.store.pending_count(), 15);

    h.set_quality(NetworkQuality::Excellent);
    let report = h.processor.process_queue().await;
    assert_eq!(report.dispatched, 15);
    assert_eq!(h.store.pending_count(), 0);
}

#[tokio::test]
async fn test_empty_queue_completes_quietly() {
    let h = TestHarness::new();

    let report = h.processor.process_queue().await;

    assert!(report.is_completed());
    assert_eq!(report.dispatched, 0);
    assert!(report.backoff.is_none());
    assert_eq!(h.processor.status().consecutive_failures, 0);
}
