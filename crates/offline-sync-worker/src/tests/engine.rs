use super::harness::{
    wait_until, FlippingProbe, MemoryQueueStore, Reply, ScriptedDispatcher, SwitchProbe,
};
use crate::{EngineError, NewAction, OfflineSyncEngine, TerminalReason};
use action_queue_store::{
    ActionKind, ActionPriority, NewQueuedAction, QueueStore, SqliteQueueStore,
};
use chrono::Utc;
use message_cache::CachedMessage;
use network_quality_monitor::ConnectivityEvent;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use sync_config_and_utils::{Config, Paths};
use tempfile::tempdir;

const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> Config {
    let mut config = Config::default();
    config.network.sample_period_ms = 60_000;
    config.batcher.idle_timeout_ms = 10;
    config.sync.backoff_base_ms = 10;
    config.sync.backoff_max_ms = 50;
    config
}

struct Fixture {
    engine: OfflineSyncEngine,
    store: Arc<MemoryQueueStore>,
    dispatcher: Arc<ScriptedDispatcher>,
    probe: Arc<SwitchProbe>,
}

async fn start_engine(reachable: bool) -> Fixture {
    let store = MemoryQueueStore::new();
    let dispatcher = ScriptedDispatcher::new();
    let probe = SwitchProbe::new(reachable);

    let engine = OfflineSyncEngine::builder(test_config())
        .store(store.clone())
        .dispatcher(dispatcher.clone())
        .probe(probe.clone())
        .start()
        .await
        .unwrap();

    if reachable {
        let online = wait_until(WAIT, || async { engine.network_snapshot().quality.is_online() }).await;
        assert!(online, "monitor never reported online");
    }

    Fixture {
        engine,
        store,
        dispatcher,
        probe,
    }
}

fn labelled(label: &str, priority: ActionPriority) -> NewAction {
    NewAction::api_call(json!({ "label": label })).with_priority(priority)
}

#[tokio::test]
async fn test_reconnect_drains_offline_queue_in_priority_order() {
    let f = start_engine(false).await;

    f.engine.enqueue_action(labelled("low", ActionPriority::Low)).await.unwrap();
    f.engine.enqueue_action(labelled("high", ActionPriority::High)).await.unwrap();
    f.engine.enqueue_action(labelled("medium", ActionPriority::Medium)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(f.dispatcher.sent().is_empty());
    assert_eq!(f.engine.pending_actions().await.unwrap().len(), 3);
    assert_eq!(f.engine.sync_status().queue_depth, 3);

    f.probe.set_reachable(true);
    f.engine
        .connectivity_sender()
        .send(ConnectivityEvent::Online)
        .await
        .unwrap();

    let drained = wait_until(WAIT, || async { f.dispatcher.sent().len() == 3 }).await;
    assert!(drained);
    assert_eq!(f.dispatcher.sent_labels(), vec!["high", "medium", "low"]);

    let emptied = wait_until(WAIT, || async { f.engine.sync_status().queue_depth == 0 }).await;
    assert!(emptied);

    f.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_invalid_actions_rejected() {
    let f = start_engine(false).await;

    let blank_target = f.engine.enqueue_action(NewAction::message("  ", json!({ "text": "hi" }))).await;
    assert!(matches!(blank_target, Err(EngineError::InvalidAction(_))));

    let null_payload = f.engine.enqueue_action(NewAction::api_call(Value::Null)).await;
    assert!(matches!(null_payload, Err(EngineError::InvalidAction(_))));

    let no_attempts = f
        .engine
        .enqueue_action(NewAction::file_upload(json!({ "path": "a.png" })).with_max_attempts(0))
        .await;
    assert!(matches!(no_attempts, Err(EngineError::InvalidAction(_))));

    assert_eq!(f.store.depth().await.unwrap(), 0);
    f.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_default_max_attempts_applied() {
    let f = start_engine(false).await;

    f.engine
        .enqueue_action(NewAction::file_upload(json!({ "path": "a.png" })))
        .await
        .unwrap();

    let queued = f.engine.pending_actions().await.unwrap();
    assert_eq!(queued[0].max_attempts, 5);
    assert_eq!(queued[0].priority, ActionPriority::Low);
    f.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_confirmed_message_reaches_cache() {
    let f = start_engine(true).await;

    let id = f
        .engine
        .enqueue_action(NewAction::message("conv-1", json!({ "text": "hello" })))
        .await
        .unwrap();

    let confirmed = wait_until(WAIT, || async {
        f.dispatcher.sent().len() == 1 && f.store.depth().await.unwrap() == 0
    })
    .await;
    assert!(confirmed);

    f.engine.flush_cache().await.unwrap();
    let cached = f.engine.cached_messages("conv-1");
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].id, id.to_string());
    assert_eq!(cached[0].body, json!({ "text": "hello" }));

    f.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_incoming_messages_and_unread() {
    let f = start_engine(false).await;

    for id in ["m1", "m2"] {
        let message = CachedMessage {
            id: id.to_string(),
            body: json!({ "text": id }),
            created_at: Utc::now(),
        };
        f.engine.apply_incoming_message("conv-9", message, true).unwrap();
    }
    f.engine.flush_cache().await.unwrap();

    assert_eq!(f.engine.cached_messages("conv-9").len(), 2);
    assert_eq!(f.engine.unread_count("conv-9"), 2);

    f.engine.mark_conversation_read("conv-9").unwrap();
    f.engine.flush_cache().await.unwrap();
    assert_eq!(f.engine.unread_count("conv-9"), 0);
    assert_eq!(f.engine.cached_messages("conv-9").len(), 2);

    f.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_terminal_failure_surfaces_through_engine() {
    let f = start_engine(true).await;
    f.dispatcher.set_default(Reply::Permanent);
    let mut failures = f.engine.subscribe_terminal_failures();

    let id = f
        .engine
        .enqueue_action(labelled("rejected", ActionPriority::High))
        .await
        .unwrap();

    let failure = tokio::time::timeout(WAIT, failures.recv())
        .await
        .expect("no terminal failure reported")
        .unwrap();
    assert_eq!(failure.action.id, id);
    assert_eq!(failure.reason, TerminalReason::Permanent);
    assert_eq!(f.store.depth().await.unwrap(), 0);

    f.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_keeps_queue_on_disk() {
    let dir = tempdir().unwrap();
    let paths = Paths::with_base_dir(dir.path().to_path_buf());

    let engine = OfflineSyncEngine::builder(test_config())
        .paths(paths.clone())
        .dispatcher(ScriptedDispatcher::new())
        .probe(SwitchProbe::new(false))
        .start()
        .await
        .unwrap();

    engine.enqueue_action(labelled("a", ActionPriority::High)).await.unwrap();
    engine.enqueue_action(labelled("b", ActionPriority::Low)).await.unwrap();
    engine.shutdown().await.unwrap();

    let after = engine.enqueue_action(labelled("c", ActionPriority::High)).await;
    assert!(matches!(after, Err(EngineError::Stopped)));

    // Second shutdown is harmless.
    engine.shutdown().await.unwrap();
    drop(engine);

    let store = SqliteQueueStore::open(&paths.database_file()).await.unwrap();
    let left = store.all().await.unwrap();
    assert_eq!(left.len(), 2);
    assert_eq!(left[0].payload["label"], "a");
    assert_eq!(left[1].payload["label"], "b");
}

#[tokio::test]
async fn test_invalid_config_refused() {
    let mut config = test_config();
    config.sync.base_batch_size = 0;

    let result = OfflineSyncEngine::builder(config)
        .store(MemoryQueueStore::new())
        .dispatcher(ScriptedDispatcher::new())
        .probe(SwitchProbe::new(false))
        .start()
        .await;

    assert!(matches!(result, Err(EngineError::Config(_))));
}

#[tokio::test(start_paused = true)]
async fn test_interval_ticks_while_quality_flaps() {
    let store = MemoryQueueStore::new();
    for n in 0..100 {
        store
            .enqueue(NewQueuedAction {
                kind: ActionKind::ApiCall,
                priority: ActionPriority::Medium,
                target: None,
                payload: json!({ "label": format!("a{n}") }),
                max_attempts: 5,
            })
            .await
            .unwrap();
    }
    let dispatcher = ScriptedDispatcher::new();

    // Good and Poor alternate every 20s: shorter than either sync interval.
    let mut config = test_config();
    config.network.sample_period_ms = 20_000;

    let engine = OfflineSyncEngine::builder(config)
        .store(store.clone())
        .dispatcher(dispatcher.clone())
        .probe(FlippingProbe::new())
        .start()
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(600)).await;

    assert_eq!(dispatcher.sent().len(), 100);
    assert_eq!(store.depth().await.unwrap(), 0);

    engine.shutdown().await.unwrap();
}
