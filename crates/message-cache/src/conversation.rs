use crate::{BoundedCache, CachedMessage, FlushTarget};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::trace;

/// A state change applied to the conversation store.
///
/// Every variant is keyed by id, so applying the same op twice leaves the
/// store as applying it once.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatOp {
    UpsertMessage {
        conversation_key: String,
        message: CachedMessage,
    },
    RemoveMessage {
        message_id: String,
    },
    /// Count `message_id` as unread in the conversation.
    IncrementUnread {
        conversation_key: String,
        message_id: String,
    },
    ClearUnread {
        conversation_key: String,
    },
}

struct State {
    cache: BoundedCache,
    unread: HashMap<String, HashSet<String>>,
}

/// Cached messages plus unread counters.
pub struct ConversationStore {
    state: Mutex<State>,
}

impl ConversationStore {
    pub fn new(max_cached_messages: usize) -> Self {
        Self {
            state: Mutex::new(State {
                cache: BoundedCache::new(max_cached_messages),
                unread: HashMap::new(),
            }),
        }
    }

    pub fn apply(&self, op: ChatOp) {
        let mut state = self.state.lock();
        apply_op(&mut state, op);
    }

    pub fn messages(&self, conversation_key: &str) -> Vec<CachedMessage> {
        self.state.lock().cache.get(conversation_key)
    }

    pub fn unread_count(&self, conversation_key: &str) -> usize {
        self.state
            .lock()
            .unread
            .get(conversation_key)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    pub fn total_size(&self) -> usize {
        self.state.lock().cache.total_size()
    }
}

fn apply_op(state: &mut State, op: ChatOp) {
    trace!(op = ?op, "Applying chat op");
    match op {
        ChatOp::UpsertMessage {
            conversation_key,
            message,
        } => {
            state.cache.insert(&conversation_key, message);
        }
        ChatOp::RemoveMessage { message_id } => {
            state.cache.remove(&message_id);
            for ids in state.unread.values_mut() {
                ids.remove(&message_id);
            }
        }
        ChatOp::IncrementUnread {
            conversation_key,
            message_id,
        } => {
            state
                .unread
                .entry(conversation_key)
                .or_default()
                .insert(message_id);
        }
        ChatOp::ClearUnread { conversation_key } => {
            state.unread.remove(&conversation_key);
        }
    }
}

#[async_trait]
impl FlushTarget<ChatOp> for ConversationStore {
    async fn apply(&self, batch: Vec<ChatOp>) {
        let mut state = self.state.lock();
        for op in batch {
            apply_op(&mut state, op);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Batcher;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn upsert(conv: &str, id: &str, text: &str) -> ChatOp {
        ChatOp::UpsertMessage {
            conversation_key: conv.to_string(),
            message: CachedMessage {
                id: id.to_string(),
                body: json!({ "text": text }),
                created_at: Utc::now(),
            },
        }
    }

    fn unread(conv: &str, id: &str) -> ChatOp {
        ChatOp::IncrementUnread {
            conversation_key: conv.to_string(),
            message_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_batch_is_harmless() {
        let store = ConversationStore::new(100);
        let batch = vec![upsert("c", "m1", "hi"), unread("c", "m1"), upsert("c", "m2", "yo"), unread("c", "m2")];

        FlushTarget::apply(&store, batch.clone()).await;
        FlushTarget::apply(&store, batch).await;

        assert_eq!(store.messages("c").len(), 2);
        assert_eq!(store.unread_count("c"), 2);
    }

    #[test]
    fn test_clear_and_remove() {
        let store = ConversationStore::new(100);
        store.apply(upsert("c", "m1", "hi"));
        store.apply(unread("c", "m1"));
        store.apply(upsert("c", "m2", "hi"));
        store.apply(unread("c", "m2"));

        store.apply(ChatOp::RemoveMessage {
            message_id: "m1".to_string(),
        });
        assert_eq!(store.unread_count("c"), 1);
        assert_eq!(store.total_size(), 1);

        store.apply(ChatOp::ClearUnread {
            conversation_key: "c".to_string(),
        });
        assert_eq!(store.unread_count("c"), 0);
        assert_eq!(store.messages("c")[0].id, "m2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_batched_ops_preserve_per_conversation_order() {
        let store = Arc::new(ConversationStore::new(100));
        let batcher = Batcher::with_limits(store.clone(), 4, Duration::from_millis(100));

        for n in 0..10 {
            let conv = if n % 2 == 0 { "even" } else { "odd" };
            batcher.add(upsert(conv, &format!("m{}", n), "x")).unwrap();
        }
        batcher.add(upsert("even", "m0", "edited")).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let even: Vec<_> = store.messages("even").into_iter().map(|m| m.id).collect();
        assert_eq!(even, vec!["m0", "m2", "m4", "m6", "m8"]);
        assert_eq!(store.messages("even")[0].body["text"], "edited");
        assert_eq!(store.messages("odd").len(), 5);
    }
}
