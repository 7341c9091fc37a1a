//! Bounded per-conversation message cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// A message as shown in a conversation view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedMessage {
    pub id: String,
    pub body: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Entry {
    seq: u64,
    message: CachedMessage,
}

/// Messages grouped by conversation, capped globally.
///
/// Every insert gets a sequence number. Inside a conversation, items stay in
/// insertion order. When the total exceeds the cap, the front item of the
/// largest conversation is evicted (oldest front wins a tie) until the total
/// is back under the cap.
#[derive(Debug)]
pub struct BoundedCache {
    cap: usize,
    conversations: HashMap<String, VecDeque<Entry>>,
    locations: HashMap<String, String>,
    total: usize,
    next_seq: u64,
}

impl BoundedCache {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            conversations: HashMap::new(),
            locations: HashMap::new(),
            total: 0,
            next_seq: 0,
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn total_size(&self) -> usize {
        self.total
    }

    /// Insert or replace a message. Returns the ids evicted to stay in bounds.
    ///
    /// A message id already cached in the same conversation is replaced in
    /// place and keeps its position.
    pub fn insert(&mut self, conversation_key: &str, message: CachedMessage) -> Vec<String> {
        match self.locations.get(&message.id).cloned() {
            Some(existing) if existing == conversation_key => {
                if let Some(entry) = self
                    .conversations
                    .get_mut(conversation_key)
                    .and_then(|items| items.iter_mut().find(|e| e.message.id == message.id))
                {
                    entry.message = message;
                }
                return Vec::new();
            }
            Some(_) => {
                self.remove(&message.id);
            }
            None => {}
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.locations
            .insert(message.id.clone(), conversation_key.to_string());
        self.conversations
            .entry(conversation_key.to_string())
            .or_default()
            .push_back(Entry { seq, message });
        self.total += 1;

        self.evict_over_cap()
    }

    /// Messages of one conversation, oldest first.
    pub fn get(&self, conversation_key: &str) -> Vec<CachedMessage> {
        self.conversations
            .get(conversation_key)
            .map(|items| items.iter().map(|e| e.message.clone()).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.locations.contains_key(message_id)
    }

    pub fn conversation_len(&self, conversation_key: &str) -> usize {
        self.conversations
            .get(conversation_key)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    pub fn remove(&mut self, message_id: &str) -> Option<CachedMessage> {
        let key = self.locations.remove(message_id)?;
        let items = self.conversations.get_mut(&key)?;
        let position = items.iter().position(|e| e.message.id == message_id)?;
        let entry = items.remove(position)?;
        if items.is_empty() {
            self.conversations.remove(&key);
        }
        self.total -= 1;
        Some(entry.message)
    }

    fn evict_over_cap(&mut self) -> Vec<String> {
        let mut evicted = Vec::new();

        while self.total > self.cap {
            let victim = self
                .conversations
                .iter()
                .filter_map(|(key, items)| items.front().map(|front| (key, items.len(), front.seq)))
                .max_by(|a, b| a.1.cmp(&b.1).then(b.2.cmp(&a.2)))
                .map(|(key, _, _)| key.clone());

            let Some(key) = victim else {
                break;
            };

            let Some(items) = self.conversations.get_mut(&key) else {
                break;
            };
            if let Some(entry) = items.pop_front() {
                self.locations.remove(&entry.message.id);
                self.total -= 1;
                evicted.push(entry.message.id);
            }
            if items.is_empty() {
                self.conversations.remove(&key);
            }
        }

        if !evicted.is_empty() {
            debug!(count = evicted.len(), total = self.total, cap = self.cap, "Evicted cached messages");
        }
        evicted
    }
}
