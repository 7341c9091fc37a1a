//! In-memory conversation cache for read display.
//!
//! - [`BoundedCache`]: per-conversation message lists under one global cap,
//!   evicting oldest items from the largest conversations first
//! - [`Batcher`]: coalesces operations and applies them in insertion order
//!   after a size or idle-time trigger
//! - [`ConversationStore`]: the cache plus unread counters, fed by
//!   [`ChatOp`]s through a batcher
//!
//! Nothing here is durable. Outgoing actions awaiting confirmation live in
//! the action queue, never in this cache.

mod batcher;
mod cache;
mod conversation;
mod error;

pub use batcher::{Batcher, FlushTarget};
pub use cache::{BoundedCache, CachedMessage};
pub use conversation::{ChatOp, ConversationStore};
pub use error::{CacheError, CacheResult};
