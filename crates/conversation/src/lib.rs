//! Conversation state for multi-turn chat.
//!
//! [`ConversationCache`] keeps in-progress conversations in memory with a
//! sliding window of recent messages and lifetime token counters. A
//! background task evicts entries once their TTL has elapsed, flushing
//! persistent conversations to a [`ConversationStore`] first.
//!
//! The cache is an owned instance: create it with [`ConversationCache::new`],
//! share it behind an `Arc`, and call [`ConversationCache::close`] when done.

pub mod cache;
pub mod store;
pub mod types;

pub use cache::{AppendOutcome, CacheConfig, ConversationCache};
pub use store::{ConversationStore, InMemoryConversationStore, SqliteConversationStore};
pub use types::ConversationState;
