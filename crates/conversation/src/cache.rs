//! Concurrent, TTL-bounded conversation cache.
//!
//! One map behind a single reader/writer lock. Lookups share the read lock
//! and refresh the entry's access time through atomics; inserts, appends and
//! evictions take the write lock for O(1) map work plus the trim step.
//!
//! A background task sweeps the map on a fixed period. Persistent entries
//! with unsaved changes are saved before removal, without holding the lock
//! across the save: expired entries are snapshotted under the read lock,
//! saved, then removed under the write lock only if they are still expired
//! and unchanged since the snapshot.

use crate::store::ConversationStore;
use crate::types::ConversationState;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use relay_core::config::ConversationSettings;
use relay_core::{AppError, AppResult};
use relay_llm::{ChatMessage, TokenUsage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Cache construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Idle time after which an entry is evicted
    pub ttl: Duration,

    /// Messages retained per conversation
    pub max_turns: usize,

    /// Period of the eviction sweep
    pub eviction_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(1800),
            max_turns: 20,
            eviction_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> AppResult<()> {
        if self.ttl.is_zero() {
            return Err(AppError::Config("Conversation TTL must be positive".to_string()));
        }
        if self.max_turns == 0 {
            return Err(AppError::Config(
                "Conversation max turns must be at least 1".to_string(),
            ));
        }
        if self.eviction_interval.is_zero() {
            return Err(AppError::Config(
                "Conversation eviction interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl From<&ConversationSettings> for CacheConfig {
    fn from(settings: &ConversationSettings) -> Self {
        Self {
            ttl: Duration::from_secs(settings.ttl_secs),
            max_turns: settings.max_turns,
            eviction_interval: Duration::from_secs(settings.eviction_interval_secs),
        }
    }
}

/// What an append changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    pub turn_count: u64,
    /// Messages held after trimming
    pub retained: usize,
    /// Messages dropped by this append
    pub trimmed: usize,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
}

struct Entry {
    state: ConversationState,
    /// Milliseconds since the cache epoch at last access
    touched_at: AtomicU64,
    /// Wall-clock last access, unix milliseconds
    last_access_ms: AtomicI64,
    /// Unsaved changes on a persistent entry
    dirty: bool,
    /// Bumped by every write to the entry
    version: u64,
}

impl Entry {
    fn new(state: ConversationState, now_ms: u64, dirty: bool) -> Self {
        let last_access_ms = state.last_access.timestamp_millis();
        Self {
            state,
            touched_at: AtomicU64::new(now_ms),
            last_access_ms: AtomicI64::new(last_access_ms),
            dirty,
            version: 0,
        }
    }

    fn touch(&self, now_ms: u64) {
        self.touched_at.store(now_ms, Ordering::Relaxed);
        self.last_access_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn snapshot(&self) -> ConversationState {
        let mut state = self.state.clone();
        if let Some(at) =
            DateTime::<Utc>::from_timestamp_millis(self.last_access_ms.load(Ordering::Relaxed))
        {
            if at > state.last_access {
                state.last_access = at;
            }
        }
        state
    }

    fn needs_save(&self) -> bool {
        self.dirty && self.state.persist
    }
}

struct Inner {
    entries: RwLock<HashMap<String, Entry>>,
    store: Arc<dyn ConversationStore>,
    config: CacheConfig,
    epoch: Instant,
}

impl Inner {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn is_expired(&self, entry: &Entry, now_ms: u64, wall: DateTime<Utc>) -> bool {
        let idle = now_ms.saturating_sub(entry.touched_at.load(Ordering::Relaxed));
        idle >= self.config.ttl.as_millis() as u64 || entry.state.is_expired_at(wall)
    }

    /// Evict expired entries, saving persistent ones first. Returns how many
    /// entries were removed.
    async fn sweep(&self) -> usize {
        let now_ms = self.now_ms();
        let wall = Utc::now();

        let expired: Vec<(String, u64, Option<ConversationState>)> = {
            let entries = self.entries.read();
            entries
                .iter()
                .filter(|(_, entry)| self.is_expired(entry, now_ms, wall))
                .map(|(id, entry)| {
                    let pending = entry.needs_save().then(|| entry.snapshot());
                    (id.clone(), entry.version, pending)
                })
                .collect()
        };

        if expired.is_empty() {
            return 0;
        }

        let mut removable = Vec::with_capacity(expired.len());
        for (id, version, pending) in expired {
            if let Some(state) = pending {
                if let Err(e) = self.store.save(&state).await {
                    tracing::warn!(
                        conversation = %id,
                        error = %e,
                        "Failed to flush conversation before eviction, keeping it cached"
                    );
                    continue;
                }
            }
            removable.push((id, version));
        }

        let now_ms = self.now_ms();
        let wall = Utc::now();
        let mut entries = self.entries.write();
        let mut evicted = 0;
        for (id, version) in removable {
            let still_expired = entries
                .get(&id)
                .is_some_and(|e| e.version == version && self.is_expired(e, now_ms, wall));
            if still_expired {
                entries.remove(&id);
                evicted += 1;
            }
        }

        tracing::debug!(evicted, remaining = entries.len(), "Conversation eviction sweep");
        evicted
    }
}

/// Owned conversation cache with a background eviction task.
pub struct ConversationCache {
    inner: Arc<Inner>,
    stop: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConversationCache {
    /// Create the cache and start its eviction task.
    ///
    /// Fails outside a Tokio runtime. Dropping the cache stops the task;
    /// call [`close`](Self::close) to also wait for it.
    pub fn new(config: CacheConfig, store: Arc<dyn ConversationStore>) -> AppResult<Self> {
        config.validate()?;

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            AppError::Config(format!(
                "Conversation cache needs a Tokio runtime for eviction: {}",
                e
            ))
        })?;

        let inner = Arc::new(Inner {
            entries: RwLock::new(HashMap::new()),
            store,
            config,
            epoch: Instant::now(),
        });

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = runtime.spawn(run_eviction(Arc::clone(&inner), stop_rx));

        tracing::debug!(
            ttl_secs = config.ttl.as_secs(),
            max_turns = config.max_turns,
            "Started conversation cache"
        );

        Ok(Self {
            inner,
            stop: Mutex::new(Some(stop_tx)),
            task: Mutex::new(Some(task)),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Cached state, refreshing its access time. `None` is a cache miss.
    pub fn get(&self, conversation_id: &str) -> Option<ConversationState> {
        let now_ms = self.inner.now_ms();
        let entries = self.inner.entries.read();
        let entry = entries.get(conversation_id)?;
        entry.touch(now_ms);
        Some(entry.snapshot())
    }

    /// Cached state, falling back to the durable store on a miss. A loaded
    /// conversation is inserted as clean.
    pub async fn get_or_load(&self, conversation_id: &str) -> AppResult<Option<ConversationState>> {
        if let Some(state) = self.get(conversation_id) {
            return Ok(Some(state));
        }

        let Some(loaded) = self.inner.store.load(conversation_id).await? else {
            return Ok(None);
        };

        let now_ms = self.inner.now_ms();
        let mut entries = self.inner.entries.write();
        // Another caller may have inserted while we were loading
        let entry = entries
            .entry(conversation_id.to_string())
            .or_insert_with(|| Entry::new(loaded, now_ms, false));
        entry.touch(now_ms);
        Ok(Some(entry.snapshot()))
    }

    /// Insert or replace a conversation.
    pub fn put(&self, state: ConversationState) {
        let now_ms = self.inner.now_ms();
        let id = state.conversation_id.clone();
        let mut entries = self.inner.entries.write();

        let version = entries.get(&id).map_or(0, |e| e.version + 1);
        let mut entry = Entry::new(state, now_ms, true);
        entry.version = version;
        entries.insert(id, entry);
    }

    /// Refresh an entry's access time. Returns false on a miss.
    pub fn touch(&self, conversation_id: &str) -> bool {
        let now_ms = self.inner.now_ms();
        let entries = self.inner.entries.read();
        match entries.get(conversation_id) {
            Some(entry) => {
                entry.touch(now_ms);
                true
            }
            None => false,
        }
    }

    /// Append a message and add its token usage. `None` on a cache miss.
    pub fn append(
        &self,
        conversation_id: &str,
        message: ChatMessage,
        usage: TokenUsage,
    ) -> Option<AppendOutcome> {
        let now_ms = self.inner.now_ms();
        let max_turns = self.inner.config.max_turns;
        let mut entries = self.inner.entries.write();
        let entry = entries.get_mut(conversation_id)?;

        let trimmed = entry.state.record_turn(message, usage, max_turns);
        entry.dirty = true;
        entry.version += 1;
        entry.touch(now_ms);

        Some(AppendOutcome {
            turn_count: entry.state.turn_count,
            retained: entry.state.messages.len(),
            trimmed,
            total_prompt_tokens: entry.state.total_prompt_tokens,
            total_completion_tokens: entry.state.total_completion_tokens,
        })
    }

    /// Drop a conversation from memory without saving it.
    pub fn remove(&self, conversation_id: &str) -> Option<ConversationState> {
        let removed = self.inner.entries.write().remove(conversation_id);
        removed.map(|e| e.snapshot())
    }

    /// Save every persistent entry with unsaved changes.
    ///
    /// Every pending entry is attempted; the first failure is returned.
    pub async fn flush(&self) -> AppResult<usize> {
        let pending: Vec<(String, u64, ConversationState)> = {
            let entries = self.inner.entries.read();
            entries
                .iter()
                .filter(|(_, e)| e.needs_save())
                .map(|(id, e)| (id.clone(), e.version, e.snapshot()))
                .collect()
        };

        let mut saved = Vec::with_capacity(pending.len());
        let mut first_error = None;
        for (id, version, state) in pending {
            match self.inner.store.save(&state).await {
                Ok(()) => saved.push((id, version)),
                Err(e) => {
                    tracing::warn!(conversation = %id, error = %e, "Failed to flush conversation");
                    first_error.get_or_insert(e);
                }
            }
        }

        {
            let mut entries = self.inner.entries.write();
            for (id, version) in &saved {
                if let Some(entry) = entries.get_mut(id) {
                    if entry.version == *version {
                        entry.dirty = false;
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(saved.len()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    /// Stop the eviction task and wait for it. Safe to call repeatedly.
    pub async fn close(&self) {
        if let Some(stop) = self.stop.lock().take() {
            let _ = stop.send(());
        }

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Conversation eviction task ended abnormally");
            }
            tracing::debug!("Closed conversation cache");
        }
    }
}

impl Drop for ConversationCache {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.get_mut().take() {
            tracing::debug!("Conversation cache dropped without close, stopping eviction");
            let _ = stop.send(());
        }
    }
}

async fn run_eviction(inner: Arc<Inner>, mut stop: oneshot::Receiver<()>) {
    let mut ticker = tokio::time::interval_at(
        Instant::now() + inner.config.eviction_interval,
        inner.config.eviction_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // A dropped sender stops the task too
            _ = &mut stop => break,
            _ = ticker.tick() => {
                inner.sweep().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryConversationStore;

    fn config(max_turns: usize) -> CacheConfig {
        CacheConfig {
            ttl: Duration::from_secs(30),
            max_turns,
            eviction_interval: Duration::from_secs(10),
        }
    }

    /// Background sweeps effectively disabled, for tests that sweep by hand.
    fn manual_config() -> CacheConfig {
        CacheConfig {
            eviction_interval: Duration::from_secs(3600),
            ..config(5)
        }
    }

    fn cache_with(max_turns: usize) -> (ConversationCache, Arc<InMemoryConversationStore>) {
        let store = Arc::new(InMemoryConversationStore::new());
        let cache = ConversationCache::new(config(max_turns), store.clone()).unwrap();
        (cache, store)
    }

    fn manual_cache() -> (ConversationCache, Arc<InMemoryConversationStore>) {
        let store = Arc::new(InMemoryConversationStore::new());
        let cache = ConversationCache::new(manual_config(), store.clone()).unwrap();
        (cache, store)
    }

    struct FailingStore;

    #[async_trait::async_trait]
    impl ConversationStore for FailingStore {
        async fn load(&self, _id: &str) -> AppResult<Option<ConversationState>> {
            Ok(None)
        }

        async fn save(&self, _state: &ConversationState) -> AppResult<()> {
            Err(AppError::Storage("read-only database".to_string()))
        }
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let store = Arc::new(InMemoryConversationStore::new());
        let bad = CacheConfig {
            max_turns: 0,
            ..CacheConfig::default()
        };
        assert!(matches!(
            ConversationCache::new(bad, store),
            Err(AppError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_append_keeps_most_recent_turns() {
        let (cache, _) = cache_with(2);
        cache.put(ConversationState::new("c1", "bot", "Bot"));

        for content in ["first", "second", "third"] {
            cache.append("c1", ChatMessage::user(content), TokenUsage::default());
        }

        let state = cache.get("c1").unwrap();
        let contents: Vec<&str> = state.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["second", "third"]);
        assert_eq!(state.turn_count, 3);
        cache.close().await;
    }

    #[tokio::test]
    async fn test_token_counters_survive_trimming() {
        let (cache, _) = cache_with(1);
        cache.put(ConversationState::new("c1", "bot", "Bot"));

        let mut last = (0, 0);
        for i in 1..=5u64 {
            let outcome = cache
                .append("c1", ChatMessage::assistant("reply"), TokenUsage::new(i, 2 * i))
                .unwrap();
            assert!(outcome.total_prompt_tokens >= last.0);
            assert!(outcome.total_completion_tokens >= last.1);
            last = (outcome.total_prompt_tokens, outcome.total_completion_tokens);
            assert_eq!(outcome.retained, 1);
        }

        assert_eq!(last, (15, 30));
        cache.close().await;
    }

    #[tokio::test]
    async fn test_miss_is_none_not_error() {
        let (cache, _) = cache_with(5);
        assert!(cache.get("missing").is_none());
        assert!(cache.append("missing", ChatMessage::user("x"), TokenUsage::default()).is_none());
        assert!(!cache.touch("missing"));
        assert!(cache.get_or_load("missing").await.unwrap().is_none());
        cache.close().await;
    }

    #[tokio::test]
    async fn test_get_or_load_falls_back_to_store() {
        let store = Arc::new(InMemoryConversationStore::new());
        let mut saved = ConversationState::new("c1", "bot", "Bot").persistent();
        saved.record_turn(ChatMessage::user("earlier"), TokenUsage::new(3, 0), 10);
        store.save(&saved).await.unwrap();

        let cache = ConversationCache::new(config(10), store.clone()).unwrap();
        assert!(cache.get("c1").is_none());

        let loaded = cache.get_or_load("c1").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(cache.len(), 1);
        // Loaded entries are clean
        assert_eq!(cache.flush().await.unwrap(), 0);
        cache.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_eviction_follows_last_access() {
        let (cache, _) = cache_with(5);
        cache.put(ConversationState::new("c1", "bot", "Bot"));

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(cache.get("c1").is_some());

        // 45s since start, 20s since last access
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(cache.len(), 1);

        // 75s since start, 50s since last access
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(cache.is_empty());
        cache.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_flushes_persistent_entries() {
        let (cache, store) = manual_cache();
        cache.put(ConversationState::new("keep", "bot", "Bot").persistent());
        cache.put(ConversationState::new("drop", "bot", "Bot"));
        cache.append("keep", ChatMessage::user("remember me"), TokenUsage::new(7, 0));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.inner.sweep().await, 2);

        assert!(cache.is_empty());
        assert_eq!(store.len(), 1);
        let durable = store.load("keep").await.unwrap().unwrap();
        assert_eq!(durable.messages[0].content, "remember me");
        assert_eq!(durable.total_prompt_tokens, 7);
        cache.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_keeps_entry() {
        let cache = ConversationCache::new(manual_config(), Arc::new(FailingStore)).unwrap();
        cache.put(ConversationState::new("c1", "bot", "Bot").persistent());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.inner.sweep().await, 0);
        assert_eq!(cache.len(), 1);
        assert!(cache.flush().await.is_err());
        cache.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_expiry_evicts_before_ttl() {
        let (cache, _) = manual_cache();
        let expired = ConversationState::new("old", "bot", "Bot")
            .with_expiry(Utc::now() - chrono::Duration::seconds(1));
        cache.put(expired);
        cache.put(ConversationState::new("fresh", "bot", "Bot"));

        assert_eq!(cache.inner.sweep().await, 1);
        assert!(cache.get("old").is_none());
        assert!(cache.get("fresh").is_some());
        cache.close().await;
    }

    #[tokio::test]
    async fn test_flush_clears_dirty_only_when_unchanged() {
        let (cache, store) = cache_with(5);
        cache.put(ConversationState::new("c1", "bot", "Bot").persistent());
        cache.put(ConversationState::new("c2", "bot", "Bot"));

        assert_eq!(cache.flush().await.unwrap(), 1);
        assert_eq!(cache.flush().await.unwrap(), 0);

        cache.append("c1", ChatMessage::user("again"), TokenUsage::default());
        assert_eq!(cache.flush().await.unwrap(), 1);
        assert_eq!(store.load("c1").await.unwrap().unwrap().turn_count, 1);
        cache.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (cache, _) = cache_with(5);
        cache.close().await;
        cache.close().await;
        assert!(cache.task.lock().is_none());
    }

    #[test]
    fn test_new_outside_runtime_is_config_error() {
        let store = Arc::new(InMemoryConversationStore::new());
        let result = ConversationCache::new(config(5), store);
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_without_close_stops_eviction() {
        let (cache, _store) = cache_with(5);
        let inner = Arc::downgrade(&cache.inner);

        drop(cache);
        tokio::time::sleep(Duration::from_millis(1)).await;

        // The eviction task held the last other reference
        assert!(inner.upgrade().is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let (cache, _) = cache_with(5);
        cache.put(ConversationState::new("c1", "bot", "Bot"));
        assert!(cache.remove("c1").is_some());
        assert!(cache.remove("c1").is_none());
        cache.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_and_append_lose_no_updates() {
        let store = Arc::new(InMemoryConversationStore::new());
        let cache = Arc::new(ConversationCache::new(config(1000), store).unwrap());

        let ids: Vec<String> = (0..4).map(|i| format!("conv-{}", i)).collect();
        for id in &ids {
            cache.put(ConversationState::new(id.clone(), "bot", "Bot"));
        }

        let workers = 8;
        let appends_per_worker = 200;
        let mut handles = Vec::new();
        for worker in 0..workers {
            let cache = Arc::clone(&cache);
            let ids = ids.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..appends_per_worker {
                    // Each worker touches its own conversation and a shared one
                    let id = if i % 2 == 0 { &ids[worker % 4] } else { &ids[0] };
                    cache
                        .append(id, ChatMessage::user(format!("{}-{}", worker, i)), TokenUsage::new(1, 1))
                        .unwrap();
                    assert!(cache.get(id).is_some());
                    if i % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let total_turns: u64 = ids.iter().map(|id| cache.get(id).unwrap().turn_count).sum();
        let total_tokens: u64 = ids
            .iter()
            .map(|id| cache.get(id).unwrap().total_prompt_tokens)
            .sum();
        assert_eq!(total_turns, (workers * appends_per_worker) as u64);
        assert_eq!(total_tokens, (workers * appends_per_worker) as u64);

        cache.close().await;
    }
}
