//! The shared query cache.
//!
//! Entries are JSON values keyed by [`QueryKey`]. Staleness and retention use
//! `tokio::time::Instant` so that paused-clock tests drive them; the
//! wall-clock `updated_at` is kept only for display and persistence.

use crate::freshness::{CacheRead, QueryOptions};
use crate::key::{KeyMatcher, QueryKey};
use crate::optimistic::strip_optimistic;
use crate::retry::with_retry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use msq_core::{CacheError, FetchError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const EVENT_CAPACITY: usize = 256;

/// Change notifications published to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Updated { key: QueryKey },
    Invalidated { key: QueryKey },
    Removed { key: QueryKey },
}

impl CacheEvent {
    pub fn key(&self) -> &QueryKey {
        match self {
            CacheEvent::Updated { key }
            | CacheEvent::Invalidated { key }
            | CacheEvent::Removed { key } => key,
        }
    }
}

/// Loads the data behind a query key from the backend.
#[async_trait]
pub trait QueryFetcher: Send + Sync {
    async fn fetch(&self, key: &QueryKey) -> Result<Value, FetchError>;
}

/// Adapts an async closure into a [`QueryFetcher`].
pub struct FnFetcher<F>(F);

impl<F> FnFetcher<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> QueryFetcher for FnFetcher<F>
where
    F: Fn(QueryKey) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, FetchError>> + Send,
{
    async fn fetch(&self, key: &QueryKey) -> Result<Value, FetchError> {
        (self.0)(key.clone()).await
    }
}

#[async_trait]
impl<T: QueryFetcher + ?Sized> QueryFetcher for Arc<T> {
    async fn fetch(&self, key: &QueryKey) -> Result<Value, FetchError> {
        (**self).fetch(key).await
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub fetch_failures: u64,
    pub invalidations: u64,
    pub evictions: u64,
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A cache entry as written to the session file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedQuery {
    pub key: Value,
    pub data: Value,
    pub updated_at: DateTime<Utc>,
}

struct Entry {
    data: Value,
    updated_at: DateTime<Utc>,
    written_at: Instant,
    inactive_since: Instant,
    invalidated: bool,
    options: QueryOptions,
}

impl Entry {
    fn is_stale(&self) -> bool {
        self.invalidated || self.written_at.elapsed() >= self.options.stale_time
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<QueryKey, Entry>,
    observers: HashMap<QueryKey, usize>,
    pending_optimistic: HashMap<QueryKey, usize>,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    invalidations: AtomicU64,
    evictions: AtomicU64,
}

struct Inner {
    state: RwLock<State>,
    defaults: QueryOptions,
    events: broadcast::Sender<CacheEvent>,
    counters: Counters,
}

/// Keyed query cache shared by every dashboard.
///
/// Cloning is cheap; all clones see the same entries.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(QueryOptions::default())
    }
}

impl QueryCache {
    pub fn new(defaults: QueryOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State::default()),
                defaults,
                events,
                counters: Counters::default(),
            }),
        }
    }

    pub fn defaults(&self) -> &QueryOptions {
        &self.inner.defaults
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    fn read_state(&self) -> RwLockReadGuard<'_, State> {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, State> {
        self.inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: CacheEvent) {
        // No receivers is fine.
        let _ = self.inner.events.send(event);
    }

    pub fn get_query_data(&self, key: &QueryKey) -> Option<Value> {
        self.read_state().entries.get(key).map(|e| e.data.clone())
    }

    pub fn get_typed<T: DeserializeOwned>(&self, key: &QueryKey) -> Result<Option<T>, CacheError> {
        self.get_query_data(key)
            .map(|value| {
                serde_json::from_value(value).map_err(|e| CacheError::Decode {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// Write `value` under `key`, returning the previous value.
    pub fn set_query_data(&self, key: QueryKey, value: Value) -> Option<Value> {
        self.write_entry(key, value, None)
    }

    pub fn set_typed<T: Serialize>(&self, key: QueryKey, value: &T) -> Result<Option<Value>, CacheError> {
        let encoded = serde_json::to_value(value).map_err(|e| CacheError::Encode {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Ok(self.set_query_data(key, encoded))
    }

    /// Replace the value with `f(current)`. Returning `None` leaves the entry untouched.
    pub fn update_query_data<F>(&self, key: &QueryKey, f: F) -> Option<Value>
    where
        F: FnOnce(Option<&Value>) -> Option<Value>,
    {
        let next = {
            let state = self.read_state();
            f(state.entries.get(key).map(|e| &e.data))
        }?;
        self.set_query_data(key.clone(), next)
    }

    fn write_entry(&self, key: QueryKey, value: Value, options: Option<&QueryOptions>) -> Option<Value> {
        let now = Instant::now();
        let previous = {
            let mut state = self.write_state();
            match state.entries.get_mut(&key) {
                Some(entry) => {
                    entry.written_at = now;
                    entry.updated_at = Utc::now();
                    entry.invalidated = false;
                    if let Some(options) = options {
                        entry.options = options.clone();
                    }
                    Some(std::mem::replace(&mut entry.data, value))
                }
                None => {
                    state.entries.insert(
                        key.clone(),
                        Entry {
                            data: value,
                            updated_at: Utc::now(),
                            written_at: now,
                            inactive_since: now,
                            invalidated: false,
                            options: options.cloned().unwrap_or_else(|| self.inner.defaults.clone()),
                        },
                    );
                    None
                }
            }
        };
        self.publish(CacheEvent::Updated { key });
        previous
    }

    /// Read with staleness metadata. Counts as a hit or a miss.
    pub fn read(&self, key: &QueryKey) -> Option<CacheRead<Value>> {
        let state = self.read_state();
        let read = state.entries.get(key).map(|entry| {
            CacheRead::new(
                entry.data.clone(),
                entry.updated_at,
                entry.written_at.elapsed(),
                entry.is_stale(),
                state.pending_optimistic.contains_key(key),
                true,
            )
        });
        let counter = if read.is_some() {
            &self.inner.counters.hits
        } else {
            &self.inner.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        read
    }

    /// Missing entries count as stale.
    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.read_state()
            .entries
            .get(key)
            .map(Entry::is_stale)
            .unwrap_or(true)
    }

    pub fn remove_query(&self, key: &QueryKey) -> Option<Value> {
        let removed = self.write_state().entries.remove(key).map(|e| e.data);
        if removed.is_some() {
            self.publish(CacheEvent::Removed { key: key.clone() });
        }
        removed
    }

    /// Mark every matching entry stale and tell observers to refetch.
    pub fn invalidate(&self, matcher: &KeyMatcher) -> Vec<QueryKey> {
        let keys: Vec<QueryKey> = {
            let mut state = self.write_state();
            state
                .entries
                .iter_mut()
                .filter(|(key, _)| matcher.matches(key))
                .map(|(key, entry)| {
                    entry.invalidated = true;
                    key.clone()
                })
                .collect()
        };
        self.inner
            .counters
            .invalidations
            .fetch_add(keys.len() as u64, Ordering::Relaxed);
        tracing::debug!(%matcher, count = keys.len(), "Invalidated queries");
        for key in &keys {
            self.publish(CacheEvent::Invalidated { key: key.clone() });
        }
        keys
    }

    /// Return cached data while fresh, otherwise fetch and store it.
    pub async fn fetch_query<F>(
        &self,
        key: &QueryKey,
        options: &QueryOptions,
        fetcher: &F,
    ) -> Result<CacheRead<Value>, FetchError>
    where
        F: QueryFetcher + ?Sized,
    {
        if let Some(read) = self.read(key) {
            if !read.is_stale() {
                return Ok(read);
            }
        }
        self.refetch(key, options, fetcher).await
    }

    /// Fetch unconditionally, replacing whatever is cached.
    pub async fn refetch<F>(
        &self,
        key: &QueryKey,
        options: &QueryOptions,
        fetcher: &F,
    ) -> Result<CacheRead<Value>, FetchError>
    where
        F: QueryFetcher + ?Sized,
    {
        self.inner.counters.fetches.fetch_add(1, Ordering::Relaxed);
        match with_retry(&options.retry, || fetcher.fetch(key)).await {
            Ok(value) => {
                self.write_entry(key.clone(), value.clone(), Some(options));
                Ok(CacheRead::new(
                    value,
                    Utc::now(),
                    Duration::ZERO,
                    options.stale_time.is_zero(),
                    false,
                    false,
                ))
            }
            Err(err) => {
                self.inner
                    .counters
                    .fetch_failures
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key, error = %err, "Query fetch failed");
                Err(err)
            }
        }
    }

    pub async fn fetch_typed<T, F>(
        &self,
        key: &QueryKey,
        options: &QueryOptions,
        fetcher: &F,
    ) -> Result<CacheRead<T>, FetchError>
    where
        T: DeserializeOwned,
        F: QueryFetcher + ?Sized,
    {
        let read = self.fetch_query(key, options, fetcher).await?;
        let decoded = serde_json::from_value::<T>(read.value().clone())
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        Ok(read.map(|_| decoded))
    }

    /// Register interest in `key`; the entry is exempt from gc while the guard lives.
    pub fn observe(&self, key: QueryKey) -> ObserverGuard {
        *self.write_state().observers.entry(key.clone()).or_insert(0) += 1;
        ObserverGuard {
            cache: self.clone(),
            key,
        }
    }

    pub fn observer_count(&self, key: &QueryKey) -> usize {
        self.read_state().observers.get(key).copied().unwrap_or(0)
    }

    fn release_observer(&self, key: &QueryKey) {
        let mut state = self.write_state();
        let remaining = match state.observers.get_mut(key) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => return,
        };
        if remaining == 0 {
            state.observers.remove(key);
            if let Some(entry) = state.entries.get_mut(key) {
                entry.inactive_since = Instant::now();
            }
        }
    }

    pub(crate) fn begin_optimistic(&self, key: &QueryKey) {
        *self
            .write_state()
            .pending_optimistic
            .entry(key.clone())
            .or_insert(0) += 1;
    }

    pub(crate) fn end_optimistic(&self, key: &QueryKey) {
        let mut state = self.write_state();
        if let Some(count) = state.pending_optimistic.get_mut(key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.pending_optimistic.remove(key);
            }
        }
    }

    pub fn has_pending_optimistic(&self, key: &QueryKey) -> bool {
        self.read_state().pending_optimistic.contains_key(key)
    }

    /// Evict unobserved entries whose gc time has elapsed. Returns the eviction count.
    pub fn gc(&self) -> usize {
        let evicted: Vec<QueryKey> = {
            let mut state = self.write_state();
            let State {
                entries,
                observers,
                pending_optimistic,
            } = &mut *state;
            let expired: Vec<QueryKey> = entries
                .iter()
                .filter(|(key, entry)| {
                    !observers.contains_key(*key)
                        && !pending_optimistic.contains_key(*key)
                        && entry.inactive_since.elapsed() >= entry.options.gc_time
                })
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                entries.remove(key);
            }
            expired
        };
        if !evicted.is_empty() {
            self.inner
                .counters
                .evictions
                .fetch_add(evicted.len() as u64, Ordering::Relaxed);
            tracing::debug!(count = evicted.len(), "Evicted inactive queries");
        }
        for key in &evicted {
            self.publish(CacheEvent::Removed { key: key.clone() });
        }
        evicted.len()
    }

    /// Run [`QueryCache::gc`] every `interval` until the cache is dropped.
    pub fn spawn_gc(&self, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                QueryCache { inner }.gc();
            }
        })
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        self.read_state().entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let keys: Vec<QueryKey> = self.write_state().entries.drain().map(|(k, _)| k).collect();
        for key in keys {
            self.publish(CacheEvent::Removed { key });
        }
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            fetches: c.fetches.load(Ordering::Relaxed),
            fetch_failures: c.fetch_failures.load(Ordering::Relaxed),
            invalidations: c.invalidations.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            entry_count: self.len() as u64,
        }
    }

    /// Entries safe to write to disk: nothing with an unconfirmed local write.
    pub fn persistable_snapshot(&self) -> Vec<PersistedQuery> {
        let state = self.read_state();
        let mut snapshot: Vec<PersistedQuery> = state
            .entries
            .iter()
            .filter(|(key, _)| !state.pending_optimistic.contains_key(*key))
            .filter_map(|(key, entry)| {
                strip_optimistic(&entry.data).map(|data| PersistedQuery {
                    key: key.to_json(),
                    data,
                    updated_at: entry.updated_at,
                })
            })
            .collect();
        snapshot.sort_by(|a, b| a.key.to_string().cmp(&b.key.to_string()));
        snapshot
    }

    /// Load persisted entries. They come back stale so the first read refetches.
    pub fn restore(&self, snapshot: Vec<PersistedQuery>) -> usize {
        let now = Instant::now();
        let mut state = self.write_state();
        let mut restored = 0;
        for persisted in snapshot {
            let Some(key) = QueryKey::from_json(persisted.key) else {
                continue;
            };
            if state.entries.contains_key(&key) {
                continue;
            }
            state.entries.insert(
                key,
                Entry {
                    data: persisted.data,
                    updated_at: persisted.updated_at,
                    written_at: now,
                    inactive_since: now,
                    invalidated: true,
                    options: self.inner.defaults.clone(),
                },
            );
            restored += 1;
        }
        restored
    }
}

/// Keeps a query observed until dropped.
pub struct ObserverGuard {
    cache: QueryCache,
    key: QueryKey,
}

impl ObserverGuard {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.cache.release_observer(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_key;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;

    struct CountingFetcher {
        calls: AtomicU32,
        value: Value,
    }

    #[async_trait]
    impl QueryFetcher for CountingFetcher {
        async fn fetch(&self, _key: &QueryKey) -> Result<Value, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.value.clone())
        }
    }

    fn fetcher(value: Value) -> CountingFetcher {
        CountingFetcher {
            calls: AtomicU32::new(0),
            value,
        }
    }

    #[test]
    fn test_set_and_get() {
        let cache = QueryCache::default();
        let key = query_key!["vendors", "list"];
        assert!(cache.set_query_data(key.clone(), json!([1, 2])).is_none());
        assert_eq!(cache.get_query_data(&key), Some(json!([1, 2])));
        assert_eq!(cache.set_query_data(key.clone(), json!([3])), Some(json!([1, 2])));
        assert_eq!(cache.remove_query(&key), Some(json!([3])));
        assert!(cache.get_query_data(&key).is_none());
    }

    #[test]
    fn test_read_counts_hits_and_misses() {
        let cache = QueryCache::default();
        let key = query_key!["boq", 1];
        assert!(cache.read(&key).is_none());
        cache.set_query_data(key.clone(), json!({"boq_id": 1}));
        let read = cache.read(&key).unwrap();
        assert!(!read.is_stale());
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < 0.001);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_go_stale_after_stale_time() {
        let cache = QueryCache::default();
        let key = query_key!["purchases"];
        cache.set_query_data(key.clone(), json!([]));
        assert!(!cache.is_stale(&key));
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.is_stale(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_query_uses_fresh_data() {
        let cache = QueryCache::default();
        let key = query_key!["vendors"];
        let f = fetcher(json!(["acme"]));
        let options = QueryOptions::default();

        let first = cache.fetch_query(&key, &options, &f).await.unwrap();
        assert!(!first.was_cache_hit());
        let second = cache.fetch_query(&key, &options, &f).await.unwrap();
        assert!(second.was_cache_hit());
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        cache.fetch_query(&key, &options, &f).await.unwrap();
        assert_eq!(f.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_marks_stale_and_publishes() {
        let cache = QueryCache::default();
        let mut events = cache.subscribe();
        cache.set_query_data(query_key!["boqs", "list"], json!([]));
        cache.set_query_data(query_key!["boq", 42], json!({}));
        cache.set_query_data(query_key!["boq", 7], json!({}));
        // drain the three Updated events
        for _ in 0..3 {
            events.recv().await.unwrap();
        }

        let keys = cache.invalidate(&KeyMatcher::sequence(vec![
            crate::KeySegment::from("boq"),
            crate::KeySegment::from(42),
        ]));
        assert_eq!(keys, vec![query_key!["boq", 42]]);
        assert!(cache.is_stale(&query_key!["boq", 42]));
        assert!(!cache.is_stale(&query_key!["boq", 7]));
        assert_eq!(
            events.recv().await.unwrap(),
            CacheEvent::Invalidated {
                key: query_key!["boq", 42]
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_gc_spares_observed_entries() {
        let cache = QueryCache::default();
        let observed = query_key!["pm_boqs"];
        let idle = query_key!["td_boqs"];
        cache.set_query_data(observed.clone(), json!([]));
        cache.set_query_data(idle.clone(), json!([]));
        let guard = cache.observe(observed.clone());

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(cache.gc(), 1);
        assert!(cache.get_query_data(&idle).is_none());
        assert!(cache.get_query_data(&observed).is_some());

        drop(guard);
        assert_eq!(cache.gc(), 0);
        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(cache.gc(), 1);
        assert_eq!(cache.stats().evictions, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_is_counted() {
        struct Failing;
        #[async_trait]
        impl QueryFetcher for Failing {
            async fn fetch(&self, _key: &QueryKey) -> Result<Value, FetchError> {
                Err(FetchError::Http {
                    status: 403,
                    message: "forbidden".to_string(),
                })
            }
        }
        let cache = QueryCache::default();
        let err = cache
            .fetch_query(&query_key!["boqs"], &QueryOptions::default(), &Failing)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert_eq!(cache.stats().fetch_failures, 1);
    }

    #[test]
    fn test_snapshot_strips_optimistic_items_and_restores_stale() {
        let cache = QueryCache::default();
        cache.set_query_data(
            query_key!["vendors"],
            json!([{"vendor_id": 1}, {"vendor_id": "temp-x", "_optimistic": true}]),
        );
        let snapshot = cache.persistable_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].data, json!([{"vendor_id": 1}]));

        let other = QueryCache::default();
        assert_eq!(other.restore(snapshot), 1);
        assert!(other.is_stale(&query_key!["vendors"]));
    }

    #[test]
    fn test_snapshot_skips_keys_with_pending_writes() {
        let cache = QueryCache::default();
        let key = query_key!["purchases"];
        cache.set_query_data(key.clone(), json!([]));
        cache.begin_optimistic(&key);
        assert!(cache.persistable_snapshot().is_empty());
        cache.end_optimistic(&key);
        assert_eq!(cache.persistable_snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_fn_fetcher() {
        let f = FnFetcher::new(|key: QueryKey| async move { Ok::<_, FetchError>(key.to_json()) });
        let value = f.fetch(&query_key!["a", 1]).await.unwrap();
        assert_eq!(value, json!(["a", 1]));
    }
}
