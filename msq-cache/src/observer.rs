//! Active queries that follow a cache key.
//!
//! An observer fetches on start, republishes local writes, and refetches
//! whenever its key is invalidated. Cancelling never aborts a request that
//! is already in flight: the response still lands in the cache, but the
//! observer stops publishing.

use crate::freshness::QueryOptions;
use crate::key::QueryKey;
use crate::store::{CacheEvent, QueryCache, QueryFetcher};
use msq_core::FetchError;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Notify};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Loading,
    Success,
    Error,
}

/// Snapshot of an observed query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState {
    pub status: QueryStatus,
    pub data: Option<Value>,
    pub error: Option<FetchError>,
    pub is_fetching: bool,
}

impl QueryState {
    fn loading(data: Option<Value>) -> Self {
        Self {
            status: QueryStatus::Loading,
            data,
            error: None,
            is_fetching: true,
        }
    }
}

pub struct QueryObserver {
    key: QueryKey,
    state: watch::Receiver<QueryState>,
    mounted: Arc<AtomicBool>,
    stop: Arc<Notify>,
}

impl QueryObserver {
    /// Start observing `key`. Must be called inside a Tokio runtime.
    pub fn spawn(
        cache: QueryCache,
        key: QueryKey,
        options: QueryOptions,
        fetcher: Arc<dyn QueryFetcher>,
    ) -> Self {
        let (tx, rx) = watch::channel(QueryState::loading(cache.get_query_data(&key)));
        let mounted = Arc::new(AtomicBool::new(true));
        let stop = Arc::new(Notify::new());

        let task = ObserverTask {
            guard_key: key.clone(),
            events: cache.subscribe(),
            cache,
            options,
            fetcher,
            tx,
            mounted: mounted.clone(),
            stop: stop.clone(),
        };
        tokio::spawn(task.run());

        Self {
            key,
            state: rx,
            mounted,
            stop,
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn state(&self) -> QueryState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueryState> {
        self.state.clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    /// Stop publishing. An in-flight fetch completes but its result is discarded here.
    pub fn cancel(&self) {
        if self.mounted.swap(false, Ordering::SeqCst) {
            self.stop.notify_one();
        }
    }
}

impl Drop for QueryObserver {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct ObserverTask {
    guard_key: QueryKey,
    cache: QueryCache,
    events: broadcast::Receiver<CacheEvent>,
    options: QueryOptions,
    fetcher: Arc<dyn QueryFetcher>,
    tx: watch::Sender<QueryState>,
    mounted: Arc<AtomicBool>,
    stop: Arc<Notify>,
}

impl ObserverTask {
    async fn run(mut self) {
        let key = self.guard_key.clone();
        let _guard = self.cache.observe(key.clone());

        if !self.fetch(false).await {
            return;
        }

        loop {
            tokio::select! {
                _ = self.stop.notified() => break,
                event = self.events.recv() => match event {
                    Ok(CacheEvent::Invalidated { key: changed }) if changed == key => {
                        if !self.fetch(true).await {
                            break;
                        }
                    }
                    Ok(CacheEvent::Updated { key: changed }) if changed == key => {
                        let data = self.cache.get_query_data(&key);
                        self.tx.send_modify(|state| state.data = data);
                    }
                    Ok(CacheEvent::Removed { key: changed }) if changed == key => {
                        self.tx.send_modify(|state| state.data = None);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(key = %key, skipped, "Observer lagged; refetching");
                        if !self.fetch(true).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    /// Returns false once the observer has been cancelled.
    async fn fetch(&mut self, force: bool) -> bool {
        self.tx.send_modify(|state| state.is_fetching = true);
        let result = if force {
            self.cache
                .refetch(&self.guard_key, &self.options, self.fetcher.as_ref())
                .await
        } else {
            self.cache
                .fetch_query(&self.guard_key, &self.options, self.fetcher.as_ref())
                .await
        };

        if !self.mounted.load(Ordering::SeqCst) {
            tracing::debug!(key = %self.guard_key, "Discarding result for cancelled query");
            return false;
        }

        self.tx.send_modify(|state| {
            state.is_fetching = false;
            match result {
                Ok(read) => {
                    state.status = QueryStatus::Success;
                    state.data = Some(read.into_value());
                    state.error = None;
                }
                Err(err) => {
                    state.status = QueryStatus::Error;
                    state.error = Some(err);
                }
            }
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyMatcher;
    use crate::query_key;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct Counting(AtomicU32);

    #[async_trait]
    impl QueryFetcher for Counting {
        async fn fetch(&self, _key: &QueryKey) -> Result<Value, FetchError> {
            let n = self.0.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(json!({ "version": n }))
        }
    }

    #[tokio::test]
    async fn test_observer_refetches_on_invalidation() {
        let cache = QueryCache::default();
        let fetcher = Arc::new(Counting(AtomicU32::new(0)));
        let key = query_key!["boq", 42];
        let observer = QueryObserver::spawn(
            cache.clone(),
            key.clone(),
            QueryOptions::default(),
            fetcher.clone(),
        );
        let mut rx = observer.subscribe();
        rx.wait_for(|s| s.data == Some(json!({"version": 1})))
            .await
            .unwrap();
        assert_eq!(observer.state().status, QueryStatus::Success);
        assert_eq!(cache.observer_count(&key), 1);

        cache.invalidate(&KeyMatcher::contains("boq"));
        rx.wait_for(|s| s.data == Some(json!({"version": 2})) && !s.is_fetching)
            .await
            .unwrap();
        assert_eq!(fetcher.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_observer_follows_local_writes() {
        let cache = QueryCache::default();
        let key = query_key!["vendors"];
        let observer = QueryObserver::spawn(
            cache.clone(),
            key.clone(),
            QueryOptions::default(),
            Arc::new(Counting(AtomicU32::new(0))),
        );
        let mut rx = observer.subscribe();
        rx.wait_for(|s| s.status == QueryStatus::Success).await.unwrap();

        cache.set_query_data(key, json!(["local"]));
        rx.wait_for(|s| s.data == Some(json!(["local"]))).await.unwrap();
    }

    struct Slow;

    #[async_trait]
    impl QueryFetcher for Slow {
        async fn fetch(&self, _key: &QueryKey) -> Result<Value, FetchError> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(json!("late"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_but_does_not_abort() {
        let cache = QueryCache::default();
        let key = query_key!["purchases"];
        let observer = QueryObserver::spawn(
            cache.clone(),
            key.clone(),
            QueryOptions::default(),
            Arc::new(Slow),
        );
        let rx = observer.subscribe();
        tokio::task::yield_now().await;
        observer.cancel();
        assert!(!observer.is_mounted());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(cache.get_query_data(&key), Some(json!("late")));
        assert_eq!(rx.borrow().data, None);
        assert_eq!(cache.observer_count(&key), 0);
    }
}
