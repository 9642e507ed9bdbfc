//! Staleness and retention policies for cached queries.
//!
//! Every read returns a [`CacheRead`] that carries its staleness, so callers
//! can decide whether to show cached data while a refetch is in flight.

use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Per-query cache policy.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    /// After this long, a read triggers a refetch.
    pub stale_time: Duration,
    /// Unobserved entries older than this are evicted by `gc`.
    pub gc_time: Duration,
    pub retry: RetryPolicy,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            stale_time: Duration::from_secs(30),
            gc_time: Duration::from_secs(5 * 60),
            retry: RetryPolicy::query_default(),
        }
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn with_gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = gc_time;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Data that is always refetched on read; used for live dashboards.
    pub fn always_stale() -> Self {
        Self::default().with_stale_time(Duration::ZERO)
    }
}

/// Result of a cache read, carrying staleness metadata.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    updated_at: DateTime<Utc>,
    age: Duration,
    stale: bool,
    optimistic: bool,
    was_cache_hit: bool,
}

impl<T> CacheRead<T> {
    pub(crate) fn new(
        value: T,
        updated_at: DateTime<Utc>,
        age: Duration,
        stale: bool,
        optimistic: bool,
        was_cache_hit: bool,
    ) -> Self {
        Self {
            value,
            updated_at,
            age,
            stale,
            optimistic,
            was_cache_hit,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// How long ago the data was written.
    pub fn staleness(&self) -> Duration {
        self.age
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Older than the stale time, or explicitly invalidated.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Contains local writes the server has not confirmed yet.
    pub fn is_optimistic(&self) -> bool {
        self.optimistic
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            updated_at: self.updated_at,
            age: self.age,
            stale: self.stale,
            optimistic: self.optimistic,
            was_cache_hit: self.was_cache_hit,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
