//! MeterSquare Cache - keyed query cache for the dashboards.
//!
//! Holds server data by [`QueryKey`], tracks staleness, evicts unobserved
//! entries, and supports optimistic local writes that can be rolled back.
//!
//! # Example
//!
//! ```ignore
//! let cache = QueryCache::default();
//! let read = cache.fetch_query(&query_key!["boq", 42], cache.defaults(), &fetcher).await?;
//! if read.is_stale() {
//!     // show cached data while a refetch runs
//! }
//! ```

mod freshness;
mod key;
mod mutation;
mod observer;
pub mod optimistic;
mod retry;
mod store;

pub use freshness::{CacheRead, QueryOptions};
pub use key::{KeyMatcher, KeySegment, QueryKey};
pub use mutation::{run_mutation, run_mutation_with, MutationOptions};
pub use observer::{QueryObserver, QueryState, QueryStatus};
pub use optimistic::{
    optimistic_add, optimistic_remove, optimistic_update, OptimisticContext, OPTIMISTIC_MARKER,
};
pub use retry::{with_retry, RetryPolicy};
pub use store::{
    CacheEvent, CacheStats, FnFetcher, ObserverGuard, PersistedQuery, QueryCache, QueryFetcher,
};
