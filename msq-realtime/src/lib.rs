//! MeterSquare Realtime - table change feeds wired into the query cache.
//!
//! One channel per table. Each change event invalidates the cache keys that
//! display the row and may raise a status toast. Dropped channels are retried
//! after a fixed delay; once retries run out the table is marked failed and
//! the user is asked to refresh manually.

mod manager;
mod protocol;
mod routes;

pub use manager::{AppliedChange, RealtimeConfig, SubscriptionManager, SubscriptionStatus};
pub use protocol::{ChangeEvent, ChangeFeed, ChangeKind, ChannelMessage};
pub use routes::{invalidations_for, toast_for, EventRouter, RoutedChange};
