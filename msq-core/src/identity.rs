//! Identity types for MeterSquare entities

use chrono::{DateTime, Utc};

/// Backend row identifier. Every table uses an integer primary key.
pub type EntityId = i64;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Duration in milliseconds for timeouts and backoff values.
pub type DurationMs = u64;
