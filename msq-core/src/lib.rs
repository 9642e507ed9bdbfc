//! MeterSquare Core - shared types for the client sync layer.
//!
//! Entities, roles, tables, toasts and errors used by the cache, realtime
//! and notification crates. No I/O lives here.

mod backoff;
mod entities;
mod enums;
mod error;
mod identity;
mod notification;
mod recent;
mod toast;
pub mod vendor;

pub use backoff::BackoffConfig;
pub use entities::{
    Boq, BoqItem, ChangeRequest, Purchase, Vendor, VendorDeliveryInspection, VendorReturnRequest,
};
pub use enums::{normalize_role_name, roles_match, BoqStatus, Role, Table};
pub use error::{
    CacheError, ConfigError, FetchError, MsqError, MsqResult, NotifyError, RealtimeError,
    ValidationError,
};
pub use identity::{DurationMs, EntityId, Timestamp};
pub use notification::{NotificationData, NotificationKind, NotificationPriority};
pub use recent::RecentSet;
pub use toast::{NullToastSink, Toast, ToastAction, ToastLevel, ToastSink};
pub use vendor::{tax_field_for_country, TaxField, TaxScheme, VendorForm};
