//! Error types for MeterSquare sync operations

use crate::Table;
use thiserror::Error;

/// Errors from a request against the REST backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Validation failed with {} field error(s)", errors.len())]
    Rejected { errors: Vec<ValidationError> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl FetchError {
    /// HTTP status of the failure, if the backend answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Rejected { .. } => Some(422),
            _ => None,
        }
    }

    /// Returns true for 4xx responses.
    pub fn is_client_error(&self) -> bool {
        self.status()
            .map(|status| (400..500).contains(&status))
            .unwrap_or(false)
    }

    /// Transient failures may be retried; client errors never are.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => !(400..500).contains(status),
            Self::Network(_) | Self::Timeout { .. } => true,
            Self::Rejected { .. } | Self::Decode(_) | Self::Cancelled => false,
        }
    }
}

/// Field-level validation errors, rendered inline next to form fields.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ValidationError {
    pub fn required(field: impl Into<String>) -> Self {
        Self::RequiredFieldMissing {
            field: field.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Name of the offending field.
    pub fn field(&self) -> &str {
        match self {
            Self::RequiredFieldMissing { field } | Self::InvalidValue { field, .. } => field,
        }
    }
}

/// Errors raised while reading or mutating cached query data.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cached data for {key} could not be decoded: {reason}")]
    Decode { key: String, reason: String },

    #[error("Cached data for {key} could not be encoded: {reason}")]
    Encode { key: String, reason: String },

    #[error("Cached data for {key} is not a list")]
    NotAList { key: String },

    #[error("No item with {id_field}={id} under {key}")]
    ItemNotFound {
        key: String,
        id_field: String,
        id: String,
    },
}

/// Realtime change-feed errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RealtimeError {
    #[error("Failed to open channel for {table}: {reason}")]
    ConnectFailed { table: Table, reason: String },

    #[error("Channel for {table} is already active")]
    AlreadySubscribed { table: Table },

    #[error("Channel for {table} closed: {reason}")]
    ChannelClosed { table: Table, reason: String },

    #[error("Malformed change event: {0}")]
    Decode(String),
}

/// Notification socket and polling errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("Socket connection failed: {0}")]
    Connect(String),

    #[error("Socket closed: {0}")]
    Closed(String),

    #[error("Malformed socket event: {0}")]
    Decode(String),

    #[error("Notification request failed: {0}")]
    Fetch(#[from] FetchError),
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Master error type for the sync layer.
#[derive(Debug, Clone, Error)]
pub enum MsqError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Realtime error: {0}")]
    Realtime(#[from] RealtimeError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for sync-layer operations.
pub type MsqResult<T> = Result<T, MsqError>;

// =============================================================================
// TESTS
// =============================================================================
