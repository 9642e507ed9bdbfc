//! In-app toast messages raised by the sync layer.

use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToastLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToastAction {
    Refresh,
    Retry,
    Dismiss,
    Open(String),
}

#[derive(Debug, Clone)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,
    pub description: Option<String>,
    pub action: Option<ToastAction>,
    /// Stable id; sinks may use it to collapse repeats.
    pub id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Toast {
    pub fn new(level: ToastLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            description: None,
            action: None,
            id: None,
            created_at: Utc::now(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(ToastLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(ToastLevel::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(ToastLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ToastLevel::Error, message)
    }

    pub fn with_action(mut self, action: ToastAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Destination for toasts. The sync layer never renders anything itself.
pub trait ToastSink: Send + Sync {
    fn show(&self, toast: Toast);
}

impl<T: ToastSink + ?Sized> ToastSink for Arc<T> {
    fn show(&self, toast: Toast) {
        (**self).show(toast)
    }
}

/// Sink that drops every toast.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullToastSink;

impl ToastSink for NullToastSink {
    fn show(&self, _toast: Toast) {}
}
