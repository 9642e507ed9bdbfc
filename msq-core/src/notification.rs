//! Notification payloads delivered over the push socket or by polling.

use crate::{roles_match, EntityId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
    Approval,
    Rejection,
    Update,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub priority: NotificationPriority,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub action_url: Option<String>,
    #[serde(default)]
    pub target_user_id: Option<EntityId>,
    #[serde(default)]
    pub target_role: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub read: bool,
    #[serde(default = "Utc::now")]
    pub created_at: Timestamp,
}

impl NotificationData {
    pub fn new(id: impl Into<String>, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NotificationKind::Info,
            title: title.into(),
            message: message.into(),
            priority: NotificationPriority::Medium,
            category: None,
            action_url: None,
            target_user_id: None,
            target_role: None,
            sender_name: None,
            metadata: None,
            read: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_kind(mut self, kind: NotificationKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn for_user(mut self, user_id: EntityId) -> Self {
        self.target_user_id = Some(user_id);
        self
    }

    pub fn for_role(mut self, role: impl Into<String>) -> Self {
        self.target_role = Some(role.into());
        self
    }

    pub fn with_created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = created_at;
        self
    }

    /// Whether this notification is addressed to the given recipient.
    ///
    /// A user target wins over a role target; a notification with neither
    /// is a broadcast.
    pub fn is_addressed_to(&self, user_id: EntityId, role: &str) -> bool {
        match (self.target_user_id, self.target_role.as_deref()) {
            (Some(target), _) => target == user_id,
            (None, Some(target_role)) => roles_match(target_role, role),
            (None, None) => true,
        }
    }
}
