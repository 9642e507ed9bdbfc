//! Push-socket events and the transport seams the hub talks through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use msq_core::{
    EntityId, FetchError, NotificationData, NotificationKind, NotificationPriority, NotifyError,
    Timestamp,
};
use serde::Deserialize;
use serde_json::Value;

/// Raw frame from the push socket.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketFrame {
    Event { name: String, payload: Value },
    Closed { reason: String },
    Error { message: String },
}

/// Joins rooms and streams frames until the connection drops.
#[async_trait]
pub trait PushSocket: Send + Sync {
    async fn connect(&self, rooms: &[String]) -> Result<BoxStream<'static, SocketFrame>, NotifyError>;
}

/// REST access to stored notifications, used on connect and by polling.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    async fn fetch_since(
        &self,
        since: Option<Timestamp>,
    ) -> Result<Vec<NotificationData>, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrAction {
    Submitted,
    Approved,
    Rejected,
    Forwarded,
}

impl PrAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrAction::Submitted => "submitted",
            PrAction::Approved => "approved",
            PrAction::Rejected => "rejected",
            PrAction::Forwarded => "forwarded",
        }
    }
}

/// Payload of the `pr:*` events.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PrPayload {
    #[serde(default, alias = "pr_id", alias = "purchase_id")]
    pub cr_id: Option<EntityId>,
    #[serde(default)]
    pub notification_id: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub item_name: Option<String>,
    #[serde(
        default,
        alias = "submitted_by",
        alias = "approved_by",
        alias = "rejected_by",
        alias = "forwarded_by"
    )]
    pub actor_name: Option<String>,
    #[serde(default, alias = "rejection_reason")]
    pub reason: Option<String>,
    #[serde(default)]
    pub target_user_id: Option<EntityId>,
    #[serde(default)]
    pub target_role: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Payload of `boq:status`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BoqStatusPayload {
    pub boq_id: EntityId,
    pub status: String,
    #[serde(default)]
    pub boq_name: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub notification_id: Option<String>,
    #[serde(default)]
    pub actor_name: Option<String>,
    #[serde(default)]
    pub target_user_id: Option<EntityId>,
    #[serde(default)]
    pub target_role: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Notification(NotificationData),
    PurchaseRequest { action: PrAction, payload: PrPayload },
    BoqStatus(BoqStatusPayload),
}

impl SocketEvent {
    /// Decode a named event. Unknown names yield `Ok(None)`.
    pub fn parse(name: &str, payload: Value) -> Result<Option<Self>, NotifyError> {
        let decode_err = |e: serde_json::Error| NotifyError::Decode(format!("{}: {}", name, e));
        let event = match name {
            "notification" | "new_notification" => {
                // Some emitters wrap the body as {"notification": {...}}.
                let body = match payload {
                    Value::Object(mut map) if map.contains_key("notification") => map
                        .remove("notification")
                        .unwrap_or(Value::Null),
                    other => other,
                };
                SocketEvent::Notification(serde_json::from_value(body).map_err(decode_err)?)
            }
            "pr:submitted" | "pr:approved" | "pr:rejected" | "pr:forwarded" => {
                let action = match name {
                    "pr:submitted" => PrAction::Submitted,
                    "pr:approved" => PrAction::Approved,
                    "pr:rejected" => PrAction::Rejected,
                    _ => PrAction::Forwarded,
                };
                SocketEvent::PurchaseRequest {
                    action,
                    payload: serde_json::from_value(payload).map_err(decode_err)?,
                }
            }
            "boq:status" => SocketEvent::BoqStatus(serde_json::from_value(payload).map_err(decode_err)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    pub fn into_notification(self) -> NotificationData {
        match self {
            SocketEvent::Notification(n) => n,
            SocketEvent::PurchaseRequest { action, payload } => pr_notification(action, payload),
            SocketEvent::BoqStatus(payload) => boq_notification(payload),
        }
    }
}

fn pr_notification(action: PrAction, p: PrPayload) -> NotificationData {
    let created_at = p.timestamp.unwrap_or_else(Utc::now);
    let subject = match p.cr_id {
        Some(id) => format!("PR #{}", id),
        None => "A purchase request".to_string(),
    };
    let project = p
        .project_name
        .as_deref()
        .map(|name| format!(" for {}", name))
        .unwrap_or_default();
    let actor = p.actor_name.as_deref().unwrap_or("Someone");

    let (title, message, kind, priority) = match action {
        PrAction::Submitted => (
            "New purchase request",
            format!("{} submitted {}{}", actor, subject, project),
            NotificationKind::Approval,
            NotificationPriority::High,
        ),
        PrAction::Approved => (
            "Purchase request approved",
            format!("{}{} was approved by {}", subject, project, actor),
            NotificationKind::Success,
            NotificationPriority::Medium,
        ),
        PrAction::Rejected => (
            "Purchase request rejected",
            match p.reason.as_deref() {
                Some(reason) => format!("{}{} was rejected: {}", subject, project, reason),
                None => format!("{}{} was rejected by {}", subject, project, actor),
            },
            NotificationKind::Rejection,
            NotificationPriority::High,
        ),
        PrAction::Forwarded => (
            "Purchase request forwarded",
            format!("{}{} was forwarded by {}", subject, project, actor),
            NotificationKind::Update,
            NotificationPriority::Medium,
        ),
    };

    let id = p.notification_id.unwrap_or_else(|| match p.cr_id {
        Some(cr_id) => format!("pr:{}:{}", action.as_str(), cr_id),
        None => format!("pr:{}:{}", action.as_str(), created_at.timestamp_millis()),
    });

    let mut n = NotificationData::new(id, title, message)
        .with_kind(kind)
        .with_priority(priority)
        .with_created_at(created_at);
    n.category = Some("procurement".to_string());
    n.action_url = p.cr_id.map(|id| format!("/change-requests/{}", id));
    n.sender_name = p.actor_name;
    n.target_user_id = p.target_user_id;
    n.target_role = p.target_role;
    n
}

fn boq_notification(p: BoqStatusPayload) -> NotificationData {
    let created_at = p.timestamp.unwrap_or_else(Utc::now);
    let name = p
        .boq_name
        .clone()
        .unwrap_or_else(|| format!("BOQ #{}", p.boq_id));
    let status = msq_core::BoqStatus::parse(&p.status);
    let (title, kind) = match status {
        msq_core::BoqStatus::Approved | msq_core::BoqStatus::RevisionApproved => {
            ("BOQ approved", NotificationKind::Success)
        }
        msq_core::BoqStatus::Rejected | msq_core::BoqStatus::ClientRejected => {
            ("BOQ rejected", NotificationKind::Rejection)
        }
        msq_core::BoqStatus::PendingTdApproval => ("BOQ awaiting approval", NotificationKind::Approval),
        _ => ("BOQ status updated", NotificationKind::Update),
    };
    let id = p
        .notification_id
        .unwrap_or_else(|| format!("boq:{}:{}", p.boq_id, status));

    let mut n = NotificationData::new(id, title, format!("{} is now {}", name, status))
        .with_kind(kind)
        .with_created_at(created_at);
    n.category = Some("boq".to_string());
    n.action_url = Some(format!("/boq/{}", p.boq_id));
    n.sender_name = p.actor_name;
    n.target_user_id = p.target_user_id;
    n.target_role = p.target_role;
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_notification() {
        let event = SocketEvent::parse(
            "notification",
            json!({"id": "n-1", "title": "Hello", "type": "info", "target_role": "buyer"}),
        )
        .unwrap()
        .unwrap();
        let n = event.into_notification();
        assert_eq!(n.id, "n-1");
        assert_eq!(n.target_role.as_deref(), Some("buyer"));
    }

    #[test]
    fn test_wrapped_notification() {
        let event = SocketEvent::parse(
            "notification",
            json!({"notification": {"id": "n-2", "title": "Wrapped"}}),
        )
        .unwrap()
        .unwrap();
        assert_eq!(event.into_notification().id, "n-2");
    }

    #[test]
    fn test_pr_event_ids_are_stable() {
        let payload = json!({"cr_id": 17, "project_name": "Skyline", "approved_by": "Asha"});
        let a = SocketEvent::parse("pr:approved", payload.clone()).unwrap().unwrap();
        let b = SocketEvent::parse("pr:approved", payload).unwrap().unwrap();
        let (a, b) = (a.into_notification(), b.into_notification());
        assert_eq!(a.id, "pr:approved:17");
        assert_eq!(a.id, b.id);
        assert_eq!(a.kind, NotificationKind::Success);
        assert!(a.message.contains("Skyline"));
        assert_eq!(a.sender_name.as_deref(), Some("Asha"));
    }

    #[test]
    fn test_pr_rejection_includes_reason() {
        let n = SocketEvent::parse(
            "pr:rejected",
            json!({"cr_id": 3, "rejection_reason": "over budget", "notification_id": "srv-9"}),
        )
        .unwrap()
        .unwrap()
        .into_notification();
        assert_eq!(n.id, "srv-9");
        assert!(n.message.contains("over budget"));
        assert_eq!(n.priority, NotificationPriority::High);
    }

    #[test]
    fn test_boq_status_event() {
        let n = SocketEvent::parse(
            "boq:status",
            json!({"boq_id": 42, "status": "Approved", "boq_name": "Tower A", "target_role": "estimator"}),
        )
        .unwrap()
        .unwrap()
        .into_notification();
        assert_eq!(n.id, "boq:42:Approved");
        assert_eq!(n.title, "BOQ approved");
        assert_eq!(n.action_url.as_deref(), Some("/boq/42"));
    }

    #[test]
    fn test_unknown_and_malformed_events() {
        assert_eq!(SocketEvent::parse("typing", json!({})).unwrap(), None);
        assert!(SocketEvent::parse("boq:status", json!({"status": 1})).is_err());
    }
}
