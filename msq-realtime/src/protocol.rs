//! Change-feed wire types and the transport seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use msq_core::{RealtimeError, Table};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row-level change published by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    #[serde(rename = "eventType", alias = "event_type")]
    pub event_type: ChangeKind,
    #[serde(default)]
    pub new: Option<Value>,
    #[serde(default)]
    pub old: Option<Value>,
    #[serde(default = "Utc::now")]
    pub commit_timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(table: Table, event_type: ChangeKind) -> Self {
        Self {
            table,
            event_type,
            new: None,
            old: None,
            commit_timestamp: Utc::now(),
        }
    }

    pub fn with_new(mut self, row: Value) -> Self {
        self.new = Some(row);
        self
    }

    pub fn with_old(mut self, row: Value) -> Self {
        self.old = Some(row);
        self
    }

    /// The row the event is about: `new`, or `old` for deletes.
    pub fn record(&self) -> Option<&Value> {
        [self.new.as_ref(), self.old.as_ref()]
            .into_iter()
            .flatten()
            .find(|row| row.as_object().is_some_and(|map| !map.is_empty()))
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.record().and_then(|row| row.get(name)).filter(|v| !v.is_null())
    }

    /// Value of the table's primary key column.
    pub fn record_id(&self) -> Option<&Value> {
        self.field(self.table.primary_key())
    }

    /// New status when an update moved the row to a different status.
    ///
    /// If the old image carries no status the change is treated as a transition.
    pub fn status_transition(&self) -> Option<&str> {
        if self.event_type != ChangeKind::Update {
            return None;
        }
        let new_status = self.new.as_ref()?.get("status")?.as_str()?;
        let old_status = self
            .old
            .as_ref()
            .and_then(|row| row.get("status"))
            .and_then(Value::as_str);
        match old_status {
            Some(old) if old == new_status => None,
            _ => Some(new_status),
        }
    }
}

/// Messages delivered on a table channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Change(ChangeEvent),
    Closed { reason: String },
    Error { message: String },
}

/// Opens one change channel per table. The wire format belongs to the backend.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn open(&self, table: Table) -> Result<BoxStream<'static, ChannelMessage>, RealtimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decodes_backend_payload() {
        let raw = json!({
            "schema": "public",
            "table": "boqs",
            "commit_timestamp": "2024-05-01T10:00:00Z",
            "eventType": "UPDATE",
            "new": {"boq_id": 42, "status": "Approved"},
            "old": {"boq_id": 42, "status": "Pending_TD_Approval"},
            "errors": null
        });
        let event: ChangeEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.table, Table::Boqs);
        assert_eq!(event.event_type, ChangeKind::Update);
        assert_eq!(event.record_id(), Some(&json!(42)));
        assert_eq!(event.status_transition(), Some("Approved"));
    }

    #[test]
    fn test_delete_uses_old_row() {
        let event = ChangeEvent::new(Table::Vendors, ChangeKind::Delete)
            .with_new(json!({}))
            .with_old(json!({"vendor_id": 7}));
        assert_eq!(event.record_id(), Some(&json!(7)));
        assert_eq!(event.status_transition(), None);
    }

    #[test]
    fn test_same_status_is_not_a_transition() {
        let event = ChangeEvent::new(Table::Boqs, ChangeKind::Update)
            .with_new(json!({"boq_id": 1, "status": "Approved", "boq_name": "Tower A"}))
            .with_old(json!({"boq_id": 1, "status": "Approved"}));
        assert_eq!(event.status_transition(), None);
    }

    #[test]
    fn test_missing_old_status_counts_as_transition() {
        let event = ChangeEvent::new(Table::Boqs, ChangeKind::Update)
            .with_new(json!({"boq_id": 1, "status": "Rejected"}))
            .with_old(json!({"boq_id": 1}));
        assert_eq!(event.status_transition(), Some("Rejected"));
    }
}
