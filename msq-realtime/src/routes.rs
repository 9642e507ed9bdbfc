//! Which cache keys and toasts a change event touches.

use crate::protocol::ChangeEvent;
use msq_cache::{KeyMatcher, KeySegment};
use msq_core::{BoqStatus, RecentSet, Table, Toast};
use serde_json::Value;

const SHOWN_TOAST_CAPACITY: usize = 500;

/// Matchers to invalidate for `event`.
pub fn invalidations_for(event: &ChangeEvent) -> Vec<KeyMatcher> {
    let id = event.record_id().and_then(segment);
    let mut matchers = Vec::new();
    let mut detail = |name: &str, id: Option<KeySegment>| {
        if let Some(id) = id {
            matchers.push(KeyMatcher::sequence(vec![KeySegment::from(name), id]));
        }
    };

    match event.table {
        Table::Boqs => {
            detail("boq", id);
            return with_lists(matchers, &["boqs", "td_boqs", "pm_boqs", "estimator_boqs"]);
        }
        Table::BoqItems => {
            detail("boq", event.field("boq_id").and_then(segment));
            return with_lists(matchers, &["boq_items", "boqs"]);
        }
        Table::Purchases => {
            detail("purchase", id);
            return with_lists(matchers, &["purchases"]);
        }
        Table::ChangeRequests => {
            detail("change_request", id);
            detail("boq", event.field("boq_id").and_then(segment));
            return with_lists(matchers, &["change_requests", "purchases"]);
        }
        Table::Vendors => {
            detail("vendor", id);
            return with_lists(matchers, &["vendors"]);
        }
        Table::VendorDeliveryInspections => {
            detail("inspection", id);
            return with_lists(matchers, &["inspections"]);
        }
        Table::VendorReturnRequests => {
            detail("return_request", id);
            return with_lists(matchers, &["return_requests", "inspections"]);
        }
        Table::Notifications => {}
    }
    with_lists(matchers, &["notifications"])
}

fn with_lists(mut matchers: Vec<KeyMatcher>, lists: &[&str]) -> Vec<KeyMatcher> {
    matchers.extend(lists.iter().map(|name| KeyMatcher::contains(*name)));
    matchers
}

fn segment(value: &Value) -> Option<KeySegment> {
    match value {
        Value::Number(n) => n.as_i64().map(KeySegment::Int),
        // numeric strings address the same row as numbers
        Value::String(s) => Some(
            s.trim()
                .parse::<i64>()
                .map(KeySegment::Int)
                .unwrap_or_else(|_| KeySegment::from(s.as_str())),
        ),
        _ => None,
    }
}

/// Toast for a status transition, before de-duplication.
pub fn toast_for(event: &ChangeEvent) -> Option<Toast> {
    let status = event.status_transition()?;
    let toast = match event.table {
        Table::Boqs => match BoqStatus::parse(status) {
            BoqStatus::Approved => Toast::success("BOQ approved by Technical Director"),
            BoqStatus::Rejected => Toast::error("BOQ rejected by Technical Director"),
            BoqStatus::ClientConfirmed => Toast::success("BOQ confirmed by client"),
            BoqStatus::ClientRejected => Toast::warning("BOQ rejected by client"),
            BoqStatus::UnderRevision => Toast::info("BOQ sent back for revision"),
            BoqStatus::RevisionApproved => Toast::success("BOQ revision approved"),
            _ => return None,
        },
        Table::ChangeRequests => {
            let status = status.to_ascii_lowercase();
            if status.contains("rejected") {
                Toast::error("Change request rejected")
            } else if status.contains("approved") {
                Toast::success("Change request approved")
            } else {
                return None;
            }
        }
        _ => return None,
    };

    let name = match event.table {
        Table::Boqs => event.field("boq_name"),
        _ => event.field("project_name"),
    };
    Some(match name.and_then(Value::as_str) {
        Some(name) => toast.with_description(name),
        None => toast,
    })
}

/// Result of routing one change event.
#[derive(Debug, Clone)]
pub struct RoutedChange {
    pub invalidate: Vec<KeyMatcher>,
    pub toast: Option<Toast>,
}

/// Routes change events, remembering which events already toasted.
///
/// An event is identified by table, row id, new status and commit time, so a
/// redelivery is silent while a later transition to the same status toasts.
#[derive(Debug)]
pub struct EventRouter {
    shown: RecentSet<String>,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new(SHOWN_TOAST_CAPACITY)
    }
}

impl EventRouter {
    pub fn new(capacity: usize) -> Self {
        Self {
            shown: RecentSet::new(capacity),
        }
    }

    pub fn route(&mut self, event: &ChangeEvent) -> RoutedChange {
        let invalidate = invalidations_for(event);
        let toast = toast_for(event).and_then(|toast| {
            let id = event.record_id().map(Value::to_string).unwrap_or_default();
            let status = event.status_transition().unwrap_or_default();
            let dedup_key = format!(
                "{}:{}:{}:{}",
                event.table,
                id.trim_matches('"'),
                status,
                event.commit_timestamp.timestamp_micros()
            );
            self.shown
                .insert(dedup_key.clone())
                .then(|| toast.with_id(dedup_key))
        });
        RoutedChange { invalidate, toast }
    }
}
