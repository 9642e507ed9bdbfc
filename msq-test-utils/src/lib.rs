//! MeterSquare Test Utilities
//!
//! Shared test infrastructure for the sync-layer crates:
//! - Mock transports (fetcher, change feed, push socket, notification API)
//! - Recording sinks for toasts and desktop notifications
//! - Proptest generators for tables, change events and notifications
//! - Fixtures for common rows and events

pub use msq_cache::{QueryCache, QueryFetcher, QueryKey};
pub use msq_core::{
    BoqStatus, EntityId, FetchError, NotificationData, NotificationKind, NotifyError,
    RealtimeError, Table, Timestamp, Toast, ToastAction, ToastLevel, ToastSink,
};
pub use msq_notify::{DesktopNotifier, DesktopPermission, NotificationApi, PushSocket, SocketFrame};
pub use msq_realtime::{ChangeEvent, ChangeFeed, ChangeKind, ChannelMessage};

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

fn channel_stream<T: Send + 'static>(rx: mpsc::UnboundedReceiver<T>) -> BoxStream<'static, T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}

// ============================================================================
// MOCK FETCHER
// ============================================================================

/// Scripted backend for the query cache.
///
/// Each key answers with its queued responses first, then its fixed response.
/// Unknown keys answer 404.
#[derive(Default)]
pub struct MockFetcher {
    fixed: Mutex<HashMap<QueryKey, Value>>,
    queued: Mutex<HashMap<QueryKey, VecDeque<Result<Value, FetchError>>>>,
    calls: Mutex<HashMap<QueryKey, usize>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, key: QueryKey, value: Value) -> &Self {
        self.fixed.lock().unwrap().insert(key, value);
        self
    }

    pub fn enqueue(&self, key: QueryKey, response: Result<Value, FetchError>) -> &Self {
        self.queued
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push_back(response);
        self
    }

    pub fn fail_times(&self, key: QueryKey, error: FetchError, times: usize) -> &Self {
        for _ in 0..times {
            self.enqueue(key.clone(), Err(error.clone()));
        }
        self
    }

    pub fn calls(&self, key: &QueryKey) -> usize {
        self.calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl QueryFetcher for MockFetcher {
    async fn fetch(&self, key: &QueryKey) -> Result<Value, FetchError> {
        *self.calls.lock().unwrap().entry(key.clone()).or_default() += 1;
        if let Some(response) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(key)
            .and_then(VecDeque::pop_front)
        {
            return response;
        }
        self.fixed
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| FetchError::Http {
                status: 404,
                message: format!("no data for {}", key),
            })
    }
}

// ============================================================================
// MOCK CHANGE FEED
// ============================================================================

/// In-memory change feed. Tests push events with [`MockChangeFeed::emit`].
#[derive(Default)]
pub struct MockChangeFeed {
    failures_left: Mutex<HashMap<Table, usize>>,
    always_fail: AtomicBool,
    senders: Mutex<HashMap<Table, mpsc::UnboundedSender<ChannelMessage>>>,
    opens: Mutex<HashMap<Table, usize>>,
}

impl MockChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `times` opens of `table` fail.
    pub fn fail_opens(&self, table: Table, times: usize) {
        self.failures_left.lock().unwrap().insert(table, times);
    }

    /// Every open fails until reset.
    pub fn set_always_fail(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }

    pub fn open_count(&self, table: Table) -> usize {
        self.opens.lock().unwrap().get(&table).copied().unwrap_or(0)
    }

    pub fn is_open(&self, table: Table) -> bool {
        self.senders
            .lock()
            .unwrap()
            .get(&table)
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Deliver a change on its table's channel. Returns false if nobody listens.
    pub fn emit(&self, event: ChangeEvent) -> bool {
        self.send(event.table, ChannelMessage::Change(event))
    }

    pub fn close(&self, table: Table, reason: &str) -> bool {
        let sent = self.send(
            table,
            ChannelMessage::Closed {
                reason: reason.to_string(),
            },
        );
        self.senders.lock().unwrap().remove(&table);
        sent
    }

    pub fn send(&self, table: Table, message: ChannelMessage) -> bool {
        self.senders
            .lock()
            .unwrap()
            .get(&table)
            .is_some_and(|tx| tx.send(message).is_ok())
    }
}

#[async_trait]
impl ChangeFeed for MockChangeFeed {
    async fn open(&self, table: Table) -> Result<BoxStream<'static, ChannelMessage>, RealtimeError> {
        *self.opens.lock().unwrap().entry(table).or_default() += 1;
        let scripted_failure = {
            let mut failures = self.failures_left.lock().unwrap();
            match failures.get_mut(&table) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        };
        if scripted_failure || self.always_fail.load(Ordering::SeqCst) {
            return Err(RealtimeError::ConnectFailed {
                table,
                reason: "mock failure".to_string(),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().insert(table, tx);
        Ok(channel_stream(rx))
    }
}

// ============================================================================
// MOCK PUSH SOCKET
// ============================================================================

/// In-memory notification socket.
#[derive(Default)]
pub struct MockPushSocket {
    failures_left: AtomicUsize,
    always_fail: AtomicBool,
    sender: Mutex<Option<mpsc::UnboundedSender<SocketFrame>>>,
    connects: AtomicUsize,
    rooms: Mutex<Vec<String>>,
}

impl MockPushSocket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_connects(&self, times: usize) {
        self.failures_left.store(times, Ordering::SeqCst);
    }

    pub fn set_always_fail(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Rooms passed to the most recent connect.
    pub fn rooms(&self) -> Vec<String> {
        self.rooms.lock().unwrap().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.sender
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    pub fn emit(&self, name: &str, payload: Value) -> bool {
        self.send(SocketFrame::Event {
            name: name.to_string(),
            payload,
        })
    }

    /// Send a close frame and forget the connection.
    pub fn drop_connection(&self, reason: &str) -> bool {
        let sent = self.send(SocketFrame::Closed {
            reason: reason.to_string(),
        });
        self.sender.lock().unwrap().take();
        sent
    }

    pub fn send(&self, frame: SocketFrame) -> bool {
        self.sender
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }
}

#[async_trait]
impl PushSocket for MockPushSocket {
    async fn connect(&self, rooms: &[String]) -> Result<BoxStream<'static, SocketFrame>, NotifyError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.rooms.lock().unwrap() = rooms.to_vec();
        let scripted_failure = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if scripted_failure || self.always_fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Connect("mock failure".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap() = Some(tx);
        Ok(channel_stream(rx))
    }
}

// ============================================================================
// MOCK NOTIFICATION API
// ============================================================================

/// Server-side notification list answering `fetch_since`.
#[derive(Default)]
pub struct MockNotificationApi {
    stored: Mutex<Vec<NotificationData>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockNotificationApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, notification: NotificationData) {
        self.stored.lock().unwrap().push(notification);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationApi for MockNotificationApi {
    async fn fetch_since(&self, since: Option<Timestamp>) -> Result<Vec<NotificationData>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Network("mock network down".to_string()));
        }
        Ok(self
            .stored
            .lock()
            .unwrap()
            .iter()
            .filter(|n| since.map_or(true, |since| n.created_at > since))
            .cloned()
            .collect())
    }
}

// ============================================================================
// RECORDING SINKS
// ============================================================================

#[derive(Default)]
pub struct RecordingToastSink {
    toasts: Mutex<Vec<Toast>>,
}

impl RecordingToastSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn toasts(&self) -> Vec<Toast> {
        self.toasts.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.toasts.lock().unwrap().len()
    }

    pub fn count_level(&self, level: ToastLevel) -> usize {
        self.toasts
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.level == level)
            .count()
    }

    pub fn count_id(&self, id: &str) -> usize {
        self.toasts
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.id.as_deref() == Some(id))
            .count()
    }

    pub fn messages(&self) -> Vec<String> {
        self.toasts
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.message.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.toasts.lock().unwrap().clear();
    }
}

impl ToastSink for RecordingToastSink {
    fn show(&self, toast: Toast) {
        self.toasts.lock().unwrap().push(toast);
    }
}

pub struct MockDesktopNotifier {
    permission: Mutex<DesktopPermission>,
    focused: AtomicBool,
    shown: Mutex<Vec<String>>,
}

impl Default for MockDesktopNotifier {
    fn default() -> Self {
        Self::new(DesktopPermission::Granted)
    }
}

impl MockDesktopNotifier {
    pub fn new(permission: DesktopPermission) -> Self {
        Self {
            permission: Mutex::new(permission),
            focused: AtomicBool::new(false),
            shown: Mutex::new(Vec::new()),
        }
    }

    pub fn set_permission(&self, permission: DesktopPermission) {
        *self.permission.lock().unwrap() = permission;
    }

    pub fn set_focused(&self, focused: bool) {
        self.focused.store(focused, Ordering::SeqCst);
    }

    /// Ids of notifications shown on the desktop, in order.
    pub fn shown(&self) -> Vec<String> {
        self.shown.lock().unwrap().clone()
    }
}

impl DesktopNotifier for MockDesktopNotifier {
    fn permission(&self) -> DesktopPermission {
        *self.permission.lock().unwrap()
    }

    fn is_focused(&self) -> bool {
        self.focused.load(Ordering::SeqCst)
    }

    fn show(&self, notification: &NotificationData) {
        self.shown.lock().unwrap().push(notification.id.clone());
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for sync-layer types.

    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;
    use serde_json::json;

    pub fn arb_table() -> impl Strategy<Value = Table> {
        proptest::sample::select(Table::ALL.to_vec())
    }

    pub fn arb_change_kind() -> impl Strategy<Value = ChangeKind> {
        prop_oneof![
            Just(ChangeKind::Insert),
            Just(ChangeKind::Update),
            Just(ChangeKind::Delete),
        ]
    }

    pub fn arb_boq_status() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("Draft".to_string()),
            Just("Pending_TD_Approval".to_string()),
            Just("Approved".to_string()),
            Just("Rejected".to_string()),
            Just("Client_Confirmed".to_string()),
            Just("Under_Revision".to_string()),
            "[A-Za-z_]{3,16}",
        ]
    }

    pub fn arb_entity_id() -> impl Strategy<Value = EntityId> {
        1..10_000i64
    }

    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (0i64..1_000_000).prop_map(|offset| {
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_else(Utc::now)
                + Duration::seconds(offset)
        })
    }

    /// A change on any table, carrying its primary key and a status.
    pub fn arb_change_event() -> impl Strategy<Value = ChangeEvent> {
        (
            arb_table(),
            arb_change_kind(),
            arb_entity_id(),
            arb_boq_status(),
            arb_boq_status(),
        )
            .prop_map(|(table, kind, id, old_status, new_status)| {
                let mut new_row = json!({"status": new_status, "boq_id": id});
                new_row[table.primary_key()] = json!(id);
                let mut old_row = json!({"status": old_status});
                old_row[table.primary_key()] = json!(id);
                match kind {
                    ChangeKind::Insert => ChangeEvent::new(table, kind).with_new(new_row),
                    ChangeKind::Update => ChangeEvent::new(table, kind)
                        .with_new(new_row)
                        .with_old(old_row),
                    ChangeKind::Delete => ChangeEvent::new(table, kind).with_old(old_row),
                }
            })
    }

    pub fn arb_notification_kind() -> impl Strategy<Value = NotificationKind> {
        prop_oneof![
            Just(NotificationKind::Info),
            Just(NotificationKind::Success),
            Just(NotificationKind::Warning),
            Just(NotificationKind::Error),
            Just(NotificationKind::Approval),
            Just(NotificationKind::Rejection),
            Just(NotificationKind::Update),
        ]
    }

    /// Notification drawn from a small id pool so duplicates are common.
    pub fn arb_notification(id_pool: usize) -> impl Strategy<Value = NotificationData> {
        (
            0..id_pool.max(1),
            "[a-zA-Z ]{1,24}",
            arb_notification_kind(),
            arb_timestamp(),
        )
            .prop_map(|(n, title, kind, created_at)| {
                NotificationData::new(format!("n-{}", n), title, "")
                    .with_kind(kind)
                    .with_created_at(created_at)
            })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Rows and events shared by integration tests.

    use super::*;
    use serde_json::json;

    pub fn boq_row(boq_id: EntityId, status: &str) -> Value {
        json!({
            "boq_id": boq_id,
            "boq_name": format!("BOQ {}", boq_id),
            "project_name": "Skyline Towers",
            "status": status,
        })
    }

    pub fn boq_status_change(boq_id: EntityId, from: &str, to: &str) -> ChangeEvent {
        ChangeEvent::new(Table::Boqs, ChangeKind::Update)
            .with_new(boq_row(boq_id, to))
            .with_old(boq_row(boq_id, from))
    }

    pub fn change_request_row(cr_id: EntityId, boq_id: EntityId, status: &str) -> Value {
        json!({
            "cr_id": cr_id,
            "boq_id": boq_id,
            "project_name": "Skyline Towers",
            "status": status,
        })
    }

    pub fn vendor_list() -> Value {
        json!([
            {"vendor_id": 1, "company_name": "Acme Steel", "status": "active"},
            {"vendor_id": 2, "company_name": "Gulf Cement", "status": "active"},
        ])
    }

    pub fn notification_for_role(id: &str, role: &str) -> NotificationData {
        NotificationData::new(id, format!("Notification {}", id), "Please review").for_role(role)
    }

    pub fn notification_for_user(id: &str, user_id: EntityId) -> NotificationData {
        NotificationData::new(id, format!("Notification {}", id), "Please review").for_user(user_id)
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for cache state.

    use super::*;

    /// Assert that `key` is cached and stale.
    pub fn assert_stale(cache: &QueryCache, key: &QueryKey) {
        assert!(
            cache.get_query_data(key).is_some(),
            "Expected {} to be cached",
            key
        );
        assert!(cache.is_stale(key), "Expected {} to be stale", key);
    }

    pub fn assert_fresh(cache: &QueryCache, key: &QueryKey) {
        assert!(
            cache.get_query_data(key).is_some(),
            "Expected {} to be cached",
            key
        );
        assert!(!cache.is_stale(key), "Expected {} to be fresh", key);
    }
}
