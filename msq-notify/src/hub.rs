//! Notification hub: socket connection, delivery pipeline and store.

use crate::dedup::{Deduper, DEFAULT_DEDUP_CAPACITY};
use crate::desktop::{should_show, DesktopNotifier};
use crate::polling::PollingConfig;
use crate::socket::{NotificationApi, PushSocket, SocketEvent, SocketFrame};
use crate::store::{NotificationStore, DEFAULT_STORE_CAPACITY};
use futures_util::StreamExt;
use msq_core::{
    normalize_role_name, BackoffConfig, ConfigError, EntityId, FetchError, NotificationData,
    NotificationKind, Role, Toast, ToastAction, ToastLevel, ToastSink,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotifyConfig {
    #[serde(default = "default_reconnect")]
    pub reconnect: BackoffConfig,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_store_capacity")]
    pub store_capacity: usize,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    #[serde(default)]
    pub polling: PollingConfig,
}

fn default_reconnect() -> BackoffConfig {
    BackoffConfig::new(1_000, 30_000, 2.0).with_jitter(500)
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_store_capacity() -> usize {
    DEFAULT_STORE_CAPACITY
}

fn default_dedup_capacity() -> usize {
    DEFAULT_DEDUP_CAPACITY
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            reconnect: default_reconnect(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            store_capacity: default_store_capacity(),
            dedup_capacity: default_dedup_capacity(),
            polling: PollingConfig::default(),
        }
    }
}

impl NotifyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.reconnect.validate("notifications.reconnect")?;
        if self.store_capacity == 0 {
            return Err(ConfigError::invalid(
                "notifications.store_capacity",
                "must be > 0",
            ));
        }
        if self.dedup_capacity < self.store_capacity {
            return Err(ConfigError::invalid(
                "notifications.dedup_capacity",
                "must be >= store_capacity",
            ));
        }
        self.polling.validate()
    }
}

/// The signed-in user notifications are filtered for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub user_id: EntityId,
    pub role: String,
}

impl Recipient {
    pub fn new(user_id: EntityId, role: impl Into<String>) -> Self {
        Self {
            user_id,
            role: role.into(),
        }
    }

    pub fn accepts(&self, notification: &NotificationData) -> bool {
        notification.is_addressed_to(self.user_id, &self.role)
    }

    /// Socket rooms to join: `user_<id>` and `role_<role>`.
    pub fn rooms(&self) -> Vec<String> {
        let role = Role::parse_loose(&self.role)
            .map(|role| role.slug().to_string())
            .unwrap_or_else(|| normalize_role_name(&self.role));
        vec![format!("user_{}", self.user_id), format!("role_{}", role)]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    NotForUs,
    Duplicate,
    Delivered { desktop: bool, toast: bool },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

struct HubCore {
    recipient: Recipient,
    config: NotifyConfig,
    socket: Arc<dyn PushSocket>,
    api: Arc<dyn NotificationApi>,
    desktop: Arc<dyn DesktopNotifier>,
    toasts: Arc<dyn ToastSink>,
    store: Mutex<NotificationStore>,
    dedup: Mutex<Deduper>,
    state: watch::Sender<ConnectionState>,
    delivered: broadcast::Sender<NotificationData>,
}

impl HubCore {
    fn store(&self) -> MutexGuard<'_, NotificationStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dedup(&self) -> MutexGuard<'_, Deduper> {
        self.dedup.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, notification: NotificationData) -> DeliveryOutcome {
        if !self.recipient.accepts(&notification) {
            tracing::trace!(id = %notification.id, "Notification not addressed to this user");
            return DeliveryOutcome::NotForUs;
        }
        if !self.dedup().first_sighting(&notification.id) {
            return DeliveryOutcome::Duplicate;
        }
        if !self.store().add(notification.clone()) {
            return DeliveryOutcome::Duplicate;
        }

        let desktop = should_show(self.desktop.as_ref());
        if desktop {
            self.desktop.show(&notification);
        }
        let toast = self.dedup().claim_toast(&notification.id);
        if toast {
            self.toasts.show(toast_for(&notification));
        }
        tracing::debug!(id = %notification.id, desktop, toast, "Notification delivered");
        let _ = self.delivered.send(notification);
        DeliveryOutcome::Delivered { desktop, toast }
    }

    async fn sync_missed(&self) -> Result<usize, FetchError> {
        let since = self.store().latest_timestamp();
        let fetched = self.api.fetch_since(since).await?;
        Ok(fetched
            .into_iter()
            .map(|n| self.deliver(n))
            .filter(DeliveryOutcome::is_delivered)
            .count())
    }
}

fn toast_for(notification: &NotificationData) -> Toast {
    let level = match notification.kind {
        NotificationKind::Success | NotificationKind::Approval => ToastLevel::Success,
        NotificationKind::Error | NotificationKind::Rejection => ToastLevel::Error,
        NotificationKind::Warning => ToastLevel::Warning,
        _ => ToastLevel::Info,
    };
    let mut toast = Toast::new(level, &notification.title).with_id(&notification.id);
    if !notification.message.is_empty() {
        toast = toast.with_description(&notification.message);
    }
    if let Some(url) = &notification.action_url {
        toast = toast.with_action(ToastAction::Open(url.clone()));
    }
    toast
}

/// Receives push notifications for one signed-in user.
///
/// Nothing connects until [`NotificationHub::start`]; [`NotificationHub::stop`]
/// tears the connection down. Clones share the same hub.
#[derive(Clone)]
pub struct NotificationHub {
    core: Arc<HubCore>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl NotificationHub {
    pub fn new(
        recipient: Recipient,
        config: NotifyConfig,
        socket: Arc<dyn PushSocket>,
        api: Arc<dyn NotificationApi>,
        desktop: Arc<dyn DesktopNotifier>,
        toasts: Arc<dyn ToastSink>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (delivered, _) = broadcast::channel(64);
        Self {
            core: Arc::new(HubCore {
                store: Mutex::new(NotificationStore::new(config.store_capacity)),
                dedup: Mutex::new(Deduper::new(config.dedup_capacity)),
                recipient,
                config,
                socket,
                api,
                desktop,
                toasts,
                state,
                delivered,
            }),
            task: Arc::new(Mutex::new(None)),
        }
    }

    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the connection loop. Returns false if it is already running.
    pub fn start(&self) -> bool {
        let mut task = self.task();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }
        tracing::info!(rooms = ?self.core.recipient.rooms(), "Starting notification hub");
        *task = Some(tokio::spawn(run_connection(self.core.clone())));
        true
    }

    pub fn stop(&self) {
        if let Some(handle) = self.task().take() {
            handle.abort();
        }
        self.core.state.send_replace(ConnectionState::Disconnected);
        tracing::info!("Notification hub stopped");
    }

    pub fn is_running(&self) -> bool {
        self.task()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn state(&self) -> ConnectionState {
        *self.core.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.core.state.subscribe()
    }

    /// Every notification that makes it through the pipeline.
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationData> {
        self.core.delivered.subscribe()
    }

    pub fn recipient(&self) -> &Recipient {
        &self.core.recipient
    }

    pub fn config(&self) -> &NotifyConfig {
        &self.core.config
    }

    pub fn toasts(&self) -> &Arc<dyn ToastSink> {
        &self.core.toasts
    }

    /// Run one notification through targeting, de-dup, store, desktop and toast.
    pub fn deliver(&self, notification: NotificationData) -> DeliveryOutcome {
        self.core.deliver(notification)
    }

    /// Fetch and deliver notifications newer than the newest stored one.
    pub async fn sync_missed(&self) -> Result<usize, FetchError> {
        self.core.sync_missed().await
    }

    pub fn notifications(&self) -> Vec<NotificationData> {
        self.core.store().snapshot()
    }

    pub fn unread_count(&self) -> usize {
        self.core.store().unread_count()
    }

    pub fn mark_read(&self, id: &str) -> bool {
        self.core.store().mark_read(id)
    }

    pub fn mark_all_read(&self) -> usize {
        self.core.store().mark_all_read()
    }

    pub fn remove(&self, id: &str) -> Option<NotificationData> {
        self.core.store().remove(id)
    }

    pub fn clear(&self) {
        self.core.store().clear();
    }

    pub fn snapshot(&self) -> Vec<NotificationData> {
        self.core.store().snapshot()
    }

    /// Load a persisted snapshot. Restored ids count as already seen and toasted.
    pub fn restore(&self, items: Vec<NotificationData>) -> usize {
        {
            let mut dedup = self.core.dedup();
            for n in &items {
                dedup.first_sighting(&n.id);
                dedup.claim_toast(&n.id);
            }
        }
        self.core.store().restore(items)
    }
}

async fn run_connection(core: Arc<HubCore>) {
    let rooms = core.recipient.rooms();
    let backoff = &core.config.reconnect;
    let mut attempt: u32 = 0;

    loop {
        core.state.send_replace(ConnectionState::Connecting);
        match core.socket.connect(&rooms).await {
            Ok(mut frames) => {
                core.state.send_replace(ConnectionState::Connected);
                attempt = 0;
                tracing::info!(?rooms, "Notification socket connected");

                match core.sync_missed().await {
                    Ok(count) if count > 0 => tracing::info!(count, "Delivered missed notifications"),
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "Could not fetch missed notifications"),
                }

                while let Some(frame) = frames.next().await {
                    match frame {
                        SocketFrame::Event { name, payload } => {
                            match SocketEvent::parse(&name, payload) {
                                Ok(Some(event)) => {
                                    core.deliver(event.into_notification());
                                }
                                Ok(None) => tracing::trace!(%name, "Ignoring socket event"),
                                Err(err) => tracing::warn!(error = %err, "Dropping malformed socket event"),
                            }
                        }
                        SocketFrame::Closed { reason } => {
                            tracing::info!(%reason, "Notification socket closed");
                            break;
                        }
                        SocketFrame::Error { message } => {
                            tracing::debug!(%message, "Notification socket error");
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, attempt, "Notification socket connect failed");
            }
        }
        core.state.send_replace(ConnectionState::Disconnected);

        if attempt >= core.config.max_reconnect_attempts {
            tracing::warn!(
                attempts = attempt,
                "Notification socket unavailable; relying on polling"
            );
            return;
        }
        let base = backoff.delay_for(attempt).as_millis() as u64;
        attempt += 1;
        tokio::time::sleep(backoff.jittered(base)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desktop::DesktopPermission;
    use async_trait::async_trait;
    use futures_util::stream::BoxStream;
    use msq_core::{NotifyError, Timestamp};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct NoSocket;

    #[async_trait]
    impl PushSocket for NoSocket {
        async fn connect(&self, _rooms: &[String]) -> Result<BoxStream<'static, SocketFrame>, NotifyError> {
            Err(NotifyError::Connect("offline".to_string()))
        }
    }

    struct NoApi;

    #[async_trait]
    impl NotificationApi for NoApi {
        async fn fetch_since(&self, _since: Option<Timestamp>) -> Result<Vec<NotificationData>, FetchError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct Desktop {
        focused: AtomicBool,
        shown: AtomicU32,
    }

    impl DesktopNotifier for Desktop {
        fn permission(&self) -> DesktopPermission {
            DesktopPermission::Granted
        }
        fn is_focused(&self) -> bool {
            self.focused.load(Ordering::SeqCst)
        }
        fn show(&self, _notification: &NotificationData) {
            self.shown.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct Toasts(Mutex<Vec<Toast>>);

    impl ToastSink for Toasts {
        fn show(&self, toast: Toast) {
            self.0.lock().unwrap().push(toast);
        }
    }

    fn hub(desktop: Arc<Desktop>, toasts: Arc<Toasts>) -> NotificationHub {
        NotificationHub::new(
            Recipient::new(7, "Technical Director"),
            NotifyConfig::default(),
            Arc::new(NoSocket),
            Arc::new(NoApi),
            desktop,
            toasts,
        )
    }

    #[test]
    fn test_rooms() {
        let rooms = Recipient::new(7, "Technical Director").rooms();
        assert_eq!(rooms, vec!["user_7", "role_technical_director"]);
        assert_eq!(Recipient::new(1, "Procurement Lead").rooms()[1], "role_procurementlead");
    }

    #[test]
    fn test_delivery_pipeline() {
        let desktop = Arc::new(Desktop::default());
        let toasts = Arc::new(Toasts::default());
        let hub = hub(desktop.clone(), toasts.clone());

        let n = NotificationData::new("n1", "BOQ pending", "Tower A").for_role("td");
        assert_eq!(
            hub.deliver(n.clone()),
            DeliveryOutcome::Delivered {
                desktop: true,
                toast: true
            }
        );
        assert_eq!(hub.deliver(n), DeliveryOutcome::Duplicate);
        assert_eq!(hub.unread_count(), 1);
        assert_eq!(desktop.shown.load(Ordering::SeqCst), 1);
        assert_eq!(toasts.0.lock().unwrap().len(), 1);

        let other = NotificationData::new("n2", "For buyers", "").for_role("buyer");
        assert_eq!(hub.deliver(other), DeliveryOutcome::NotForUs);
    }

    #[test]
    fn test_focused_window_skips_desktop() {
        let desktop = Arc::new(Desktop::default());
        desktop.focused.store(true, Ordering::SeqCst);
        let hub = hub(desktop.clone(), Arc::new(Toasts::default()));
        let outcome = hub.deliver(NotificationData::new("n1", "Hi", ""));
        assert_eq!(
            outcome,
            DeliveryOutcome::Delivered {
                desktop: false,
                toast: true
            }
        );
        assert_eq!(desktop.shown.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_restored_ids_are_not_redelivered() {
        let toasts = Arc::new(Toasts::default());
        let hub = hub(Arc::new(Desktop::default()), toasts.clone());
        hub.restore(vec![NotificationData::new("n1", "Old", "")]);
        assert_eq!(
            hub.deliver(NotificationData::new("n1", "Old", "")),
            DeliveryOutcome::Duplicate
        );
        assert!(toasts.0.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failures_end_disconnected() {
        let hub = hub(Arc::new(Desktop::default()), Arc::new(Toasts::default()));
        assert!(hub.start());
        assert!(!hub.start());
        tokio::time::sleep(std::time::Duration::from_secs(600)).await;
        assert!(!hub.is_running());
        assert_eq!(hub.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_config_validation() {
        assert!(NotifyConfig::default().validate().is_ok());
        let config = NotifyConfig {
            dedup_capacity: 10,
            ..NotifyConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
