//! Per-table subscription lifecycle with bounded fixed-delay retry.

use crate::protocol::{ChangeEvent, ChangeFeed, ChannelMessage};
use crate::routes::EventRouter;
use futures_util::StreamExt;
use msq_cache::{QueryCache, QueryKey};
use msq_core::{ConfigError, RealtimeError, Table, Toast, ToastAction, ToastSink};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RealtimeConfig {
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_tables")]
    pub tables: Vec<Table>,
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_tables() -> Vec<Table> {
    Table::ALL.to_vec()
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
            max_retries: default_max_retries(),
            tables: default_tables(),
        }
    }
}

impl RealtimeConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_delay_ms == 0 {
            return Err(ConfigError::invalid(
                "realtime.retry_delay_ms",
                "must be greater than zero",
            ));
        }
        if self.tables.is_empty() {
            return Err(ConfigError::invalid(
                "realtime.tables",
                "at least one table is required",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Idle,
    Connecting,
    Subscribed,
    Retrying { attempt: u32 },
    /// Retries exhausted; only a manual resubscribe restarts the channel.
    Failed,
}

impl SubscriptionStatus {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Subscribed | Self::Retrying { .. }
        )
    }
}

/// Effects of one applied change event.
#[derive(Debug, Clone)]
pub struct AppliedChange {
    pub invalidated: Vec<QueryKey>,
    pub toast: Option<Toast>,
}

struct Shared {
    feed: Arc<dyn ChangeFeed>,
    cache: QueryCache,
    toasts: Arc<dyn ToastSink>,
    config: RealtimeConfig,
    router: Mutex<EventRouter>,
}

impl Shared {
    fn apply(&self, event: &ChangeEvent) -> AppliedChange {
        let routed = self
            .router
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .route(event);

        let mut invalidated = Vec::new();
        for matcher in &routed.invalidate {
            invalidated.extend(self.cache.invalidate(matcher));
        }
        tracing::debug!(
            table = %event.table,
            event = ?event.event_type,
            invalidated = invalidated.len(),
            "Applied change event"
        );

        if let Some(toast) = &routed.toast {
            self.toasts.show(toast.clone());
        }
        AppliedChange {
            invalidated,
            toast: routed.toast,
        }
    }
}

struct Channel {
    status: watch::Receiver<SubscriptionStatus>,
    task: JoinHandle<()>,
}

/// Owns one change channel per table.
#[derive(Clone)]
pub struct SubscriptionManager {
    shared: Arc<Shared>,
    channels: Arc<Mutex<HashMap<Table, Channel>>>,
}

impl SubscriptionManager {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        cache: QueryCache,
        toasts: Arc<dyn ToastSink>,
        config: RealtimeConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                feed,
                cache,
                toasts,
                config,
                router: Mutex::new(EventRouter::default()),
            }),
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.shared.config
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<Table, Channel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the channel for `table`. Refuses a second channel while one is active.
    pub fn subscribe(&self, table: Table) -> Result<(), RealtimeError> {
        let mut channels = self.channels();
        if let Some(existing) = channels.get(&table) {
            if existing.status.borrow().is_active() {
                return Err(RealtimeError::AlreadySubscribed { table });
            }
        }

        let (tx, rx) = watch::channel(SubscriptionStatus::Connecting);
        let task = tokio::spawn(run_channel(self.shared.clone(), table, tx));
        channels.insert(table, Channel { status: rx, task });
        tracing::info!(%table, "Subscribing to table changes");
        Ok(())
    }

    /// Subscribe every configured table not already active. Returns how many were opened.
    pub fn subscribe_all(&self) -> usize {
        self.shared
            .config
            .tables
            .iter()
            .filter(|table| self.subscribe(**table).is_ok())
            .count()
    }

    pub fn unsubscribe(&self, table: Table) -> bool {
        match self.channels().remove(&table) {
            Some(channel) => {
                channel.task.abort();
                tracing::info!(%table, "Unsubscribed from table changes");
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe_all(&self) {
        let drained: Vec<(Table, Channel)> = self.channels().drain().collect();
        for (table, channel) in drained {
            channel.task.abort();
            tracing::debug!(%table, "Channel closed");
        }
    }

    pub fn status(&self, table: Table) -> SubscriptionStatus {
        self.channels()
            .get(&table)
            .map(|channel| *channel.status.borrow())
            .unwrap_or(SubscriptionStatus::Idle)
    }

    pub fn watch_status(&self, table: Table) -> Option<watch::Receiver<SubscriptionStatus>> {
        self.channels().get(&table).map(|c| c.status.clone())
    }

    /// Tables whose retries are exhausted.
    pub fn failed_tables(&self) -> Vec<Table> {
        let mut failed: Vec<Table> = self
            .channels()
            .iter()
            .filter(|(_, channel)| *channel.status.borrow() == SubscriptionStatus::Failed)
            .map(|(table, _)| *table)
            .collect();
        failed.sort();
        failed
    }

    /// Manual retry: tear down whatever channel exists and open a fresh one.
    pub fn resubscribe(&self, table: Table) -> Result<(), RealtimeError> {
        self.unsubscribe(table);
        self.subscribe(table)
    }

    /// Route an event as if it had arrived on its table's channel.
    pub fn apply_change(&self, event: &ChangeEvent) -> AppliedChange {
        self.shared.apply(event)
    }
}

async fn run_channel(shared: Arc<Shared>, table: Table, status: watch::Sender<SubscriptionStatus>) {
    let max_retries = shared.config.max_retries;
    let mut attempt: u32 = 0;

    loop {
        status.send_replace(SubscriptionStatus::Connecting);
        let reason = match shared.feed.open(table).await {
            Ok(mut stream) => {
                status.send_replace(SubscriptionStatus::Subscribed);
                attempt = 0;
                tracing::info!(%table, "Channel subscribed");

                let mut reason = "stream ended".to_string();
                while let Some(message) = stream.next().await {
                    match message {
                        ChannelMessage::Change(event) => {
                            shared.apply(&event);
                        }
                        ChannelMessage::Closed { reason: why } => {
                            reason = why;
                            break;
                        }
                        ChannelMessage::Error { message } => {
                            reason = message;
                            break;
                        }
                    }
                }
                reason
            }
            Err(err) => err.to_string(),
        };

        if attempt >= max_retries {
            status.send_replace(SubscriptionStatus::Failed);
            tracing::warn!(%table, attempts = attempt + 1, %reason, "Giving up on table channel");
            // The task ends here, so each failure burst warns exactly once.
            shared.toasts.show(
                Toast::warning(format!("Live updates for {} are unavailable", table.label()))
                    .with_description("Please refresh the page manually to see the latest data.")
                    .with_action(ToastAction::Refresh)
                    .with_id(format!("realtime-failed:{}", table)),
            );
            return;
        }

        attempt += 1;
        status.send_replace(SubscriptionStatus::Retrying { attempt });
        tracing::warn!(%table, attempt, max_retries, %reason, "Channel dropped; retrying");
        tokio::time::sleep(shared.config.retry_delay()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures_util::stream::{self, BoxStream};
    use msq_core::ToastLevel;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct FailingFeed {
        opens: AtomicU32,
    }

    #[async_trait]
    impl ChangeFeed for FailingFeed {
        async fn open(
            &self,
            table: Table,
        ) -> Result<BoxStream<'static, ChannelMessage>, RealtimeError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Err(RealtimeError::ConnectFailed {
                table,
                reason: "refused".to_string(),
            })
        }
    }

    struct PendingFeed;

    #[async_trait]
    impl ChangeFeed for PendingFeed {
        async fn open(
            &self,
            _table: Table,
        ) -> Result<BoxStream<'static, ChannelMessage>, RealtimeError> {
            Ok(stream::pending().boxed())
        }
    }

    #[derive(Default)]
    struct Toasts(Mutex<Vec<Toast>>);

    impl ToastSink for Toasts {
        fn show(&self, toast: Toast) {
            self.0.lock().unwrap().push(toast);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_warn_once() {
        let feed = Arc::new(FailingFeed::default());
        let toasts = Arc::new(Toasts::default());
        let manager = SubscriptionManager::new(
            feed.clone(),
            QueryCache::default(),
            toasts.clone(),
            RealtimeConfig::default(),
        );

        manager.subscribe(Table::Boqs).unwrap();
        let mut status = manager.watch_status(Table::Boqs).unwrap();
        status
            .wait_for(|s| *s == SubscriptionStatus::Failed)
            .await
            .unwrap();

        assert_eq!(feed.opens.load(Ordering::SeqCst), 4);
        let shown = toasts.0.lock().unwrap();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].level, ToastLevel::Warning);
        assert_eq!(shown[0].action, Some(ToastAction::Refresh));
        assert_eq!(manager.failed_tables(), vec![Table::Boqs]);
    }

    #[tokio::test]
    async fn test_duplicate_subscription_is_refused() {
        let manager = SubscriptionManager::new(
            Arc::new(PendingFeed),
            QueryCache::default(),
            Arc::new(Toasts::default()),
            RealtimeConfig::default(),
        );
        manager.subscribe(Table::Vendors).unwrap();
        assert_eq!(
            manager.subscribe(Table::Vendors),
            Err(RealtimeError::AlreadySubscribed {
                table: Table::Vendors
            })
        );
        assert!(manager.unsubscribe(Table::Vendors));
        assert_eq!(manager.status(Table::Vendors), SubscriptionStatus::Idle);
        assert!(manager.subscribe(Table::Vendors).is_ok());
    }

    #[tokio::test]
    async fn test_subscribe_all_skips_active_tables() {
        let manager = SubscriptionManager::new(
            Arc::new(PendingFeed),
            QueryCache::default(),
            Arc::new(Toasts::default()),
            RealtimeConfig::default(),
        );
        manager.subscribe(Table::Boqs).unwrap();
        assert_eq!(manager.subscribe_all(), Table::ALL.len() - 1);
        manager.unsubscribe_all();
        assert_eq!(manager.status(Table::Boqs), SubscriptionStatus::Idle);
    }

    #[test]
    fn test_config_validation() {
        assert!(RealtimeConfig::default().validate().is_ok());
        let config = RealtimeConfig {
            retry_delay_ms: 0,
            ..RealtimeConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
