//! The sync agent: one query cache, its realtime subscriptions, the
//! notification hub and the polling fallback, started and stopped together.

use crate::api_client::{ApiClientError, RestClient};
use crate::config::ClientConfig;
use crate::queries::{MutationTransport, Queries};
use crate::session::{SessionError, SessionStore};
use crate::toast::TracingToastSink;
use crate::ws::{WsChangeFeed, WsPushSocket};
use msq_cache::{QueryCache, QueryFetcher};
use msq_core::ToastSink;
use msq_notify::{
    DesktopNotifier, NoDesktop, NotificationApi, NotificationHub, PollingFallback, PushSocket,
    Recipient,
};
use msq_realtime::{ChangeFeed, SubscriptionManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Everything the agent talks to outside the process.
#[derive(Clone)]
pub struct Transports {
    pub fetcher: Arc<dyn QueryFetcher>,
    pub mutations: Arc<dyn MutationTransport>,
    pub change_feed: Arc<dyn ChangeFeed>,
    pub push_socket: Arc<dyn PushSocket>,
    pub notification_api: Arc<dyn NotificationApi>,
    pub desktop: Arc<dyn DesktopNotifier>,
    pub toasts: Arc<dyn ToastSink>,
}

impl Transports {
    /// REST and WebSocket transports for a headless run.
    pub fn live(config: &ClientConfig, access_token: Option<&str>) -> Result<Self, ApiClientError> {
        let rest = Arc::new(RestClient::new(config, access_token)?);
        let token = access_token.map(str::to_string);
        Ok(Self {
            fetcher: rest.clone(),
            mutations: rest.clone(),
            change_feed: Arc::new(WsChangeFeed::new(config, token.clone())),
            push_socket: Arc::new(WsPushSocket::new(config, token)),
            notification_api: rest,
            desktop: Arc::new(NoDesktop),
            toasts: Arc::new(TracingToastSink),
        })
    }
}

/// What [`SyncAgent::start`] brought up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StartReport {
    pub restored_queries: usize,
    pub restored_notifications: usize,
    pub subscribed_tables: usize,
}

pub struct SyncAgent {
    cache: QueryCache,
    realtime: SubscriptionManager,
    hub: NotificationHub,
    queries: Queries,
    gc_interval: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncAgent {
    pub fn new(config: &ClientConfig, recipient: Recipient, transports: Transports) -> Self {
        let cache = QueryCache::new(config.cache.query_options());
        let realtime = SubscriptionManager::new(
            transports.change_feed,
            cache.clone(),
            transports.toasts.clone(),
            config.realtime.clone(),
        );
        let hub = NotificationHub::new(
            recipient,
            config.notifications.clone(),
            transports.push_socket,
            transports.notification_api,
            transports.desktop,
            transports.toasts.clone(),
        );
        let queries = Queries::new(
            cache.clone(),
            transports.fetcher,
            transports.mutations,
            transports.toasts,
        );
        Self {
            cache,
            realtime,
            hub,
            queries,
            gc_interval: config.cache.gc_interval(),
            tasks: Vec::new(),
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn realtime(&self) -> &SubscriptionManager {
        &self.realtime
    }

    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    pub fn queries(&self) -> &Queries {
        &self.queries
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Restore snapshots from `session` and start every background task.
    /// Returns `None` when already running.
    pub fn start(&mut self, session: &SessionStore) -> Option<StartReport> {
        if self.is_running() {
            return None;
        }
        let restored_queries = self.cache.restore(session.load_query_cache());
        let restored_notifications = self.hub.restore(session.load_notifications());

        self.tasks.push(self.cache.spawn_gc(self.gc_interval));
        let subscribed_tables = self.realtime.subscribe_all();
        self.hub.start();
        self.tasks.push(PollingFallback::new(self.hub.clone()).spawn());

        let report = StartReport {
            restored_queries,
            restored_notifications,
            subscribed_tables,
        };
        tracing::info!(
            restored_queries,
            restored_notifications,
            subscribed_tables,
            "Sync agent started"
        );
        Some(report)
    }

    /// Stop every task and write the cache and notification snapshots into
    /// `session`. The caller saves the file.
    pub fn shutdown(&mut self, session: &mut SessionStore) -> Result<(), SessionError> {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.realtime.unsubscribe_all();
        self.hub.stop();

        let notifications = self.hub.snapshot();
        let queries = self.cache.persistable_snapshot();
        session.save_notifications(&notifications)?;
        session.save_query_cache(&queries)?;
        tracing::info!(
            notifications = notifications.len(),
            queries = queries.len(),
            "Sync agent stopped"
        );
        Ok(())
    }
}
