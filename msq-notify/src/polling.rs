//! REST polling used only while the push socket is down.

use crate::hub::{ConnectionState, NotificationHub};
use msq_core::{ConfigError, Toast, ToastAction};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollingConfig {
    #[serde(default = "default_base_interval_ms")]
    pub base_interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

fn default_base_interval_ms() -> u64 {
    30_000
}

fn default_max_interval_ms() -> u64 {
    300_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_consecutive_failures() -> u32 {
    5
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: default_base_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            multiplier: default_multiplier(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

impl PollingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "notifications.polling.base_interval_ms",
                "must be > 0",
            ));
        }
        if self.max_interval_ms < self.base_interval_ms {
            return Err(ConfigError::invalid(
                "notifications.polling.max_interval_ms",
                "must be >= base_interval_ms",
            ));
        }
        if self.multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "notifications.polling.multiplier",
                "must be >= 1.0",
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::invalid(
                "notifications.polling.max_consecutive_failures",
                "must be > 0",
            ));
        }
        Ok(())
    }
}

/// Adaptive poll interval: grows while nothing new arrives, resets when something does.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    config: PollingConfig,
    current_ms: u64,
}

impl PollSchedule {
    pub fn new(config: PollingConfig) -> Self {
        Self {
            current_ms: config.base_interval_ms,
            config,
        }
    }

    pub fn current(&self) -> Duration {
        Duration::from_millis(self.current_ms)
    }

    /// Record how many new notifications the last poll found.
    pub fn record(&mut self, new_items: usize) -> Duration {
        self.current_ms = if new_items > 0 {
            self.config.base_interval_ms
        } else {
            ((self.current_ms as f64 * self.config.multiplier) as u64).min(self.config.max_interval_ms)
        };
        self.current()
    }

    pub fn reset(&mut self) {
        self.current_ms = self.config.base_interval_ms;
    }
}

/// Drives [`NotificationHub::sync_missed`] whenever the socket is not connected.
pub struct PollingFallback {
    hub: NotificationHub,
    config: PollingConfig,
}

impl PollingFallback {
    pub fn new(hub: NotificationHub) -> Self {
        let config = hub.config().polling.clone();
        Self { hub, config }
    }

    pub fn with_config(mut self, config: PollingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until the failure limit is hit.
    pub async fn run(self) {
        let mut state = self.hub.watch_state();
        let mut schedule = PollSchedule::new(self.config.clone());
        let mut failures: u32 = 0;

        loop {
            let closed = state
                .wait_for(|s| *s != ConnectionState::Connected)
                .await
                .is_err();
            if closed {
                return;
            }

            // Sleep, but start over if the socket connects meanwhile.
            let connected = tokio::select! {
                _ = tokio::time::sleep(schedule.current()) => false,
                connected = async { state.wait_for(|s| *s == ConnectionState::Connected).await.is_ok() } => connected,
            };
            if connected {
                schedule.reset();
                continue;
            }

            match self.hub.sync_missed().await {
                Ok(count) => {
                    failures = 0;
                    let next = schedule.record(count);
                    tracing::debug!(count, next_ms = next.as_millis() as u64, "Polled notifications");
                }
                Err(err) => {
                    failures += 1;
                    schedule.record(0);
                    tracing::warn!(error = %err, failures, "Notification poll failed");
                    if failures >= self.config.max_consecutive_failures {
                        self.hub.toasts().show(
                            Toast::warning("Unable to load new notifications")
                                .with_description("Please refresh the page manually.")
                                .with_action(ToastAction::Refresh)
                                .with_id("notifications-polling-failed"),
                        );
                        return;
                    }
                }
            }
        }
    }
}
