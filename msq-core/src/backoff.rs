//! Backoff settings shared by the socket reconnect loop and the poller.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
}

impl BackoffConfig {
    pub fn new(initial_ms: u64, max_ms: u64, multiplier: f64) -> Self {
        Self {
            initial_ms,
            max_ms,
            multiplier,
            jitter_ms: 0,
        }
    }

    pub fn with_jitter(mut self, jitter_ms: u64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    /// Next delay after `current_ms`, capped at `max_ms`.
    pub fn next_ms(&self, current_ms: u64) -> u64 {
        let next = (current_ms as f64 * self.multiplier) as u64;
        next.min(self.max_ms)
    }

    /// Delay for the zero-based `attempt`, without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let mut delay = self.initial_ms;
        for _ in 0..attempt {
            delay = self.next_ms(delay);
            if delay == self.max_ms {
                break;
            }
        }
        Duration::from_millis(delay)
    }

    /// `base_ms` plus up to `jitter_ms` of noise.
    pub fn jittered(&self, base_ms: u64) -> Duration {
        Duration::from_millis(jittered_backoff(base_ms, self.jitter_ms))
    }

    pub fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if self.initial_ms == 0 {
            return Err(ConfigError::invalid(
                format!("{}.initial_ms", field),
                "must be > 0",
            ));
        }
        if self.max_ms < self.initial_ms {
            return Err(ConfigError::invalid(
                format!("{}.max_ms", field),
                "must be >= initial_ms",
            ));
        }
        if self.multiplier < 1.0 {
            return Err(ConfigError::invalid(
                format!("{}.multiplier", field),
                "must be >= 1.0",
            ));
        }
        Ok(())
    }
}

fn jittered_backoff(base_ms: u64, jitter_ms: u64) -> u64 {
    if jitter_ms == 0 {
        return base_ms;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_nanos(0))
        .subsec_nanos() as u64;
    let jitter = nanos % jitter_ms;
    base_ms.saturating_add(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_ms_caps_at_max() {
        let backoff = BackoffConfig::new(1_000, 5_000, 2.0);
        assert_eq!(backoff.next_ms(1_000), 2_000);
        assert_eq!(backoff.next_ms(4_000), 5_000);
        assert_eq!(backoff.next_ms(5_000), 5_000);
    }

    #[test]
    fn test_delay_for_attempts() {
        let backoff = BackoffConfig::new(250, 2_000, 2.0);
        assert_eq!(backoff.delay_for(0), Duration::from_millis(250));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(500));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(2_000));
        assert_eq!(backoff.delay_for(30), Duration::from_millis(2_000));
    }

    #[test]
    fn test_jitter_stays_in_window() {
        let backoff = BackoffConfig::new(100, 1_000, 1.5).with_jitter(50);
        let delay = backoff.jittered(100);
        assert!(delay >= Duration::from_millis(100));
        assert!(delay < Duration::from_millis(150));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(BackoffConfig::new(0, 10, 2.0).validate("reconnect").is_err());
        assert!(BackoffConfig::new(10, 5, 2.0).validate("reconnect").is_err());
        assert!(BackoffConfig::new(10, 50, 0.5).validate("reconnect").is_err());
        assert!(BackoffConfig::new(10, 50, 1.0).validate("reconnect").is_ok());
    }
}
