//! Configuration loading for the sync client.
//!
//! Endpoints, timeouts and the session path are required. Tuning sections
//! (`cache`, `log`, `realtime`, `notifications`) fall back to defaults.

use msq_cache::{QueryOptions, RetryPolicy};
use msq_notify::NotifyConfig;
use msq_realtime::RealtimeConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV_VAR: &str = "METERSQUARE_CONFIG";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub realtime_ws_url: String,
    pub notify_ws_url: String,
    pub request_timeout_ms: u64,
    pub session_path: PathBuf,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub notifications: NotifyConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_stale_time_ms")]
    pub stale_time_ms: u64,
    #[serde(default = "default_gc_time_ms")]
    pub gc_time_ms: u64,
    #[serde(default = "default_gc_interval_ms")]
    pub gc_interval_ms: u64,
    #[serde(default = "default_query_retries")]
    pub query_retries: u32,
}

fn default_stale_time_ms() -> u64 {
    30_000
}

fn default_gc_time_ms() -> u64 {
    300_000
}

fn default_gc_interval_ms() -> u64 {
    60_000
}

fn default_query_retries() -> u32 {
    3
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time_ms: default_stale_time_ms(),
            gc_time_ms: default_gc_time_ms(),
            gc_interval_ms: default_gc_interval_ms(),
            query_retries: default_query_retries(),
        }
    }
}

impl CacheConfig {
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions::default()
            .with_stale_time(Duration::from_millis(self.stale_time_ms))
            .with_gc_time(Duration::from_millis(self.gc_time_ms))
            .with_retry(RetryPolicy {
                max_retries: self.query_retries,
                ..RetryPolicy::query_default()
            })
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Emit JSON lines instead of the human-readable format.
    #[serde(default)]
    pub json: bool,
    /// `EnvFilter` directives; `RUST_LOG` wins when set.
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Missing configuration file path (use --config or METERSQUARE_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Invalid(#[from] msq_core::ConfigError),
}

impl ClientConfig {
    pub fn load() -> Result<Self, ConfigLoadError> {
        let path = config_path_from_args(std::env::args().skip(1)).or_else(config_path_from_env);
        let path = path.ok_or(ConfigLoadError::MissingConfigPath)?;
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigLoadError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigLoadError> {
        let config: ClientConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), msq_core::ConfigError> {
        use msq_core::ConfigError;

        for (field, value) in [
            ("api_base_url", &self.api_base_url),
            ("realtime_ws_url", &self.realtime_ws_url),
            ("notify_ws_url", &self.notify_ws_url),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(field, "must not be empty"));
            }
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://") {
            return Err(ConfigError::invalid("api_base_url", "must be an http(s) URL"));
        }
        for (field, value) in [
            ("realtime_ws_url", &self.realtime_ws_url),
            ("notify_ws_url", &self.notify_ws_url),
        ] {
            if !value.starts_with("ws://") && !value.starts_with("wss://") {
                return Err(ConfigError::invalid(field, "must be a ws(s) URL"));
            }
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::invalid("request_timeout_ms", "must be > 0"));
        }
        if self.session_path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("session_path", "must not be empty"));
        }
        if self.cache.stale_time_ms > self.cache.gc_time_ms {
            return Err(ConfigError::invalid(
                "cache.stale_time_ms",
                "must be <= cache.gc_time_ms",
            ));
        }
        if self.cache.gc_interval_ms == 0 {
            return Err(ConfigError::invalid("cache.gc_interval_ms", "must be > 0"));
        }
        self.realtime.validate()?;
        self.notifications.validate()
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from)
}

fn config_path_from_args(args: impl IntoIterator<Item = String>) -> Option<PathBuf> {
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}
