//! MeterSquare sync client: REST and socket transports, the session file
//! and the agent that runs the sync layer headless.

pub mod agent;
pub mod api_client;
pub mod config;
pub mod error;
pub mod queries;
pub mod session;
pub mod telemetry;
pub mod toast;
pub mod ws;

pub use agent::{StartReport, SyncAgent, Transports};
pub use api_client::{ApiClientError, RestClient};
pub use config::{CacheConfig, ClientConfig, ConfigLoadError, LogConfig, CONFIG_ENV_VAR};
pub use error::ClientError;
pub use queries::{Endpoint, MutationMethod, MutationTransport, Queries};
pub use session::{AutosaveEntry, SessionError, SessionStore, SessionUser};
pub use toast::TracingToastSink;
