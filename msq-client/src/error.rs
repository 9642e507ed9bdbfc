//! Error types for the sync client.

use crate::api_client::ApiClientError;
use crate::config::ConfigLoadError;
use crate::session::SessionError;
use crate::telemetry::TelemetryError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigLoadError),
    #[error(transparent)]
    Api(#[from] ApiClientError),
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Msq(#[from] msq_core::MsqError),
    #[error("No signed-in user in the session file")]
    NotSignedIn,
}
