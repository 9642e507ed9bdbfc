//! msq-sync entry point.

use msq_client::agent::{SyncAgent, Transports};
use msq_client::config::ClientConfig;
use msq_client::error::ClientError;
use msq_client::session::SessionStore;
use msq_client::telemetry;

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    let config = ClientConfig::load()?;
    telemetry::init_tracing(&config.log)?;

    let mut session = SessionStore::load(&config.session_path)?;
    let recipient = session.recipient().ok_or(ClientError::NotSignedIn)?;
    let transports = Transports::live(&config, session.access_token())?;

    let mut agent = SyncAgent::new(&config, recipient, transports);
    agent.start(&session);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    agent.shutdown(&mut session)?;
    session.save()?;
    Ok(())
}
