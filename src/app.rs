//! Process wiring: config → transport → session → inbound pipeline → HTTP API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::info;

use crate::ai::AiBridge;
use crate::bus::RawInbound;
use crate::config::Config;
use crate::dispatch::{ActionDispatcher, BackendNotifier};
use crate::gateway::{self, GatewayState};
use crate::router;
use crate::session::{ReconnectPolicy, SessionManager};
use crate::transport::Transport;

pub async fn run(config: Config) -> Result<()> {
    let transport = build_transport(&config)?;
    let (session, inbound_rx) = SessionManager::new(transport.clone(), ReconnectPolicy::default());

    let ai = Arc::new(AiBridge::new(
        config.ai.endpoint.clone(),
        Duration::from_secs(config.ai.timeout_secs),
    ));
    let backend = Arc::new(BackendNotifier::new(config.backend.base_url.clone()));
    let dispatcher = Arc::new(ActionDispatcher::new(session.clone(), ai, backend));
    spawn_pipeline(inbound_rx, dispatcher);

    session.connect().await?;

    let state = Arc::new(GatewayState::new(session));
    let server = gateway::serve(&config.gateway.host, config.gateway.port, state).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    server.abort();
    transport.disconnect().await;
    Ok(())
}

/// Consume raw inbound messages, classify them and hand each event to its
/// own task so a slow AI round-trip never blocks the pipeline.
fn spawn_pipeline(mut inbound: mpsc::Receiver<RawInbound>, dispatcher: Arc<ActionDispatcher>) {
    tokio::spawn(async move {
        while let Some(raw) = inbound.recv().await {
            if let Some(event) = router::classify(raw) {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move { dispatcher.handle(event).await });
            }
        }
    });
}

#[cfg(feature = "transport-whatsapp")]
fn build_transport(config: &Config) -> Result<Arc<dyn Transport>> {
    let session_dir = config.whatsapp.session_dir()?;
    Ok(Arc::new(crate::transport::whatsapp::WaTransport::new(
        session_dir,
    )))
}

#[cfg(not(feature = "transport-whatsapp"))]
fn build_transport(_config: &Config) -> Result<Arc<dyn Transport>> {
    anyhow::bail!("built without a transport; enable the `transport-whatsapp` feature")
}
