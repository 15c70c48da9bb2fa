//! Headless host binary: runs a live companion session until Ctrl-C.
//!
//! Loads config, reconciles the memory vault, connects a session over
//! WebSocket, and logs session events. The session runs until Ctrl-C or
//! until the remote agent closes the connection.

use keepsake::audio::CpalDevices;
use keepsake::config::KeepsakeConfig;
use keepsake::memory::{FsBlobStore, MemoryStore};
use keepsake::session::{SessionController, SessionEvent};
use keepsake::transport::ws::WsConnector;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = KeepsakeConfig::default_config_path();
    let config = KeepsakeConfig::load_or_default(&config_path);
    tracing::info!("keepsake-host starting (config: {})", config_path.display());

    let store = Arc::new(MemoryStore::new(
        Box::new(FsBlobStore::new(config.memory.root())),
        &config.memory,
    ));
    store.init().map_err(|e| {
        tracing::error!("memory vault reconciliation failed: {e}");
        anyhow::anyhow!("vault init failed: {e}")
    })?;
    tracing::info!("memory vault ready ({} symbols)", store.load().len());

    let controller = Arc::new(SessionController::new(
        config.clone(),
        store,
        Arc::new(WsConnector::new(config.transport.url.clone())),
        Arc::new(CpalDevices),
    ));

    let mut events = controller.subscribe();
    controller.connect().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                controller.disconnect().await;
                break;
            }
            event = events.recv() => {
                match event {
                    Ok(SessionEvent::MemoryUpdated) => tracing::info!("memory vault updated"),
                    Ok(SessionEvent::Disconnected) => {
                        tracing::info!("session ended");
                        break;
                    }
                    Ok(SessionEvent::InputLevel { .. }) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::info!("keepsake-host shut down cleanly");
    Ok(())
}
