//! # Redis to WebSocket Bridge
//!
//! Subscribes to a Redis Pub/Sub channel and broadcasts every message, as a
//! text frame, to all websocket clients connected on the configured path.

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;

mod bridge_logic;
use bridge_logic::{config, logger, upstream};
use lib_bridge::BroadcastServer;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config();
    logger::setup_logging(&config.log_dir(), &config.log_level())?;

    let server = Arc::new(BroadcastServer::new(config.bridge_config())?);
    server.start().await?;
    if let Some(addr) = server.local_addr() {
        log::info!(
            "Bridging Redis channel '{}' to ws://{}{}",
            config.redis_channel(),
            addr,
            server.config().path
        );
    }

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let upstream_handle = tokio::spawn(upstream::run(
        config.clone(),
        Arc::clone(&server),
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut term_signal = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
                term_signal.recv().await;
                log::info!("SIGTERM received, initiating shutdown.");
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    // Stop the inbound adapter first, then drain and close the bridge.
    let _ = shutdown_tx.send(());
    server.stop().await?;
    let _ = upstream_handle.await;

    log::info!("Shutdown complete.");
    Ok(())
}
