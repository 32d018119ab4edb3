//! Inbound adapter: subscribes to a Redis pub/sub channel and hands every
//! payload to the broadcast server, in arrival order. The single subscriber
//! task is the serialization point the server's `accept` contract expects.

use std::sync::Arc;

use futures_util::StreamExt;
use lib_bridge::{BridgeError, BroadcastServer};
use tokio::sync::broadcast;
use tokio::time::sleep;

use crate::bridge_logic::config::Config;

pub async fn run(
    config: Config,
    server: Arc<BroadcastServer>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let url = config.redis_url();
    let channel = config.redis_channel();
    let reconnect_delay = config.reconnect_delay();

    let client = match redis::Client::open(url.as_str()) {
        Ok(client) => client,
        Err(e) => {
            log::error!("Invalid Redis URL {}: {}", url, e);
            return;
        }
    };

    loop {
        if shutdown.try_recv().is_ok() {
            break;
        }

        log::info!("Connecting to Redis at {}", url);

        let mut pubsub = match client.get_async_pubsub().await {
            Ok(pubsub) => pubsub,
            Err(e) => {
                log::error!("Failed to connect to Redis: {}", e);
                sleep(reconnect_delay).await;
                continue;
            }
        };
        if let Err(e) = pubsub.subscribe(&channel).await {
            log::error!("Failed to subscribe to channel '{}': {}", channel, e);
            sleep(reconnect_delay).await;
            continue;
        }
        log::info!("Subscribed to Redis channel '{}'", channel);

        let mut messages = pubsub.on_message();
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    log::info!("Inbound adapter shutting down...");
                    return;
                }
                msg = messages.next() => {
                    match msg {
                        Some(msg) => {
                            match server.accept(msg.get_payload_bytes()).await {
                                Ok(()) => {}
                                Err(BridgeError::NotRunning) => {
                                    log::info!("Broadcast server stopped, inbound adapter exiting");
                                    return;
                                }
                                Err(e) => log::error!("Failed to broadcast message: {}", e),
                            }
                        }
                        None => {
                            log::warn!("Redis connection lost, reconnecting");
                            break;
                        }
                    }
                }
            }
        }

        sleep(reconnect_delay).await;
    }
}
