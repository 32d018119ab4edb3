//! # Broadcast Server
//!
//! Owns the listener, the registry, the dispatch pool and the lifecycle:
//! CREATED → STARTED → STOPPING → STOPPED. `accept` and the websocket
//! handshake are only valid while STARTED.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::BridgeConfig;
use crate::core::connection::Connection;
use crate::core::error::BridgeError;
use crate::core::pool::{BroadcastTask, DispatchPool, Frame};
use crate::core::registry::ConnectionRegistry;
use crate::core::sender::FrameSender;

/// Grace period for best-effort close frames during teardown.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Started,
    Stopping,
    Stopped,
}

/// State shared with the axum handshake handlers.
struct ServerShared {
    registry: Arc<ConnectionRegistry>,
    lifecycle: Mutex<Lifecycle>,
    next_connection_id: AtomicU64,
}

impl ServerShared {
    fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock().expect("Lifecycle lock poisoned")
    }
}

/// The bridge core: accepts handshakes on the configured path and fans every
/// payload handed to [`accept`](BroadcastServer::accept) out to all clients
/// registered at that moment.
///
/// An owned instance with its own listener and registry; multiple independent
/// servers can coexist in one process.
pub struct BroadcastServer {
    config: BridgeConfig,
    shared: Arc<ServerShared>,
    pool: Mutex<Option<Arc<DispatchPool>>>,
    serve_handle: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    shutdown: CancellationToken,
    next_seq: AtomicU64,
}

impl BroadcastServer {
    /// Validates the configuration and builds a server in the CREATED state.
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        Ok(Self {
            config,
            shared: Arc::new(ServerShared {
                registry: Arc::new(ConnectionRegistry::new()),
                lifecycle: Mutex::new(Lifecycle::Created),
                next_connection_id: AtomicU64::new(1),
            }),
            pool: Mutex::new(None),
            serve_handle: Mutex::new(None),
            local_addr: Mutex::new(None),
            shutdown: CancellationToken::new(),
            next_seq: AtomicU64::new(0),
        })
    }

    /// Binds the listener, spawns the dispatch pool and begins accepting
    /// handshakes. Fails with [`BridgeError::Bind`] if the port is taken.
    pub async fn start(&self) -> Result<(), BridgeError> {
        {
            let mut lifecycle = self.shared.lifecycle.lock().expect("Lifecycle lock poisoned");
            if *lifecycle != Lifecycle::Created {
                return Err(BridgeError::AlreadyStarted);
            }
            // Claimed; reverted to Stopped below if the bind fails.
            *lifecycle = Lifecycle::Started;
        }

        let pool = Arc::new(DispatchPool::spawn(
            self.config.threads,
            self.config.queue_depth,
            FrameSender::new(self.config.send_timeout),
            Arc::clone(&self.shared.registry),
        ));

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(source) => {
                pool.shutdown(Duration::ZERO).await;
                *self.shared.lifecycle.lock().expect("Lifecycle lock poisoned") =
                    Lifecycle::Stopped;
                return Err(BridgeError::Bind { addr, source });
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(local_addr) => local_addr,
            Err(source) => {
                pool.shutdown(Duration::ZERO).await;
                *self.shared.lifecycle.lock().expect("Lifecycle lock poisoned") =
                    Lifecycle::Stopped;
                return Err(BridgeError::Bind { addr, source });
            }
        };

        *self.local_addr.lock().expect("Address lock poisoned") = Some(local_addr);
        *self.pool.lock().expect("Pool lock poisoned") = Some(pool);

        let app = Router::new()
            .route(&self.config.path, get(ws_handler))
            .with_state(Arc::clone(&self.shared));

        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                log::error!("Websocket listener error: {}", e);
            }
        });
        *self.serve_handle.lock().expect("Serve handle lock poisoned") = Some(handle);

        log::info!(
            "Broadcast server listening on {} (path {})",
            local_addr,
            self.config.path
        );
        Ok(())
    }

    /// Entry point for the inbound adapter: fans one payload out to every
    /// currently registered connection.
    ///
    /// Returns once every per-connection task is *submitted* to the dispatch
    /// pool; delivery completes asynchronously. A full worker queue blocks
    /// here, propagating back-pressure to the caller.
    pub async fn accept(&self, payload: impl AsRef<[u8]>) -> Result<(), BridgeError> {
        if self.shared.lifecycle() != Lifecycle::Started {
            return Err(BridgeError::NotRunning);
        }
        let pool = self
            .pool
            .lock()
            .expect("Pool lock poisoned")
            .clone()
            .ok_or(BridgeError::NotRunning)?;

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let frame = Arc::new(Frame::new(seq, payload.as_ref()));
        let snapshot = self.shared.registry.snapshot();
        log::debug!("Broadcasting frame {} to {} client(s)", seq, snapshot.len());

        for connection in snapshot {
            let task = BroadcastTask {
                frame: Arc::clone(&frame),
                connection,
            };
            if pool.submit(task).await.is_err() {
                return Err(BridgeError::NotRunning);
            }
        }
        Ok(())
    }

    /// Stops accepting handshakes, drains in-flight sends (bounded by the
    /// shutdown timeout), closes every registered connection and releases
    /// the listener.
    pub async fn stop(&self) -> Result<(), BridgeError> {
        {
            let mut lifecycle = self.shared.lifecycle.lock().expect("Lifecycle lock poisoned");
            if *lifecycle != Lifecycle::Started {
                return Err(BridgeError::NotRunning);
            }
            *lifecycle = Lifecycle::Stopping;
        }
        log::info!("Broadcast server stopping");
        self.shutdown.cancel();

        let pool = self.pool.lock().expect("Pool lock poisoned").take();
        if let Some(pool) = pool {
            pool.shutdown(self.config.shutdown_timeout).await;
        }

        for connection in self.shared.registry.drain() {
            let close = async {
                let mut sink = connection.sink().lock().await;
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: "server shutting down".into(),
                    })))
                    .await;
            };
            let _ = tokio::time::timeout(CLOSE_GRACE, close).await;
            connection.mark_closed();
        }

        let handle = self.serve_handle.lock().expect("Serve handle lock poisoned").take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(self.config.shutdown_timeout, &mut handle)
                .await
                .is_err()
            {
                log::warn!("Listener did not stop within the shutdown timeout, aborting");
                handle.abort();
            }
        }

        *self.shared.lifecycle.lock().expect("Lifecycle lock poisoned") = Lifecycle::Stopped;
        log::info!("Broadcast server stopped");
        Ok(())
    }

    /// Actual bound address, available after a successful `start`. With port
    /// 0 in the configuration this is where the ephemeral port shows up.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().expect("Address lock poisoned")
    }

    pub fn port(&self) -> Option<u16> {
        self.local_addr().map(|addr| addr.port())
    }

    /// Number of currently registered connections.
    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(shared): State<Arc<ServerShared>>) -> Response {
    if shared.lifecycle() != Lifecycle::Started {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, shared))
        .into_response()
}

async fn handle_socket(socket: WebSocket, shared: Arc<ServerShared>) {
    let id = shared.next_connection_id.fetch_add(1, Ordering::Relaxed);
    let (sink, mut stream) = socket.split();
    let connection = Arc::new(Connection::new(id, sink));

    // The lifecycle gate in `ws_handler` ran before this task was spawned;
    // a drained registry rejects the add if `stop` won the race since then.
    if let Err(e) = shared.registry.add(Arc::clone(&connection)) {
        // Fail-soft: reject this handshake, keep serving everyone else.
        log::warn!("Rejecting handshake for client {}: {}", id, e);
        let (code, reason) = match e {
            BridgeError::DuplicateIdentifier(_) => {
                (close_code::ERROR, "duplicate connection identifier")
            }
            _ => (close_code::AWAY, "server shutting down"),
        };
        connection.begin_close();
        let close = async {
            let mut sink = connection.sink().lock().await;
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })))
                .await;
        };
        let _ = tokio::time::timeout(CLOSE_GRACE, close).await;
        connection.mark_closed();
        return;
    }
    log::info!("Client {} connected", id);

    let cancel = connection.cancel_token().clone();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = stream.next() => match msg {
                // Inbound frames are ignored; the bridge is one-way.
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::debug!("Client {} transport error: {}", id, e);
                    break;
                }
            }
        }
    }

    shared.registry.remove(id);
    connection.mark_closed();
    log::info!("Client {} disconnected", id);
}
