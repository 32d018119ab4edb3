use std::sync::Mutex;

use axum::extract::ws::{Message, WebSocket};
use chrono::{DateTime, Utc};
use futures_util::stream::SplitSink;
use tokio_util::sync::CancellationToken;

/// Opaque identifier for a connection, unique for the process lifetime.
pub type ConnectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

/// One accepted, handshake-completed websocket session.
///
/// Owned by the registry; dispatch workers only borrow it for the duration of
/// a single send. The sink half of the socket lives here behind an async
/// mutex, the stream half stays with the reader task in the server.
pub struct Connection {
    id: ConnectionId,
    opened_at: DateTime<Utc>,
    state: Mutex<ConnectionState>,
    sink: tokio::sync::Mutex<SplitSink<WebSocket, Message>>,
    cancel: CancellationToken,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            id,
            opened_at: Utc::now(),
            state: Mutex::new(ConnectionState::Open),
            sink: tokio::sync::Mutex::new(sink),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().expect("Connection state lock poisoned")
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Marks the connection as closing and cancels its reader task.
    /// Idempotent; a closed connection stays closed.
    pub(crate) fn begin_close(&self) {
        let mut state = self.state.lock().expect("Connection state lock poisoned");
        if *state == ConnectionState::Open {
            *state = ConnectionState::Closing;
        }
        self.cancel.cancel();
    }

    pub(crate) fn mark_closed(&self) {
        let mut state = self.state.lock().expect("Connection state lock poisoned");
        *state = ConnectionState::Closed;
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn sink(&self) -> &tokio::sync::Mutex<SplitSink<WebSocket, Message>> {
        &self.sink
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("opened_at", &self.opened_at)
            .field("state", &self.state())
            .finish()
    }
}
