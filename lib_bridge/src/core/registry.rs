use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::connection::{Connection, ConnectionId};
use crate::core::error::BridgeError;

/// Thread-safe set of live connections, kept in handshake order.
///
/// A connection is present here iff its state is `Open`. `remove` flips the
/// state to `Closing` while still holding the registry lock, so a broadcast
/// snapshot taken before the removal sees the state change and its send for
/// that connection fails cleanly instead of racing the teardown.
///
/// `drain` additionally closes the registry for further adds: a handshake
/// task that was already past the lifecycle check when shutdown began gets
/// rejected here instead of lingering as a registered-but-orphaned entry.
pub struct ConnectionRegistry {
    connections: Mutex<Vec<Arc<Connection>>>,
    closed: AtomicBool,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Registers an open connection. Identifiers come from a process-wide
    /// counter so a duplicate indicates broken handshake handling upstream.
    /// Fails with [`BridgeError::NotRunning`] once the registry is drained.
    pub fn add(&self, connection: Arc<Connection>) -> Result<(), BridgeError> {
        let mut connections = self.connections.lock().expect("Registry lock poisoned");
        if self.closed.load(Ordering::Relaxed) {
            return Err(BridgeError::NotRunning);
        }
        if connections.iter().any(|c| c.id() == connection.id()) {
            return Err(BridgeError::DuplicateIdentifier(connection.id()));
        }
        connections.push(connection);
        Ok(())
    }

    /// Removes a connection by identifier. Idempotent: removing an absent
    /// identifier is a no-op. Returns the connection so the caller can finish
    /// tearing it down.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut connections = self.connections.lock().expect("Registry lock poisoned");
        let position = connections.iter().position(|c| c.id() == id)?;
        let connection = connections.remove(position);
        connection.begin_close();
        Some(connection)
    }

    /// Point-in-time snapshot of the registered connections, in handshake
    /// order. Connections added afterwards are simply not part of this
    /// broadcast; connections removed afterwards fail their send.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .lock()
            .expect("Registry lock poisoned")
            .clone()
    }

    /// Empties the registry, marking every connection as closing, and rejects
    /// all subsequent adds. Used on shutdown.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        let mut connections = self.connections.lock().expect("Registry lock poisoned");
        // Set under the lock so no add can slip in between drain and flag.
        self.closed.store(true, Ordering::Relaxed);
        let drained: Vec<_> = connections.drain(..).collect();
        for connection in &drained {
            connection.begin_close();
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.connections.lock().expect("Registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
