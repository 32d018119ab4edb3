use thiserror::Error;

use crate::core::connection::ConnectionId;

/// Errors surfaced by the broadcast server's public API.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The websocket listener could not bind. Fatal to `start`.
    #[error("failed to bind websocket listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// A handshake produced an identifier already present in the registry.
    #[error("duplicate connection identifier {0}")]
    DuplicateIdentifier(ConnectionId),

    /// `accept` or a handshake was attempted outside the STARTED state.
    #[error("broadcast server is not running")]
    NotRunning,

    /// `start` was called on a server that already left the CREATED state.
    #[error("broadcast server was already started")]
    AlreadyStarted,

    /// Configuration rejected at construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failure of a single frame write to a single connection.
///
/// Absorbed at the dispatch worker boundary: the connection is removed from
/// the registry and the broadcast carries on for everyone else.
#[derive(Debug, Error)]
pub enum SendFailure {
    /// The write (including sink lock acquisition) exceeded the send timeout.
    #[error("send timed out")]
    Timeout,

    /// The connection was already closing or closed when the send started.
    #[error("transport closed")]
    TransportClosed,

    /// The transport reported an error during the write.
    #[error("websocket i/o error: {0}")]
    Io(String),
}
