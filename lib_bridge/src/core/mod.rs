//! # Core Broadcast Engine
//!
//! The components in this module turn one inbound payload into one websocket
//! text frame per connected client, without letting a slow or dead client
//! hold the rest of the fan-out hostage.
//!
//! ## Core Components:
//!
//! - **`registry`**: The thread-safe set of live connections. The only state
//!   in the core that is mutated by more than one actor (handshake handler,
//!   dispatch workers, shutdown), so every mutation happens under its lock
//!   and broadcasts work from point-in-time snapshots, never live views.
//!
//! - **`connection`**: One accepted, handshake-completed websocket session:
//!   identifier, state, the sink half of the socket, and the token that tears
//!   its reader task down.
//!
//! - **`sender`**: Writes exactly one text frame to one connection under a
//!   bounded timeout. A failed send is final for that (message, connection)
//!   pair; there is no retry.
//!
//! - **`pool`**: The fixed-size dispatch pool. Tasks for the same connection
//!   always land on the same worker queue, which is what gives each client
//!   in-order delivery while different clients are served in parallel.
//!
//! - **`server`**: The lifecycle owner: binds the listener, accepts
//!   handshakes, fans inbound payloads out through the pool, and drains
//!   everything on stop.

pub mod connection;
pub mod error;
pub mod pool;
pub mod registry;
pub mod sender;
pub mod server;
