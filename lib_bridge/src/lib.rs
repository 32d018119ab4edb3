#![forbid(unsafe_code)]

// Declare the modules to re-export
pub mod config;
pub mod core;

// Re-export the public API surface
pub use crate::config::BridgeConfig;
pub use crate::core::connection::{Connection, ConnectionId, ConnectionState};
pub use crate::core::error::{BridgeError, SendFailure};
pub use crate::core::server::BroadcastServer;
