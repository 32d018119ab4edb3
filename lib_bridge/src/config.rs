use std::time::Duration;

use crate::core::error::BridgeError;

/// Resolved configuration consumed by [`crate::BroadcastServer`].
///
/// The host process owns how these values are sourced (files, environment,
/// CLI); the core only sees the final numbers. Defaults match the classic
/// websocket sink this bridge replaces: port 9292, path `/websocket`,
/// a single dispatch worker.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Interface to bind the websocket listener on.
    pub host: String,
    /// Listener port. 0 binds an ephemeral port, queryable after start.
    pub port: u16,
    /// URL path clients connect to. Must start with `/`.
    pub path: String,
    /// Number of dispatch pool workers. Fixed for the server's lifetime.
    pub threads: usize,
    /// Capacity of each worker's task queue. A full queue blocks `accept`.
    pub queue_depth: usize,
    /// Upper bound for a single frame write, lock acquisition included.
    pub send_timeout: Duration,
    /// Upper bound for draining in-flight sends during `stop`.
    pub shutdown_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9292,
            path: "/websocket".to_string(),
            threads: 1,
            queue_depth: 64,
            send_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl BridgeConfig {
    pub(crate) fn validate(&self) -> Result<(), BridgeError> {
        if self.host.is_empty() {
            return Err(BridgeError::InvalidConfig("host must not be empty".to_string()));
        }
        if !self.path.starts_with('/') {
            return Err(BridgeError::InvalidConfig(format!(
                "websocket path must start with '/', got '{}'",
                self.path
            )));
        }
        if self.threads == 0 {
            return Err(BridgeError::InvalidConfig("threads must be at least 1".to_string()));
        }
        if self.queue_depth == 0 {
            return Err(BridgeError::InvalidConfig("queue_depth must be at least 1".to_string()));
        }
        if self.send_timeout.is_zero() {
            return Err(BridgeError::InvalidConfig("send_timeout must be non-zero".to_string()));
        }
        Ok(())
    }
}
