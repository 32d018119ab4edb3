use clap::Parser;
use lib_bridge::BridgeConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Redis to WebSocket broadcast bridge", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "BRIDGE_PORT", help = "Port to listen on for websocket clients (0 = ephemeral).")]
    pub port: Option<u16>,

    #[clap(long, env = "BRIDGE_HOST", help = "Interface to bind the websocket listener on.")]
    pub host: Option<String>,

    #[clap(long, env = "BRIDGE_PATH", help = "URL path websocket clients connect to.")]
    pub path: Option<String>,

    #[clap(long, env = "BRIDGE_THREADS", help = "Number of dispatch pool workers.")]
    pub threads: Option<usize>,

    #[clap(long, env = "BRIDGE_QUEUE_DEPTH", help = "Capacity of each dispatch worker queue.")]
    pub queue_depth: Option<usize>,

    #[clap(long, env = "BRIDGE_SEND_TIMEOUT_MS", help = "Per-frame send timeout in milliseconds.")]
    pub send_timeout_ms: Option<u64>,

    #[clap(long, env = "BRIDGE_SHUTDOWN_TIMEOUT_MS", help = "Bound in milliseconds for draining in-flight sends at shutdown.")]
    pub shutdown_timeout_ms: Option<u64>,

    #[clap(long, env = "BRIDGE_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "BRIDGE_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "BRIDGE_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "BRIDGE_REDIS_URL", help = "Redis server URL for the inbound channel.")]
    pub redis_url: Option<String>,

    #[clap(long, env = "BRIDGE_REDIS_CHANNEL", help = "Redis pub/sub channel to bridge.")]
    pub redis_channel: Option<String>,

    #[clap(long, env = "BRIDGE_RECONNECT_DELAY_MS", help = "Delay in milliseconds between Redis reconnect attempts.")]
    pub reconnect_delay_ms: Option<u64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            host: other.host.or(self.host),
            path: other.path.or(self.path),
            threads: other.threads.or(self.threads),
            queue_depth: other.queue_depth.or(self.queue_depth),
            send_timeout_ms: other.send_timeout_ms.or(self.send_timeout_ms),
            shutdown_timeout_ms: other.shutdown_timeout_ms.or(self.shutdown_timeout_ms),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            redis_url: other.redis_url.or(self.redis_url),
            redis_channel: other.redis_channel.or(self.redis_channel),
            reconnect_delay_ms: other.reconnect_delay_ms.or(self.reconnect_delay_ms),
        }
    }

    /// Resolved core configuration; unset fields fall back to the library
    /// defaults (port 9292, path /websocket, 1 worker).
    pub fn bridge_config(&self) -> BridgeConfig {
        let defaults = BridgeConfig::default();
        BridgeConfig {
            host: self.host.clone().unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            path: self.path.clone().unwrap_or(defaults.path),
            threads: self.threads.unwrap_or(defaults.threads),
            queue_depth: self.queue_depth.unwrap_or(defaults.queue_depth),
            send_timeout: self
                .send_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.send_timeout),
            shutdown_timeout: self
                .shutdown_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.shutdown_timeout),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> String {
        self.log_level.clone().unwrap_or_else(|| "info".to_string())
    }

    pub fn redis_url(&self) -> String {
        self.redis_url
            .clone()
            .unwrap_or_else(|| "redis://127.0.0.1/".to_string())
    }

    pub fn redis_channel(&self) -> String {
        self.redis_channel
            .clone()
            .unwrap_or_else(|| "redis2ws".to_string())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms.unwrap_or(5000))
    }
}

pub fn load_config() -> Config {
    // Parse CLI early to honor a --config-path override.
    let cli_args = Config::parse();

    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(default_config_path);

    let mut current_config = Config::default();

    if config_file_path.exists() {
        match fs::read_to_string(&config_file_path) {
            Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
                Ok(file_config) => current_config = current_config.merge(file_config),
                Err(e) => log::warn!(
                    "Failed to parse config file {}: {}. Falling back to other sources.",
                    config_file_path.display(),
                    e
                ),
            },
            Err(e) => log::warn!(
                "Failed to read config file {}: {}. Falling back to other sources.",
                config_file_path.display(),
                e
            ),
        }
    } else {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    // Environment variables and CLI arguments override the file.
    current_config.merge(cli_args)
}

// redis2ws.conf next to the binary wins; otherwise ~/.redis2ws.conf.
fn default_config_path() -> PathBuf {
    let local = PathBuf::from("redis2ws.conf");
    if local.exists() {
        return local;
    }
    match dirs::home_dir() {
        Some(home) => home.join(".redis2ws.conf"),
        None => local,
    }
}
