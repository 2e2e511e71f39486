//! Server configuration
//!
//! Values are layered: built-in defaults, then an optional JSON file
//! (`CONFIG_PATH`, default `server.json`), then environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file, read only if it exists
pub const DEFAULT_CONFIG_PATH: &str = "server.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Socket-level limits for every display connection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionLimits {
    /// Close the connection if nothing (message or pong) arrives within this window
    pub pong_wait: Duration,
    /// Ping interval; must stay below `pong_wait`
    pub ping_period: Duration,
    /// Deadline for writing a single frame
    pub write_wait: Duration,
    /// Largest inbound message accepted
    pub max_message_size: usize,
    /// Outbound queue capacity; a full queue gets the connection evicted
    pub send_queue_depth: usize,
}

impl ConnectionLimits {
    pub fn with_pong_wait(pong_wait: Duration) -> Self {
        Self {
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            ..Self::default()
        }
    }
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            write_wait: Duration::from_secs(10),
            max_message_size: 512,
            send_queue_depth: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    pub port: u16,
    /// Directory served under `/results/` and listed by `/api/files`
    pub results_dir: PathBuf,
    /// Admin UI language, reported through `/api/info`
    pub language: String,
    /// Admin UI assets served under `/admin/`
    pub static_dir: PathBuf,
    /// Maximum registered displays (0 = unlimited)
    pub max_clients: usize,
    /// Advertise the server over mDNS
    pub discovery: bool,
    /// How long open connections get to drain on shutdown
    pub shutdown_grace_secs: u64,
    #[serde(skip)]
    pub limits: ConnectionLimits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            results_dir: PathBuf::from("./results"),
            language: "en".to_string(),
            static_dir: PathBuf::from("static"),
            max_clients: 100,
            discovery: true,
            shutdown_grace_secs: 10,
            limits: ConnectionLimits::default(),
        }
    }
}

impl ServerConfig {
    /// Load defaults, the config file (if present) and environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CONFIG_PATH")
            .ok()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        let mut config = if Path::new(&path).exists() {
            tracing::info!("Loading config from {}", path);
            Self::from_file(&path)?
        } else {
            tracing::debug!("No config file at {}, using defaults", path);
            Self::default()
        };

        config.apply_env()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Environment variables take precedence over the file
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(port) = env_parse("PORT")? {
            self.port = port;
        }
        if let Some(dir) = env_string("RESULTS_DIR") {
            self.results_dir = PathBuf::from(dir);
        }
        if let Some(language) = env_string("LANGUAGE") {
            self.language = language;
        }
        if let Some(dir) = env_string("STATIC_DIR") {
            self.static_dir = PathBuf::from(dir);
        }
        if let Some(max) = env_parse("MAX_CLIENTS")? {
            self.max_clients = max;
        }
        if let Some(value) = env_string("DISCOVERY") {
            self.discovery = value != "0" && value.to_lowercase() != "false";
        }
        if let Some(secs) = env_parse("SHUTDOWN_GRACE_SECS")? {
            self.shutdown_grace_secs = secs;
        }
        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn env_string(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env_string(var) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
        None => Ok(None),
    }
}
