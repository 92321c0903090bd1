//! Optional TOML configuration file for the relay.
//!
//! Every field has a default, so an empty file (or no file at all) yields
//! [`RelayConfig::default`].  CLI flags and environment variables are applied
//! on top of the parsed file by the binary.
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! port = 8080
//! ping_interval_secs = 15
//! ping_timeout_secs = 45
//! outbound_queue_capacity = 256
//!
//! [relay]
//! max_frame_bytes = 12582912
//! max_sends_per_sec = 45
//! backlog_threshold_bytes = 524288
//! persist_rooms = true
//!
//! [auth]
//! host_secret = "shared-secret"
//!
//! [auth.rooms]
//! LOBBY = "lobby-only-secret"
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::config::{
    DeliveryLimits, HostAuthConfig, RelayConfig, DEFAULT_BACKLOG_THRESHOLD_BYTES,
    DEFAULT_MAX_FRAME_BYTES, DEFAULT_MAX_SENDS_PER_SEC, DEFAULT_OUTBOUND_QUEUE_CAPACITY,
    DEFAULT_PING_INTERVAL_SECS, DEFAULT_PING_TIMEOUT_SECS, DEFAULT_PORT,
};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid bind address '{0}'")]
    InvalidAddress(String),

    #[error("ping_timeout_secs ({timeout}) must be greater than ping_interval_secs ({interval})")]
    InvalidKeepalive { interval: u64, timeout: u64 },
}

// ── Schema ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RelayFileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub auth: AuthSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelaySection {
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default = "default_max_sends_per_sec")]
    pub max_sends_per_sec: u32,
    #[serde(default = "default_backlog_threshold_bytes")]
    pub backlog_threshold_bytes: usize,
    #[serde(default = "default_true")]
    pub persist_rooms: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthSection {
    /// Secret required to host any room without its own entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_secret: Option<String>,
    /// Per-room host secrets.
    #[serde(default)]
    pub rooms: HashMap<String, String>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_ping_interval_secs() -> u64 {
    DEFAULT_PING_INTERVAL_SECS
}
fn default_ping_timeout_secs() -> u64 {
    DEFAULT_PING_TIMEOUT_SECS
}
fn default_outbound_queue_capacity() -> usize {
    DEFAULT_OUTBOUND_QUEUE_CAPACITY
}
fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}
fn default_max_sends_per_sec() -> u32 {
    DEFAULT_MAX_SENDS_PER_SEC
}
fn default_backlog_threshold_bytes() -> usize {
    DEFAULT_BACKLOG_THRESHOLD_BYTES
}
fn default_true() -> bool {
    true
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            ping_interval_secs: default_ping_interval_secs(),
            ping_timeout_secs: default_ping_timeout_secs(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
        }
    }
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            max_frame_bytes: default_max_frame_bytes(),
            max_sends_per_sec: default_max_sends_per_sec(),
            backlog_threshold_bytes: default_backlog_threshold_bytes(),
            persist_rooms: default_true(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Reads and parses the config file at `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read and
/// [`ConfigError::Parse`] if the TOML is malformed.
pub fn load(path: &Path) -> Result<RelayFileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&content)
}

/// Parses config TOML from a string.
pub fn parse(content: &str) -> Result<RelayFileConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

impl RelayFileConfig {
    /// Validates the file values and converts them to a [`RelayConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] if `bind_address:port` is not
    /// a socket address, and [`ConfigError::InvalidKeepalive`] if the ping
    /// timeout does not exceed the ping interval.
    pub fn into_relay_config(self) -> Result<RelayConfig, ConfigError> {
        let addr = format!("{}:{}", self.server.bind_address, self.server.port);
        let bind_addr: SocketAddr = addr
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(addr.clone()))?;

        if self.server.ping_timeout_secs <= self.server.ping_interval_secs {
            return Err(ConfigError::InvalidKeepalive {
                interval: self.server.ping_interval_secs,
                timeout: self.server.ping_timeout_secs,
            });
        }

        Ok(RelayConfig {
            bind_addr,
            ping_interval: Duration::from_secs(self.server.ping_interval_secs),
            ping_timeout: Duration::from_secs(self.server.ping_timeout_secs),
            limits: DeliveryLimits {
                max_frame_bytes: self.relay.max_frame_bytes,
                max_sends_per_sec: self.relay.max_sends_per_sec,
                backlog_threshold_bytes: self.relay.backlog_threshold_bytes,
            },
            persist_rooms: self.relay.persist_rooms,
            outbound_queue_capacity: self.server.outbound_queue_capacity,
            auth: HostAuthConfig {
                default_secret: self.auth.host_secret,
                room_secrets: self.auth.rooms,
            },
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
