//! Relay configuration types.
//!
//! [`RelayConfig`] is the single source of truth for all runtime settings.
//! It is a plain struct with no environment reads of its own; the binary
//! fills it from the optional TOML file, environment variables, and CLI
//! flags, and tests build it directly from [`Default`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

/// Default TCP port of the WebSocket listener.
pub const DEFAULT_PORT: u16 = 8080;
/// Default WebSocket ping interval in seconds.
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 15;
/// Default silence, in seconds, after which a connection is considered dead.
pub const DEFAULT_PING_TIMEOUT_SECS: u64 = 45;
/// Default largest frame payload the relay forwards (12 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 12 * 1024 * 1024;
/// Default broadcast-path ceiling per room per second.
pub const DEFAULT_MAX_SENDS_PER_SEC: u32 = 45;
/// Default per-connection backlog threshold (512 KiB).
pub const DEFAULT_BACKLOG_THRESHOLD_BYTES: usize = 512 * 1024;
/// Default number of queued outbound messages per connection.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Thresholds the delivery engine applies to every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryLimits {
    /// Payloads larger than this are dropped before sequencing.
    pub max_frame_bytes: usize,
    /// Broadcast-path sends allowed per room in any trailing second.
    pub max_sends_per_sec: u32,
    /// A connection with more than this many bytes queued is backlogged.
    pub backlog_threshold_bytes: usize,
}

impl Default for DeliveryLimits {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            max_sends_per_sec: DEFAULT_MAX_SENDS_PER_SEC,
            backlog_threshold_bytes: DEFAULT_BACKLOG_THRESHOLD_BYTES,
        }
    }
}

/// Host secrets.  With neither field set, any host claim is accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostAuthConfig {
    /// Secret required for rooms without an entry in `room_secrets`.
    pub default_secret: Option<String>,
    /// Per-room secrets, keyed by room code.
    pub room_secrets: HashMap<String, String>,
}

/// All runtime configuration for the relay.
///
/// Build this once at startup and share it behind an `Arc`.
///
/// # Example
///
/// ```rust
/// use deskrelay_server::domain::RelayConfig;
///
/// let cfg = RelayConfig::default();
/// assert_eq!(cfg.bind_addr.port(), 8080);
/// assert!(cfg.persist_rooms);
/// ```
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: SocketAddr,

    /// How often the relay pings each connection.
    pub ping_interval: Duration,

    /// A connection that sends nothing (not even a pong) for this long is
    /// dropped.
    pub ping_timeout: Duration,

    pub limits: DeliveryLimits,

    /// Keep rooms alive after their last member leaves.
    pub persist_rooms: bool,

    /// Outbound messages buffered per connection before reliable sends fail.
    pub outbound_queue_capacity: usize,

    pub auth: HostAuthConfig,
}

impl Default for RelayConfig {
    /// | Field                   | Default        |
    /// |-------------------------|----------------|
    /// | bind_addr               | `0.0.0.0:8080` |
    /// | ping_interval           | 15 seconds     |
    /// | ping_timeout            | 45 seconds     |
    /// | limits.max_frame_bytes  | 12 MiB         |
    /// | limits.max_sends_per_sec| 45             |
    /// | limits.backlog_threshold| 512 KiB        |
    /// | persist_rooms           | `true`         |
    /// | outbound_queue_capacity | 256            |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            ping_interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECS),
            ping_timeout: Duration::from_secs(DEFAULT_PING_TIMEOUT_SECS),
            limits: DeliveryLimits::default(),
            persist_rooms: true,
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            auth: HostAuthConfig::default(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
