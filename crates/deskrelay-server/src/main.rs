//! DeskRelay relay server entry point.
//!
//! Accepts WebSocket connections from host agents and viewers, matches them
//! into rooms, fans out host frames to viewers, and routes viewer control
//! back to the host.
//!
//! # Usage
//!
//! ```text
//! deskrelay-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>                  Optional TOML configuration file
//!   --bind <ADDR>                    Listener IP address [default: 0.0.0.0]
//!   --port <PORT>                    Listener port [default: 8080]
//!   --ping-interval <SECS>           WebSocket ping interval [default: 15]
//!   --ping-timeout <SECS>            Silence before a connection is dropped [default: 45]
//!   --max-frame-bytes <BYTES>        Largest frame relayed [default: 12 MiB]
//!   --max-sends-per-sec <N>          Broadcast ceiling per room [default: 45]
//!   --backlog-threshold-bytes <N>    Per-connection backlog limit [default: 512 KiB]
//!   --ephemeral-rooms                Evict rooms once empty
//!   --host-secret <SECRET>           Secret required to host any room
//! ```
//!
//! # Precedence
//!
//! CLI flag, then environment variable, then config file, then built-in
//! default.
//!
//! | Variable                          | Flag                        |
//! |-----------------------------------|-----------------------------|
//! | `DESKRELAY_CONFIG`                | `--config`                  |
//! | `DESKRELAY_BIND`                  | `--bind`                    |
//! | `DESKRELAY_PORT`                  | `--port`                    |
//! | `DESKRELAY_PING_INTERVAL`         | `--ping-interval`           |
//! | `DESKRELAY_PING_TIMEOUT`          | `--ping-timeout`            |
//! | `DESKRELAY_MAX_FRAME_BYTES`       | `--max-frame-bytes`         |
//! | `DESKRELAY_MAX_SENDS_PER_SEC`     | `--max-sends-per-sec`       |
//! | `DESKRELAY_BACKLOG_THRESHOLD`     | `--backlog-threshold-bytes` |
//! | `DESKRELAY_EPHEMERAL_ROOMS`       | `--ephemeral-rooms`         |
//! | `DESKRELAY_HOST_SECRET`           | `--host-secret`             |
//!
//! Log verbosity is controlled by `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use deskrelay_server::domain::RelayConfig;
use deskrelay_server::infrastructure::config_file::{self, RelayFileConfig};
use deskrelay_server::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// DeskRelay relay server.
///
/// Every option is optional; unset options fall back to the config file and
/// then to the built-in defaults.
#[derive(Debug, Parser)]
#[command(
    name = "deskrelay-server",
    about = "Relay hub for DeskRelay remote-control sessions",
    version
)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, env = "DESKRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to bind the WebSocket listener to.
    #[arg(long, env = "DESKRELAY_BIND")]
    bind: Option<String>,

    /// TCP port for the WebSocket listener.
    #[arg(long, env = "DESKRELAY_PORT")]
    port: Option<u16>,

    /// Seconds between WebSocket pings to each connection.
    #[arg(long, env = "DESKRELAY_PING_INTERVAL")]
    ping_interval: Option<u64>,

    /// Seconds of silence after which a connection is dropped.
    #[arg(long, env = "DESKRELAY_PING_TIMEOUT")]
    ping_timeout: Option<u64>,

    /// Frames with a larger payload are dropped.
    #[arg(long, env = "DESKRELAY_MAX_FRAME_BYTES")]
    max_frame_bytes: Option<usize>,

    /// Broadcast-path sends allowed per room per second.
    #[arg(long, env = "DESKRELAY_MAX_SENDS_PER_SEC")]
    max_sends_per_sec: Option<u32>,

    /// Bytes queued for one connection before it counts as backlogged.
    #[arg(long, env = "DESKRELAY_BACKLOG_THRESHOLD")]
    backlog_threshold_bytes: Option<usize>,

    /// Evict rooms as soon as they have no host and no viewers.
    #[arg(long, env = "DESKRELAY_EPHEMERAL_ROOMS")]
    ephemeral_rooms: bool,

    /// Secret a host must present to claim any room.
    #[arg(long, env = "DESKRELAY_HOST_SECRET", hide_env_values = true)]
    host_secret: Option<String>,
}

impl Cli {
    /// Loads the config file (if any) and applies the CLI overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or the
    /// resulting values are invalid.
    fn into_relay_config(self) -> anyhow::Result<RelayConfig> {
        let mut file = match &self.config {
            Some(path) => config_file::load(path)
                .with_context(|| format!("loading config file {}", path.display()))?,
            None => RelayFileConfig::default(),
        };

        if let Some(bind) = self.bind {
            file.server.bind_address = bind;
        }
        if let Some(port) = self.port {
            file.server.port = port;
        }
        if let Some(secs) = self.ping_interval {
            file.server.ping_interval_secs = secs;
        }
        if let Some(secs) = self.ping_timeout {
            file.server.ping_timeout_secs = secs;
        }
        if let Some(bytes) = self.max_frame_bytes {
            file.relay.max_frame_bytes = bytes;
        }
        if let Some(n) = self.max_sends_per_sec {
            file.relay.max_sends_per_sec = n;
        }
        if let Some(bytes) = self.backlog_threshold_bytes {
            file.relay.backlog_threshold_bytes = bytes;
        }
        if self.ephemeral_rooms {
            file.relay.persist_rooms = false;
        }
        if self.host_secret.is_some() {
            file.auth.host_secret = self.host_secret;
        }

        Ok(file.into_relay_config()?)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_relay_config()?;

    info!(
        "DeskRelay server starting: bind={}, persist_rooms={}, max_sends_per_sec={}",
        config.bind_addr, config.persist_rooms, config.limits.max_sends_per_sec
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(config, running).await?;

    info!("DeskRelay server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
