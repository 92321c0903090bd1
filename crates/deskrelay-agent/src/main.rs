//! DeskRelay host agent: entry point.
//!
//! Connects to a relay as the host of one room and applies the control
//! intents viewers send.  Without a platform injector linked in, the agent
//! runs with the recording injector and only logs what it would inject.
//!
//! # Usage
//!
//! ```text
//! deskrelay-agent --room <CODE> [OPTIONS]
//!
//! Options:
//!   --server <URL>                  Relay URL [default: ws://127.0.0.1:8080]
//!   --room <CODE>                   Room to host
//!   --secret <SECRET>               Host secret for the room
//!   --mouse-min-interval-ms <MS>    Minimum gap between injected moves [default: 6]
//!   --reconnect-base-ms <MS>        First reconnect delay [default: 500]
//!   --reconnect-max-ms <MS>         Reconnect delay ceiling [default: 10000]
//!   --reconnect-jitter-ms <MS>      Random extra delay per attempt [default: 250]
//! ```
//!
//! `--server`, `--room` and `--secret` may also be given as `SERVER_URL`,
//! `ROOM_CODE` and `AGENT_SECRET`.  Log verbosity is controlled by
//! `RUST_LOG` (default `info`).

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use deskrelay_agent::application::{ApplyControlUseCase, InputInjector};
use deskrelay_agent::infrastructure::input_injection::MockInputInjector;
use deskrelay_agent::infrastructure::network::{
    AgentConnection, AgentConnectionConfig, NetworkEvent,
};
use deskrelay_core::BackoffConfig;

/// DeskRelay host agent.
#[derive(Debug, Parser)]
#[command(
    name = "deskrelay-agent",
    about = "Hosts a DeskRelay room and applies viewer control",
    version
)]
struct Cli {
    /// WebSocket URL of the relay.
    #[arg(long, env = "SERVER_URL", default_value = "ws://127.0.0.1:8080")]
    server: String,

    /// Room code to host.
    #[arg(long, env = "ROOM_CODE")]
    room: String,

    /// Host secret for the room.
    #[arg(long, env = "AGENT_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Minimum milliseconds between two injected pointer moves.
    #[arg(long, default_value_t = 6)]
    mouse_min_interval_ms: u64,

    #[arg(long, default_value_t = 500)]
    reconnect_base_ms: u64,

    #[arg(long, default_value_t = 10_000)]
    reconnect_max_ms: u64,

    #[arg(long, default_value_t = 250)]
    reconnect_jitter_ms: u64,
}

impl Cli {
    fn connection_config(&self) -> AgentConnectionConfig {
        AgentConnectionConfig {
            server_url: self.server.clone(),
            room_code: self.room.clone(),
            secret: self.secret.clone(),
            backoff: BackoffConfig {
                base: Duration::from_millis(self.reconnect_base_ms),
                max: Duration::from_millis(self.reconnect_max_ms),
                jitter: Duration::from_millis(self.reconnect_jitter_ms),
            },
        }
    }

    fn mouse_min_interval(&self) -> Duration {
        Duration::from_millis(self.mouse_min_interval_ms)
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

    let cli = Cli::parse();
    info!(
        "DeskRelay agent starting: server={}, room={}",
        cli.server, cli.room
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => tracing::error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    let injector: Arc<dyn InputInjector> = Arc::new(MockInputInjector::new());
    let mut use_case = ApplyControlUseCase::new(injector, cli.mouse_min_interval());

    let connection = Arc::new(AgentConnection::new(cli.connection_config()));
    let mut events = Arc::clone(&connection).start(Arc::clone(&running)).await;

    let mut poll = tokio::time::interval(Duration::from_millis(200));
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = poll.tick() => {
                if running.load(Ordering::Relaxed) {
                    continue;
                }
                break;
            }
        };
        let Some(event) = event else {
            break;
        };
        match event {
            NetworkEvent::Control {
                from_viewer,
                payload,
            } => {
                if let Some(echo) = ApplyControlUseCase::cursor_echo(&payload) {
                    if let Err(e) = connection.send_cursor(echo) {
                        debug!("cursor echo dropped: {e}");
                    }
                }
                match use_case.apply(&payload) {
                    Ok(outcome) => debug!("control from {from_viewer}: {outcome:?}"),
                    Err(e) => debug!("control from {from_viewer} not applied: {e}"),
                }
            }
            NetworkEvent::KeyframeRequested { from_viewer } => {
                info!("keyframe requested by {from_viewer}; no frame source attached");
            }
            NetworkEvent::Connected => info!("relay connection established"),
            NetworkEvent::Joined { .. } => {}
            NetworkEvent::Refused { .. } => {}
            NetworkEvent::Disconnected => info!("relay connection lost"),
        }
    }

    info!("DeskRelay agent stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
