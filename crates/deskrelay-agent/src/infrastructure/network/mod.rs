//! Network infrastructure for the host agent.
//!
//! Maintains the WebSocket connection to the relay and dispatches inbound
//! relay messages to the application layer.
//!
//! Architecture:
//! - `AgentConnection` runs a reconnect loop with jittered exponential
//!   backoff, re-registering as host on every successful connect.
//! - Inbound messages meant for hosts are forwarded as [`NetworkEvent`]s on
//!   an `mpsc` channel.
//! - Outbound frames and cursor echoes go through a bounded queue; when it
//!   is full the message is dropped rather than delaying the caller.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use deskrelay_core::protocol::codec::encode_frame_now;
use deskrelay_core::protocol::messages::ErrorCode;
use deskrelay_core::{
    BackoffConfig, ClientMessage, ControlPayload, FrameKind, ProtocolError, ReconnectBackoff,
    ServerMessage,
};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

use crate::application::CursorEcho;

/// Messages waiting to be written to the relay.
const OUTBOUND_CAPACITY: usize = 64;

/// How often an idle connection checks the shutdown flag.
const RUNNING_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Errors that can occur in the agent network layer.
#[derive(Debug, Error)]
pub enum AgentNetworkError {
    /// The WebSocket handshake with the relay failed.
    #[error("failed to connect to relay at {url}: {source}")]
    ConnectFailed {
        url: String,
        #[source]
        source: WsError,
    },
    /// An error on the established connection.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),
    #[error("frame encoding failed: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("message encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not connected to the relay")]
    NotConnected,
    /// The outbound queue is full; the message was dropped.
    #[error("outbound queue full")]
    QueueFull,
}

/// Configuration for the agent's relay connection.
#[derive(Clone)]
pub struct AgentConnectionConfig {
    /// `ws://` URL of the relay.
    pub server_url: String,
    /// Room this agent hosts.
    pub room_code: String,
    /// Host secret presented on every join.
    pub secret: Option<String>,
    pub backoff: BackoffConfig,
}

impl fmt::Debug for AgentConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConnectionConfig")
            .field("server_url", &self.server_url)
            .field("room_code", &self.room_code)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("backoff", &self.backoff)
            .finish()
    }
}

/// Events emitted by the network layer to the application layer.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    /// The WebSocket connection was established and the host claim sent.
    Connected,
    /// The relay accepted the host claim.
    Joined { connection_id: String },
    /// The relay refused a request (most often the host claim).
    Refused { code: ErrorCode, message: String },
    /// A viewer's control intent.
    Control {
        from_viewer: String,
        payload: ControlPayload,
    },
    /// A viewer asked for an independently decodable frame.
    KeyframeRequested { from_viewer: String },
    /// An established connection was lost.
    Disconnected,
}

/// The host agent's connection to the relay.
pub struct AgentConnection {
    config: AgentConnectionConfig,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
}

impl AgentConnection {
    /// Creates a new (not yet connected) `AgentConnection`.
    pub fn new(config: AgentConnectionConfig) -> Self {
        Self {
            config,
            outbound: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AgentConnectionConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.lock_outbound().is_some()
    }

    /// Starts the reconnect loop and returns the event receiver.
    ///
    /// The loop runs until `running` is cleared or the receiver is dropped.
    pub async fn start(self: Arc<Self>, running: Arc<AtomicBool>) -> mpsc::Receiver<NetworkEvent> {
        let (tx, rx) = mpsc::channel(128);
        let this = Arc::clone(&self);

        tokio::spawn(async move {
            let mut backoff = ReconnectBackoff::new(this.config.backoff);

            while running.load(Ordering::Relaxed) && !tx.is_closed() {
                match this.run_connection(&tx, &running, &mut backoff).await {
                    Ok(()) => info!("disconnected from relay"),
                    Err(e) => warn!("relay connection failed: {e}"),
                }

                if !running.load(Ordering::Relaxed) {
                    break;
                }
                let delay = backoff.next_delay();
                info!(
                    "reconnecting to {} in {delay:?} (attempt {})",
                    this.config.server_url,
                    backoff.attempt()
                );
                if !sleep_while_running(delay, &running).await {
                    break;
                }
            }
            debug!("agent connection loop stopped");
        });

        rx
    }

    /// Queues one encoded frame for the room's viewers.
    ///
    /// The relay stamps the sequence number, so the envelope carries 0.
    ///
    /// # Errors
    ///
    /// [`AgentNetworkError::NotConnected`] between connections and
    /// [`AgentNetworkError::QueueFull`] when the relay link is congested.
    /// Either way the frame is dropped and the next one may be sent.
    pub fn send_frame(&self, payload: &[u8]) -> Result<(), AgentNetworkError> {
        let envelope = encode_frame_now(FrameKind::HostFrame, &self.config.room_code, 0, payload)?;
        self.enqueue(Message::binary(envelope))
    }

    /// Queues a cursor echo for the room's viewers.
    pub fn send_cursor(&self, echo: CursorEcho) -> Result<(), AgentNetworkError> {
        let msg = ClientMessage::HostCursor {
            room_code: self.config.room_code.clone(),
            x_norm: echo.x_norm,
            y_norm: echo.y_norm,
        };
        self.enqueue(Message::text(serde_json::to_string(&msg)?))
    }

    fn enqueue(&self, msg: Message) -> Result<(), AgentNetworkError> {
        let guard = self.lock_outbound();
        let sender = guard.as_ref().ok_or(AgentNetworkError::NotConnected)?;
        sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => AgentNetworkError::QueueFull,
            TrySendError::Closed(_) => AgentNetworkError::NotConnected,
        })
    }

    /// Connects once, claims the room, and pumps messages until the
    /// connection ends.
    async fn run_connection(
        &self,
        tx: &mpsc::Sender<NetworkEvent>,
        running: &AtomicBool,
        backoff: &mut ReconnectBackoff,
    ) -> Result<(), AgentNetworkError> {
        let url = self.config.server_url.as_str();
        let (ws, _) = connect_async(url)
            .await
            .map_err(|source| AgentNetworkError::ConnectFailed {
                url: url.to_string(),
                source,
            })?;
        info!("connected to relay at {url}");
        backoff.reset();

        let (mut sink, mut stream) = ws.split();

        let join = ClientMessage::JoinAsHost {
            room_code: self.config.room_code.clone(),
            secret: self.config.secret.clone(),
        };
        sink.send(Message::text(serde_json::to_string(&join)?))
            .await?;

        let (out_tx, mut out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        *self.lock_outbound() = Some(out_tx);
        let _ = tx.send(NetworkEvent::Connected).await;

        let mut poll = tokio::time::interval(RUNNING_POLL_INTERVAL);
        let result = loop {
            tokio::select! {
                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = parse_server_text(text.as_str()) {
                            if tx.send(event).await.is_err() {
                                break Ok(());
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    // Binary, ping and pong; tungstenite answers pings itself.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(e.into()),
                },
                Some(msg) = out_rx.recv() => {
                    if let Err(e) = sink.send(msg).await {
                        break Err(e.into());
                    }
                }
                _ = poll.tick() => {
                    if !running.load(Ordering::Relaxed) {
                        let _ = sink.close().await;
                        break Ok(());
                    }
                }
            }
        };

        *self.lock_outbound() = None;
        let _ = tx.send(NetworkEvent::Disconnected).await;
        result
    }

    fn lock_outbound(&self) -> MutexGuard<'_, Option<mpsc::Sender<Message>>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sleeps for `delay`, waking early once `running` is cleared.
///
/// Returns `false` if the sleep was cut short by shutdown.
async fn sleep_while_running(delay: Duration, running: &AtomicBool) -> bool {
    let deadline = tokio::time::Instant::now() + delay;
    while running.load(Ordering::Relaxed) {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return true;
        }
        tokio::time::sleep((deadline - now).min(RUNNING_POLL_INTERVAL)).await;
    }
    false
}

/// Maps one relay text message to the event a host cares about.
///
/// Refusals are logged here at `error`; messages addressed to viewers are
/// ignored.
pub fn parse_server_text(text: &str) -> Option<NetworkEvent> {
    let msg = match serde_json::from_str::<ServerMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("failed to decode relay message: {e}");
            return None;
        }
    };

    match msg {
        ServerMessage::Joined {
            room_code,
            connection_id,
            ..
        } => {
            info!("hosting room {room_code} as {connection_id}");
            Some(NetworkEvent::Joined { connection_id })
        }
        ServerMessage::Error { code, message } => {
            error!("relay refused request ({code:?}): {message}");
            Some(NetworkEvent::Refused { code, message })
        }
        ServerMessage::ControlFromViewer {
            from_viewer,
            payload,
        } => Some(NetworkEvent::Control {
            from_viewer,
            payload,
        }),
        ServerMessage::RequestKeyframe { from_viewer } => {
            Some(NetworkEvent::KeyframeRequested { from_viewer })
        }
        _ => {
            debug!("ignoring relay message not addressed to hosts");
            None
        }
    }
}
