//! WebSocket server: accept loop and per-connection tasks.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Upgrading each accepted connection to a WebSocket session.
//! 3. Registering the session with the [`SessionManager`] behind a
//!    [`WsTransport`], and spawning the writer task that drains it.
//! 4. Reading client messages: JSON text goes to
//!    [`SessionManager::handle_message`], binary frame envelopes go to
//!    [`SessionManager::handle_frame`].
//! 5. Dropping connections that stay silent for longer than `ping_timeout`.
//! 6. Stopping the accept loop when the `running` flag is cleared.
//!
//! Every connection runs in its own Tokio task, so one slow client never
//! blocks another.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_async_with_config,
    tungstenite::{protocol::WebSocketConfig, Error as WsError, Message as WsMessage},
};
use tracing::{debug, error, info, warn};

use deskrelay_core::protocol::codec::FRAME_HEADER_SIZE;
use deskrelay_core::{decode_frame, ClientMessage, ConnectionId, RoomRegistry, ServerMessage};

use crate::application::session::MAX_ROOM_CODE_LEN;
use crate::application::{
    DeliveryMode, Outbound, SecretAuthenticator, SessionManager, Transport,
};
use crate::domain::config::{DeliveryLimits, RelayConfig};
use crate::infrastructure::transport::{run_writer, WsTransport};

/// How long a finished session waits for its writer to flush and close.
const WRITER_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

// ── Public API ────────────────────────────────────────────────────────────────

/// Largest WebSocket message (and frame) a session will read.
///
/// Envelopes whose payload is over `max_frame_bytes` but within twice that
/// still reach the delivery engine, which drops them and keeps the host
/// attached.  Anything larger breaks the session.
pub fn transport_message_limit(limits: &DeliveryLimits) -> usize {
    limits
        .max_frame_bytes
        .saturating_mul(2)
        .saturating_add(FRAME_HEADER_SIZE + MAX_ROOM_CODE_LEN)
}

/// Read limits applied to every accepted session.
pub fn websocket_config(limits: &DeliveryLimits) -> WebSocketConfig {
    let limit = transport_message_limit(limits);
    WebSocketConfig::default()
        .max_message_size(Some(limit))
        .max_frame_size(Some(limit))
}

/// Builds the relay core described by `config`.
pub fn build_session_manager(config: &RelayConfig) -> SessionManager {
    let registry = Arc::new(RoomRegistry::new(
        config.persist_rooms,
        config.limits.max_sends_per_sec,
    ));
    let auth = Arc::new(SecretAuthenticator::new(&config.auth));
    SessionManager::new(registry, auth, config.limits)
}

/// Binds `config.bind_addr` and serves until `running` is set to `false`.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound.
pub async fn run_server(config: RelayConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {}", config.bind_addr))?;

    info!("relay listening on {}", config.bind_addr);

    let relay = Arc::new(build_session_manager(&config));
    serve(listener, relay, Arc::new(config), running).await;
    Ok(())
}

/// Runs the accept loop on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    relay: Arc<SessionManager>,
    config: Arc<RelayConfig>,
    running: Arc<AtomicBool>,
) {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // Short timeout so the shutdown flag is checked even when idle.
        let accept_result = timeout(Duration::from_millis(200), listener.accept()).await;

        match accept_result {
            Ok(Ok((stream, peer_addr))) => {
                debug!("new connection from {peer_addr}");
                let relay = Arc::clone(&relay);
                let cfg = Arc::clone(&config);
                tokio::spawn(async move {
                    handle_session(stream, peer_addr, relay, cfg).await;
                });
            }
            Ok(Err(e)) => {
                error!("accept error: {e}");
            }
            Err(_) => {}
        }
    }
}

// ── Per-session handler ───────────────────────────────────────────────────────

async fn handle_session(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    relay: Arc<SessionManager>,
    config: Arc<RelayConfig>,
) {
    match run_session(raw_stream, peer_addr, relay, config).await {
        Ok(()) => debug!("session {peer_addr} closed"),
        Err(e) => warn!("session {peer_addr} closed with error: {e:#}"),
    }
}

async fn run_session(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    relay: Arc<SessionManager>,
    config: Arc<RelayConfig>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async_with_config(raw_stream, Some(websocket_config(&config.limits)))
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    let (ws_tx, mut ws_rx) = ws_stream.split();

    let (transport, queue) = WsTransport::channel(
        config.outbound_queue_capacity,
        config.limits.backlog_threshold_bytes,
    );
    let transport: Arc<dyn Transport> = Arc::new(transport);
    let id = relay.connect(Arc::clone(&transport));
    info!("session {id} established from {peer_addr}");

    let writer = tokio::spawn(run_writer(
        queue,
        ws_tx,
        config.ping_interval,
        id.to_string(),
    ));

    read_loop(&relay, id, transport.as_ref(), &mut ws_rx, config.ping_timeout).await;

    // Releases membership before anything else can observe this connection.
    relay.disconnect(id);

    // The table no longer holds the transport; dropping ours closes the
    // queue so the writer can flush and close the socket.
    drop(transport);
    if timeout(WRITER_SHUTDOWN_GRACE, writer).await.is_err() {
        debug!("session {id}: writer did not finish in time");
    }
    Ok(())
}

async fn read_loop<S>(
    relay: &SessionManager,
    id: ConnectionId,
    transport: &dyn Transport,
    ws_rx: &mut S,
    ping_timeout: Duration,
) where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    loop {
        let next = match timeout(ping_timeout, ws_rx.next()).await {
            Ok(next) => next,
            Err(_) => {
                warn!("session {id}: nothing received for {ping_timeout:?}; dropping");
                break;
            }
        };

        let ws_msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(WsError::ConnectionClosed | WsError::Protocol(_))) => {
                debug!("session {id}: WebSocket closed");
                break;
            }
            Some(Err(e)) => {
                warn!("session {id}: WebSocket error: {e}");
                break;
            }
            None => {
                debug!("session {id}: stream ended");
                break;
            }
        };

        match ws_msg {
            WsMessage::Text(text) => handle_text(relay, id, transport, text.as_str()),
            WsMessage::Binary(data) => handle_binary(relay, id, data),
            WsMessage::Ping(_) | WsMessage::Pong(_) => {
                // Replies to pings are queued by tungstenite itself; either
                // way the peer is alive and the timeout has been reset.
            }
            WsMessage::Close(_) => {
                debug!("session {id}: Close frame received");
                break;
            }
            WsMessage::Frame(_) => {
                debug!("session {id}: raw frame (ignored)");
            }
        }
    }
}

fn handle_text(relay: &SessionManager, id: ConnectionId, transport: &dyn Transport, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            // One bad message does not end the session.
            warn!("session {id}: invalid JSON: {e}");
            return;
        }
    };

    let message_type = message.type_name();
    match relay.handle_message(id, message) {
        Ok(Some(reply)) => reply_to(id, transport, &reply),
        Ok(None) => {}
        Err(e) => {
            debug!("session {id}: {message_type} refused: {e}");
            reply_to(id, transport, &e.to_server_message());
        }
    }
}

fn handle_binary(relay: &SessionManager, id: ConnectionId, data: Bytes) {
    let frame = match decode_frame(data) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("session {id}: malformed frame envelope: {e}");
            return;
        }
    };
    match relay.handle_frame(id, frame) {
        Ok(outcome) => debug!("session {id}: frame {outcome:?}"),
        Err(e) => debug!("session {id}: frame refused: {e}"),
    }
}

fn reply_to(id: ConnectionId, transport: &dyn Transport, message: &ServerMessage) {
    let outbound = match Outbound::json(message) {
        Ok(outbound) => outbound,
        Err(e) => {
            error!("session {id}: JSON serialization error: {e}");
            return;
        }
    };
    if let Err(e) = transport.send(outbound, DeliveryMode::Reliable) {
        debug!("session {id}: reply dropped: {e}");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
