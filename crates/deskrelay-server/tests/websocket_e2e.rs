//! End-to-end tests over real loopback WebSocket connections.
//!
//! Each test binds the relay to `127.0.0.1:0`, connects clients with
//! `tokio_tungstenite::connect_async`, and speaks the wire protocol exactly
//! as a host agent or browser viewer would.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use deskrelay_core::domain::room::lock_room;
use deskrelay_core::protocol::messages::{KeyAction, KeyControl};
use deskrelay_core::{
    decode_frame, encode_frame, ControlPayload, FrameKind, Role, ServerMessage,
};
use deskrelay_server::application::SessionManager;
use deskrelay_server::domain::RelayConfig;
use deskrelay_server::infrastructure::{build_session_manager, serve};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

struct TestRelay {
    addr: SocketAddr,
    relay: Arc<SessionManager>,
    running: Arc<AtomicBool>,
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

async fn start_relay(config: RelayConfig) -> TestRelay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let relay = Arc::new(build_session_manager(&config));
    let running = Arc::new(AtomicBool::new(true));
    tokio::spawn(serve(
        listener,
        Arc::clone(&relay),
        Arc::new(config),
        Arc::clone(&running),
    ));
    TestRelay {
        addr,
        relay,
        running,
    }
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
    ws
}

async fn send_json(ws: &mut Client, json: &str) {
    ws.send(Message::text(json.to_string())).await.unwrap();
}

/// Next non-control message from the relay.
async fn next_message(ws: &mut Client) -> Message {
    loop {
        let msg = timeout(STEP_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for relay")
            .expect("stream ended")
            .expect("websocket error");
        if !matches!(msg, Message::Ping(_) | Message::Pong(_)) {
            return msg;
        }
    }
}

async fn next_server_message(ws: &mut Client) -> ServerMessage {
    match next_message(ws).await {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected text, got {other:?}"),
    }
}

#[tokio::test]
async fn test_host_frame_reaches_viewer_and_control_reaches_host() {
    // Arrange
    let relay = start_relay(RelayConfig::default()).await;
    let mut host = connect(relay.addr).await;
    let mut viewer = connect(relay.addr).await;

    send_json(&mut host, r#"{"type":"join-as-host","room_code":"ABCD"}"#).await;
    let joined = next_server_message(&mut host).await;
    assert!(matches!(joined, ServerMessage::Joined { role: Role::Host, .. }));

    send_json(&mut viewer, r#"{"type":"join-as-viewer","room_code":"ABCD"}"#).await;
    let viewer_id = match next_server_message(&mut viewer).await {
        ServerMessage::Joined {
            role: Role::Viewer,
            connection_id,
            ..
        } => connection_id,
        other => panic!("expected Joined, got {other:?}"),
    };

    // Act: host publishes one frame
    let envelope = encode_frame(FrameKind::HostFrame, "ABCD", 0, 0, b"jpeg-bytes").unwrap();
    host.send(Message::binary(envelope)).await.unwrap();

    // Assert: viewer receives it stamped with sequence 1
    let frame = match next_message(&mut viewer).await {
        Message::Binary(data) => decode_frame(data).unwrap(),
        other => panic!("expected binary frame, got {other:?}"),
    };
    assert_eq!(frame.kind, FrameKind::ViewerFrame);
    assert_eq!(frame.sequence, 1);
    assert_eq!(frame.room_code, "ABCD");
    assert_eq!(&frame.payload[..], b"jpeg-bytes");

    // Act: viewer sends a key press
    send_json(
        &mut viewer,
        r#"{"type":"control","room_code":"ABCD","payload":{"type":"key","action":"down","key":"Enter"}}"#,
    )
    .await;

    // Assert: host receives it tagged with the viewer's id
    assert_eq!(
        next_server_message(&mut host).await,
        ServerMessage::ControlFromViewer {
            from_viewer: viewer_id,
            payload: ControlPayload::Key(KeyControl {
                action: KeyAction::Down,
                key: "Enter".to_string(),
                raw_key: None,
            }),
        }
    );
}

#[tokio::test]
async fn test_oversized_frame_is_dropped_and_host_stays_attached() {
    // Arrange
    let mut config = RelayConfig::default();
    config.limits.max_frame_bytes = 1024;
    let relay = start_relay(config).await;
    let mut host = connect(relay.addr).await;
    let mut viewer = connect(relay.addr).await;
    send_json(&mut host, r#"{"type":"join-as-host","room_code":"BIGF"}"#).await;
    next_server_message(&mut host).await;
    send_json(&mut viewer, r#"{"type":"join-as-viewer","room_code":"BIGF"}"#).await;
    next_server_message(&mut viewer).await;

    // Act: one frame over the relay maximum, then a normal one
    let oversized = encode_frame(FrameKind::HostFrame, "BIGF", 0, 0, &[7u8; 1500]).unwrap();
    host.send(Message::binary(oversized)).await.unwrap();
    let normal = encode_frame(FrameKind::HostFrame, "BIGF", 0, 0, b"small").unwrap();
    host.send(Message::binary(normal)).await.unwrap();

    // Assert: the viewer's next message is the normal frame, numbered first
    let frame = match next_message(&mut viewer).await {
        Message::Binary(data) => decode_frame(data).unwrap(),
        other => panic!("expected binary frame, got {other:?}"),
    };
    assert_eq!(frame.sequence, 1);
    assert_eq!(&frame.payload[..], b"small");

    let room = relay.relay.registry().get("BIGF").unwrap();
    assert!(lock_room(&room).host().is_some());
}

#[tokio::test]
async fn test_refused_request_gets_error_reply() {
    let relay = start_relay(RelayConfig::default()).await;
    let mut client = connect(relay.addr).await;

    send_json(
        &mut client,
        r#"{"type":"control","room_code":"ABCD","payload":{"type":"mouse","action":"click"}}"#,
    )
    .await;

    match next_server_message(&mut client).await {
        ServerMessage::Error { code, .. } => {
            assert_eq!(code, deskrelay_core::protocol::messages::ErrorCode::NotInRoom)
        }
        other => panic!("expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_json_does_not_close_session() {
    let relay = start_relay(RelayConfig::default()).await;
    let mut client = connect(relay.addr).await;

    send_json(&mut client, "{not json").await;
    send_json(&mut client, r#"{"type":"create-room"}"#).await;

    assert!(matches!(
        next_server_message(&mut client).await,
        ServerMessage::RoomCreated { .. }
    ));
}

#[tokio::test]
async fn test_closed_viewer_is_removed_from_room() {
    let relay = start_relay(RelayConfig::default()).await;
    let mut viewer = connect(relay.addr).await;
    send_json(&mut viewer, r#"{"type":"join-as-viewer","room_code":"GONE"}"#).await;
    next_server_message(&mut viewer).await;

    viewer.close(None).await.unwrap();

    wait_until(|| viewer_count(&relay.relay, "GONE") == 0).await;
}

#[tokio::test]
async fn test_silent_connection_is_dropped_after_ping_timeout() {
    // Arrange: pings are far apart, so the client stays completely silent
    let config = RelayConfig {
        ping_interval: Duration::from_secs(60),
        ping_timeout: Duration::from_millis(300),
        ..RelayConfig::default()
    };
    let relay = start_relay(config).await;
    let mut viewer = connect(relay.addr).await;
    send_json(&mut viewer, r#"{"type":"join-as-viewer","room_code":"IDLE"}"#).await;
    next_server_message(&mut viewer).await;
    assert_eq!(viewer_count(&relay.relay, "IDLE"), 1);

    // Act / Assert: the relay gives up on the connection on its own
    wait_until(|| viewer_count(&relay.relay, "IDLE") == 0).await;
}

fn viewer_count(relay: &SessionManager, room: &str) -> usize {
    relay
        .registry()
        .get(room)
        .map(|r| lock_room(&r).viewer_count())
        .unwrap_or(0)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
