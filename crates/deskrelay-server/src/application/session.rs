//! Session manager: the per-connection state machine.
//!
//! Every connection starts `Unassigned`, joins exactly one room as host or
//! viewer, and ends `Detached`.  All protocol messages enter the relay core
//! through [`SessionManager::handle_message`] or
//! [`SessionManager::handle_frame`], which check role and room membership
//! before handing work to the [`DeliveryEngine`].
//!
//! A connection that closes without leaving is cleaned up by
//! [`SessionManager::disconnect`], which releases its membership before
//! returning.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use deskrelay_core::domain::room::lock_room;
use deskrelay_core::protocol::messages::ErrorCode;
use deskrelay_core::{
    ClientMessage, ConnectionId, ControlPayload, FrameEnvelope, FrameKind, Role, RoomRegistry,
    ServerMessage,
};

use crate::application::auth::{Authenticator, HostCredentials};
use crate::application::connections::{ConnectionEntry, ConnectionTable, SessionState};
use crate::application::delivery::{DeliveryEngine, FrameOutcome};
use crate::application::transport::Transport;
use crate::domain::config::DeliveryLimits;

/// Longest room code a client may name.
pub const MAX_ROOM_CODE_LEN: usize = 64;

/// `create-room` requests honoured per connection.
pub const MAX_ROOMS_CREATED_PER_CONNECTION: u32 = 16;

/// Reasons a client request is refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("host authentication failed for room {room_code}")]
    AuthenticationFailed { room_code: String },

    #[error("connection already joined room {room_code}")]
    AlreadyJoined { room_code: String },

    #[error("connection has left its room")]
    Detached,

    #[error("not a member of room {room_code}")]
    NotInRoom { room_code: String },

    #[error("operation requires the {expected:?} role")]
    WrongRole { expected: Role },

    #[error("another host has taken over room {room_code}")]
    Displaced { room_code: String },

    #[error("invalid room code")]
    InvalidRoomCode,

    #[error("unexpected frame kind {0:?}")]
    UnexpectedFrameKind(FrameKind),

    #[error("room creation limit of {limit} reached for this connection")]
    TooManyRooms { limit: u32 },
}

impl SessionError {
    /// The wire code reported to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::AuthenticationFailed { .. } => ErrorCode::AuthFailed,
            SessionError::AlreadyJoined { .. } => ErrorCode::AlreadyJoined,
            SessionError::Detached | SessionError::UnknownConnection(_) => ErrorCode::Detached,
            SessionError::NotInRoom { .. } => ErrorCode::NotInRoom,
            SessionError::WrongRole { .. } | SessionError::Displaced { .. } => {
                ErrorCode::WrongRole
            }
            SessionError::InvalidRoomCode
            | SessionError::UnexpectedFrameKind(_)
            | SessionError::TooManyRooms { .. } => ErrorCode::BadRequest,
        }
    }

    /// The error reply sent back to the client.
    pub fn to_server_message(&self) -> ServerMessage {
        ServerMessage::Error {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// Owns the connection table and drives every session transition.
pub struct SessionManager {
    registry: Arc<RoomRegistry>,
    connections: Arc<ConnectionTable>,
    delivery: DeliveryEngine,
    auth: Arc<dyn Authenticator>,
}

impl SessionManager {
    pub fn new(
        registry: Arc<RoomRegistry>,
        auth: Arc<dyn Authenticator>,
        limits: DeliveryLimits,
    ) -> Self {
        let connections = Arc::new(ConnectionTable::new());
        let delivery = DeliveryEngine::new(Arc::clone(&registry), Arc::clone(&connections), limits);
        Self {
            registry,
            connections,
            delivery,
            auth,
        }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn connections(&self) -> &Arc<ConnectionTable> {
        &self.connections
    }

    pub fn delivery(&self) -> &DeliveryEngine {
        &self.delivery
    }

    /// Registers a new connection in the `Unassigned` state.
    pub fn connect(&self, transport: Arc<dyn Transport>) -> ConnectionId {
        let id = self.connections.insert(transport).id();
        debug!("connection {id} registered");
        id
    }

    /// Current state of a connection, or `None` once it has disconnected.
    pub fn state_of(&self, id: ConnectionId) -> Option<SessionState> {
        self.connections.get(id).map(|entry| entry.state())
    }

    /// Applies one client message.
    ///
    /// Returns the reply to send back to the same connection, if any.
    /// Errors are meant to be reported to the client with
    /// [`SessionError::to_server_message`].
    pub fn handle_message(
        &self,
        id: ConnectionId,
        message: ClientMessage,
    ) -> Result<Option<ServerMessage>, SessionError> {
        let entry = self
            .connections
            .get(id)
            .ok_or(SessionError::UnknownConnection(id))?;
        debug!("connection {id}: {}", message.type_name());

        match message {
            ClientMessage::JoinAsHost { room_code, secret } => {
                self.join_as_host(&entry, room_code, secret).map(Some)
            }
            ClientMessage::JoinAsViewer { room_code } => {
                self.join_as_viewer(&entry, room_code).map(Some)
            }
            ClientMessage::CreateRoom => self.create_room(&entry).map(Some),
            ClientMessage::LeaveRoom { room_code } => self.leave_room(&entry, &room_code).map(Some),
            ClientMessage::Control { room_code, payload } => {
                self.control(&entry, &room_code, payload).map(|()| None)
            }
            ClientMessage::RequestKeyframe { room_code } => {
                self.require_viewer(&entry, &room_code)?;
                self.delivery.relay_keyframe_request(&room_code, id);
                Ok(None)
            }
            ClientMessage::HostCursor {
                room_code,
                x_norm,
                y_norm,
            } => {
                self.require_current_host(&entry, &room_code)?;
                self.delivery.relay_host_cursor(&room_code, x_norm, y_norm);
                Ok(None)
            }
        }
    }

    /// Relays one binary frame sent by a connection.
    ///
    /// Only the current host of the frame's room may publish.
    pub fn handle_frame(
        &self,
        id: ConnectionId,
        frame: FrameEnvelope,
    ) -> Result<FrameOutcome, SessionError> {
        let entry = self
            .connections
            .get(id)
            .ok_or(SessionError::UnknownConnection(id))?;
        if frame.kind != FrameKind::HostFrame {
            return Err(SessionError::UnexpectedFrameKind(frame.kind));
        }
        self.require_current_host(&entry, &frame.room_code)?;
        Ok(self.delivery.relay_frame(&frame.room_code, frame.payload))
    }

    /// Removes a closed connection and releases its room membership.
    ///
    /// Safe to call more than once.
    pub fn disconnect(&self, id: ConnectionId) {
        let Some(entry) = self.connections.remove(id) else {
            return;
        };
        let previous = std::mem::replace(&mut *entry.lock_state(), SessionState::Detached);
        match previous {
            SessionState::Host { room_code } => {
                self.release_host(id, &room_code);
                info!("host {id} disconnected from room {room_code}");
            }
            SessionState::Viewer { room_code } => {
                self.registry.remove_viewer(&room_code, id);
                info!("viewer {id} disconnected from room {room_code}");
            }
            SessionState::Unassigned | SessionState::Detached => {
                debug!("connection {id} closed");
            }
        }
    }

    // ── Transitions ───────────────────────────────────────────────────────────

    fn join_as_host(
        &self,
        entry: &ConnectionEntry,
        room_code: String,
        secret: Option<String>,
    ) -> Result<ServerMessage, SessionError> {
        validate_room_code(&room_code)?;
        let id = entry.id();
        {
            let mut state = entry.lock_state();
            ensure_unassigned(&state)?;

            let credentials = HostCredentials {
                room_code: room_code.clone(),
                secret,
            };
            if !self.auth.authenticate(&credentials) {
                warn!("connection {id}: host authentication failed for room {room_code}");
                return Err(SessionError::AuthenticationFailed { room_code });
            }

            *state = SessionState::Host {
                room_code: room_code.clone(),
            };
            match self.registry.attach_host(&room_code, id) {
                Some(previous) => {
                    info!("room {room_code}: host {previous} displaced by {id}")
                }
                None => info!("room {room_code}: host {id} attached"),
            }
        }
        self.delivery.notify_host_status(&room_code, true);

        Ok(ServerMessage::Joined {
            room_code,
            role: Role::Host,
            connection_id: id.to_string(),
        })
    }

    fn join_as_viewer(
        &self,
        entry: &ConnectionEntry,
        room_code: String,
    ) -> Result<ServerMessage, SessionError> {
        validate_room_code(&room_code)?;
        let id = entry.id();
        {
            let mut state = entry.lock_state();
            ensure_unassigned(&state)?;
            *state = SessionState::Viewer {
                room_code: room_code.clone(),
            };
            self.registry.add_viewer(&room_code, id);
        }
        info!("room {room_code}: viewer {id} joined");

        Ok(ServerMessage::Joined {
            room_code,
            role: Role::Viewer,
            connection_id: id.to_string(),
        })
    }

    fn create_room(&self, entry: &ConnectionEntry) -> Result<ServerMessage, SessionError> {
        if entry.state() == SessionState::Detached {
            return Err(SessionError::Detached);
        }
        if !entry.try_claim_room_creation(MAX_ROOMS_CREATED_PER_CONNECTION) {
            warn!("connection {}: room creation limit reached", entry.id());
            return Err(SessionError::TooManyRooms {
                limit: MAX_ROOMS_CREATED_PER_CONNECTION,
            });
        }
        let room_code = self.registry.allocate_code();
        info!("room {room_code} created for connection {}", entry.id());
        Ok(ServerMessage::RoomCreated { room_code })
    }

    fn leave_room(
        &self,
        entry: &ConnectionEntry,
        room_code: &str,
    ) -> Result<ServerMessage, SessionError> {
        let id = entry.id();
        let previous = {
            let mut state = entry.lock_state();
            match &*state {
                SessionState::Detached => return Err(SessionError::Detached),
                current if current.room_code() != Some(room_code) => {
                    return Err(SessionError::NotInRoom {
                        room_code: room_code.to_string(),
                    })
                }
                _ => {}
            }
            std::mem::replace(&mut *state, SessionState::Detached)
        };

        match previous {
            SessionState::Host { .. } => self.release_host(id, room_code),
            SessionState::Viewer { .. } => {
                self.registry.remove_viewer(room_code, id);
            }
            SessionState::Unassigned | SessionState::Detached => {}
        }
        info!("connection {id} left room {room_code}");

        Ok(ServerMessage::Left {
            room_code: room_code.to_string(),
        })
    }

    fn control(
        &self,
        entry: &ConnectionEntry,
        room_code: &str,
        payload: ControlPayload,
    ) -> Result<(), SessionError> {
        self.require_viewer(entry, room_code)?;
        self.delivery.relay_control(room_code, entry.id(), payload);
        Ok(())
    }

    // ── Guards ────────────────────────────────────────────────────────────────

    fn require_viewer(&self, entry: &ConnectionEntry, room_code: &str) -> Result<(), SessionError> {
        match entry.state() {
            SessionState::Viewer { room_code: joined } if joined == room_code => Ok(()),
            SessionState::Viewer { .. } => Err(SessionError::NotInRoom {
                room_code: room_code.to_string(),
            }),
            SessionState::Detached => Err(SessionError::Detached),
            SessionState::Host { .. } => Err(SessionError::WrongRole {
                expected: Role::Viewer,
            }),
            SessionState::Unassigned => Err(SessionError::NotInRoom {
                room_code: room_code.to_string(),
            }),
        }
    }

    /// The connection must hold the host role of `room_code` and must not
    /// have been displaced by a newer host.
    fn require_current_host(
        &self,
        entry: &ConnectionEntry,
        room_code: &str,
    ) -> Result<(), SessionError> {
        match entry.state() {
            SessionState::Host { room_code: joined } if joined == room_code => {}
            SessionState::Host { .. } | SessionState::Unassigned => {
                return Err(SessionError::NotInRoom {
                    room_code: room_code.to_string(),
                })
            }
            SessionState::Detached => return Err(SessionError::Detached),
            SessionState::Viewer { .. } => {
                return Err(SessionError::WrongRole {
                    expected: Role::Host,
                })
            }
        }
        let current = self
            .registry
            .get(room_code)
            .and_then(|room| lock_room(&room).host());
        if current == Some(entry.id()) {
            Ok(())
        } else {
            Err(SessionError::Displaced {
                room_code: room_code.to_string(),
            })
        }
    }

    fn release_host(&self, id: ConnectionId, room_code: &str) {
        if self.registry.detach_host_if_matches(room_code, id) {
            self.delivery.notify_host_status(room_code, false);
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("rooms", &self.registry.room_count())
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

fn ensure_unassigned(state: &SessionState) -> Result<(), SessionError> {
    match state {
        SessionState::Unassigned => Ok(()),
        SessionState::Detached => Err(SessionError::Detached),
        SessionState::Host { room_code } | SessionState::Viewer { room_code } => {
            Err(SessionError::AlreadyJoined {
                room_code: room_code.clone(),
            })
        }
    }
}

fn validate_room_code(room_code: &str) -> Result<(), SessionError> {
    let valid = !room_code.is_empty()
        && room_code.len() <= MAX_ROOM_CODE_LEN
        && !room_code.chars().any(char::is_control);
    if valid {
        Ok(())
    } else {
        Err(SessionError::InvalidRoomCode)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use deskrelay_core::protocol::messages::{KeyAction, KeyControl};

    use super::*;
    use crate::application::auth::{MockAuthenticator, SecretAuthenticator};
    use crate::infrastructure::transport::MockTransport;

    fn manager() -> SessionManager {
        manager_with_auth(Arc::new(SecretAuthenticator::open()))
    }

    fn manager_with_auth(auth: Arc<dyn Authenticator>) -> SessionManager {
        let registry = Arc::new(RoomRegistry::new(true, 45));
        SessionManager::new(registry, auth, DeliveryLimits::default())
    }

    fn connect(mgr: &SessionManager) -> (ConnectionId, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let id = mgr.connect(transport.clone());
        (id, transport)
    }

    fn join_host(mgr: &SessionManager, id: ConnectionId, room: &str) {
        mgr.handle_message(
            id,
            ClientMessage::JoinAsHost {
                room_code: room.to_string(),
                secret: None,
            },
        )
        .unwrap();
    }

    fn join_viewer(mgr: &SessionManager, id: ConnectionId, room: &str) {
        mgr.handle_message(
            id,
            ClientMessage::JoinAsViewer {
                room_code: room.to_string(),
            },
        )
        .unwrap();
    }

    fn host_frame(room: &str, payload: &'static [u8]) -> FrameEnvelope {
        FrameEnvelope {
            kind: FrameKind::HostFrame,
            room_code: room.to_string(),
            sequence: 0,
            timestamp_us: 0,
            payload: Bytes::from_static(payload),
        }
    }

    fn key_payload() -> ControlPayload {
        ControlPayload::Key(KeyControl {
            action: KeyAction::Down,
            key: "a".to_string(),
            raw_key: None,
        })
    }

    #[test]
    fn test_join_as_viewer_replies_joined() {
        // Arrange
        let mgr = manager();
        let (id, _) = connect(&mgr);

        // Act
        let reply = mgr
            .handle_message(
                id,
                ClientMessage::JoinAsViewer {
                    room_code: "ABCD".to_string(),
                },
            )
            .unwrap();

        // Assert
        assert_eq!(
            reply,
            Some(ServerMessage::Joined {
                room_code: "ABCD".to_string(),
                role: Role::Viewer,
                connection_id: id.to_string(),
            })
        );
        assert_eq!(
            mgr.state_of(id),
            Some(SessionState::Viewer {
                room_code: "ABCD".to_string()
            })
        );
    }

    #[test]
    fn test_second_join_is_rejected() {
        let mgr = manager();
        let (id, _) = connect(&mgr);
        join_viewer(&mgr, id, "ABCD");

        let err = mgr
            .handle_message(
                id,
                ClientMessage::JoinAsHost {
                    room_code: "EFGH".to_string(),
                    secret: None,
                },
            )
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::AlreadyJoined);
        let room = mgr.registry().get("ABCD").unwrap();
        assert!(lock_room(&room).is_viewer(id), "first membership is untouched");
        assert!(!mgr.registry().contains("EFGH"));
    }

    #[test]
    fn test_host_join_checks_authenticator() {
        // Arrange: an authenticator that refuses everything
        let mut auth = MockAuthenticator::new();
        auth.expect_authenticate()
            .withf(|c| c.room_code == "ABCD" && c.secret.as_deref() == Some("wrong"))
            .times(1)
            .return_const(false);
        let mgr = manager_with_auth(Arc::new(auth));
        let (id, _) = connect(&mgr);

        // Act
        let err = mgr
            .handle_message(
                id,
                ClientMessage::JoinAsHost {
                    room_code: "ABCD".to_string(),
                    secret: Some("wrong".to_string()),
                },
            )
            .unwrap_err();

        // Assert: refused, and the connection may still try again
        assert_eq!(err.code(), ErrorCode::AuthFailed);
        assert_eq!(mgr.state_of(id), Some(SessionState::Unassigned));
        assert!(!mgr.registry().contains("ABCD"));
    }

    #[test]
    fn test_host_join_accepted_by_authenticator() {
        let mut auth = MockAuthenticator::new();
        auth.expect_authenticate().return_const(true);
        let mgr = manager_with_auth(Arc::new(auth));
        let (id, _) = connect(&mgr);

        join_host(&mgr, id, "ABCD");

        let room = mgr.registry().get("ABCD").unwrap();
        assert_eq!(lock_room(&room).host(), Some(id));
    }

    #[test]
    fn test_host_attach_notifies_viewers() {
        let mgr = manager();
        let (viewer, viewer_tx) = connect(&mgr);
        let (host, _) = connect(&mgr);
        join_viewer(&mgr, viewer, "ABCD");

        join_host(&mgr, host, "ABCD");

        assert_eq!(
            viewer_tx.sent_messages(),
            vec![ServerMessage::HostStatus { connected: true }]
        );
    }

    #[test]
    fn test_new_host_displaces_old_host() {
        // Arrange
        let mgr = manager();
        let (old, _) = connect(&mgr);
        let (new, _) = connect(&mgr);
        join_host(&mgr, old, "ABCD");

        // Act
        join_host(&mgr, new, "ABCD");

        // Assert: the old host can no longer publish
        let err = mgr
            .handle_frame(old, host_frame("ABCD", b"stale"))
            .unwrap_err();
        assert_eq!(
            err,
            SessionError::Displaced {
                room_code: "ABCD".to_string()
            }
        );
    }

    #[test]
    fn test_stale_host_disconnect_keeps_new_host() {
        let mgr = manager();
        let (old, _) = connect(&mgr);
        let (new, _) = connect(&mgr);
        let (viewer, viewer_tx) = connect(&mgr);
        join_host(&mgr, old, "ABCD");
        join_viewer(&mgr, viewer, "ABCD");
        join_host(&mgr, new, "ABCD");
        viewer_tx.clear();

        mgr.disconnect(old);

        let room = mgr.registry().get("ABCD").unwrap();
        assert_eq!(lock_room(&room).host(), Some(new));
        assert!(viewer_tx.sent().is_empty(), "no host-status for a stale host");
    }

    #[test]
    fn test_control_from_viewer_reaches_host() {
        let mgr = manager();
        let (host, host_tx) = connect(&mgr);
        let (viewer, _) = connect(&mgr);
        join_host(&mgr, host, "ABCD");
        join_viewer(&mgr, viewer, "ABCD");

        let reply = mgr
            .handle_message(
                viewer,
                ClientMessage::Control {
                    room_code: "ABCD".to_string(),
                    payload: key_payload(),
                },
            )
            .unwrap();

        assert_eq!(reply, None);
        assert_eq!(
            host_tx.sent_messages(),
            vec![ServerMessage::ControlFromViewer {
                from_viewer: viewer.to_string(),
                payload: key_payload(),
            }]
        );
    }

    #[test]
    fn test_control_for_other_room_is_not_in_room() {
        let mgr = manager();
        let (viewer, _) = connect(&mgr);
        join_viewer(&mgr, viewer, "ABCD");

        let err = mgr
            .handle_message(
                viewer,
                ClientMessage::Control {
                    room_code: "EFGH".to_string(),
                    payload: key_payload(),
                },
            )
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::NotInRoom);
    }

    #[test]
    fn test_host_cannot_send_control() {
        let mgr = manager();
        let (host, _) = connect(&mgr);
        join_host(&mgr, host, "ABCD");

        let err = mgr
            .handle_message(
                host,
                ClientMessage::Control {
                    room_code: "ABCD".to_string(),
                    payload: key_payload(),
                },
            )
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::WrongRole);
    }

    #[test]
    fn test_viewer_cannot_publish_frames() {
        let mgr = manager();
        let (viewer, _) = connect(&mgr);
        join_viewer(&mgr, viewer, "ABCD");

        let err = mgr
            .handle_frame(viewer, host_frame("ABCD", b"x"))
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::WrongRole);
    }

    #[test]
    fn test_viewer_frame_kind_from_client_is_rejected() {
        let mgr = manager();
        let (host, _) = connect(&mgr);
        join_host(&mgr, host, "ABCD");
        let mut frame = host_frame("ABCD", b"x");
        frame.kind = FrameKind::ViewerFrame;

        let err = mgr.handle_frame(host, frame).unwrap_err();

        assert_eq!(err.code(), ErrorCode::BadRequest);
    }

    #[test]
    fn test_leave_room_is_terminal() {
        // Arrange
        let mgr = manager();
        let (viewer, _) = connect(&mgr);
        join_viewer(&mgr, viewer, "ABCD");

        // Act
        let reply = mgr
            .handle_message(
                viewer,
                ClientMessage::LeaveRoom {
                    room_code: "ABCD".to_string(),
                },
            )
            .unwrap();
        let rejoin = mgr.handle_message(
            viewer,
            ClientMessage::JoinAsViewer {
                room_code: "ABCD".to_string(),
            },
        );

        // Assert
        assert_eq!(
            reply,
            Some(ServerMessage::Left {
                room_code: "ABCD".to_string()
            })
        );
        assert_eq!(rejoin.unwrap_err(), SessionError::Detached);
        let room = mgr.registry().get("ABCD").unwrap();
        assert!(!lock_room(&room).is_viewer(viewer));
    }

    #[test]
    fn test_leave_wrong_room_keeps_membership() {
        let mgr = manager();
        let (viewer, _) = connect(&mgr);
        join_viewer(&mgr, viewer, "ABCD");

        let err = mgr
            .handle_message(
                viewer,
                ClientMessage::LeaveRoom {
                    room_code: "EFGH".to_string(),
                },
            )
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::NotInRoom);
        assert!(matches!(mgr.state_of(viewer), Some(SessionState::Viewer { .. })));
    }

    #[test]
    fn test_host_leave_notifies_viewers() {
        let mgr = manager();
        let (host, _) = connect(&mgr);
        let (viewer, viewer_tx) = connect(&mgr);
        join_host(&mgr, host, "ABCD");
        join_viewer(&mgr, viewer, "ABCD");

        mgr.handle_message(
            host,
            ClientMessage::LeaveRoom {
                room_code: "ABCD".to_string(),
            },
        )
        .unwrap();

        assert_eq!(
            viewer_tx.sent_messages(),
            vec![ServerMessage::HostStatus { connected: false }]
        );
    }

    #[test]
    fn test_disconnect_releases_viewer_membership() {
        let mgr = manager();
        let (viewer, _) = connect(&mgr);
        join_viewer(&mgr, viewer, "ABCD");

        mgr.disconnect(viewer);

        let room = mgr.registry().get("ABCD").unwrap();
        assert_eq!(lock_room(&room).viewer_count(), 0);
        assert_eq!(mgr.state_of(viewer), None);
        mgr.disconnect(viewer); // second call is a no-op
    }

    #[test]
    fn test_message_after_disconnect_is_unknown_connection() {
        let mgr = manager();
        let (id, _) = connect(&mgr);
        mgr.disconnect(id);

        let err = mgr.handle_message(id, ClientMessage::CreateRoom).unwrap_err();

        assert_eq!(err, SessionError::UnknownConnection(id));
        assert_eq!(err.code(), ErrorCode::Detached);
    }

    #[test]
    fn test_create_room_allocates_code_without_joining() {
        let mgr = manager();
        let (id, _) = connect(&mgr);

        let reply = mgr.handle_message(id, ClientMessage::CreateRoom).unwrap();

        match reply {
            Some(ServerMessage::RoomCreated { room_code }) => {
                assert!(mgr.registry().contains(&room_code));
            }
            other => panic!("expected RoomCreated, got {other:?}"),
        }
        assert_eq!(mgr.state_of(id), Some(SessionState::Unassigned));
    }

    #[test]
    fn test_create_room_is_capped_per_connection() {
        // Arrange
        let mgr = manager();
        let (id, _) = connect(&mgr);
        for _ in 0..MAX_ROOMS_CREATED_PER_CONNECTION {
            mgr.handle_message(id, ClientMessage::CreateRoom).unwrap();
        }

        // Act
        let err = mgr.handle_message(id, ClientMessage::CreateRoom).unwrap_err();

        // Assert
        assert_eq!(
            err,
            SessionError::TooManyRooms {
                limit: MAX_ROOMS_CREATED_PER_CONNECTION
            }
        );
        assert_eq!(err.code(), ErrorCode::BadRequest);
        assert_eq!(
            mgr.registry().room_count(),
            MAX_ROOMS_CREATED_PER_CONNECTION as usize
        );
    }

    #[test]
    fn test_unjoined_rooms_do_not_accumulate_without_persistence() {
        // Arrange
        let registry = Arc::new(RoomRegistry::new(false, 45));
        let mgr = SessionManager::new(
            registry,
            Arc::new(SecretAuthenticator::open()),
            DeliveryLimits::default(),
        );
        let (id, _) = connect(&mgr);

        // Act: create rooms until refused, join none, then go away
        for _ in 0..1000 {
            let _ = mgr.handle_message(id, ClientMessage::CreateRoom);
        }
        mgr.disconnect(id);

        // Assert
        assert_eq!(mgr.registry().room_count(), 0);
    }

    #[test]
    fn test_created_code_is_joinable_without_persistence() {
        let registry = Arc::new(RoomRegistry::new(false, 45));
        let mgr = SessionManager::new(
            registry,
            Arc::new(SecretAuthenticator::open()),
            DeliveryLimits::default(),
        );
        let (creator, _) = connect(&mgr);
        let room_code = match mgr.handle_message(creator, ClientMessage::CreateRoom) {
            Ok(Some(ServerMessage::RoomCreated { room_code })) => room_code,
            other => panic!("expected RoomCreated, got {other:?}"),
        };

        join_host(&mgr, creator, &room_code);

        let room = mgr.registry().get(&room_code).unwrap();
        assert_eq!(lock_room(&room).host(), Some(creator));
    }

    #[test]
    fn test_invalid_room_code_is_bad_request() {
        let mgr = manager();
        let (id, _) = connect(&mgr);

        let empty = mgr
            .handle_message(
                id,
                ClientMessage::JoinAsViewer {
                    room_code: String::new(),
                },
            )
            .unwrap_err();
        let long = mgr
            .handle_message(
                id,
                ClientMessage::JoinAsViewer {
                    room_code: "X".repeat(MAX_ROOM_CODE_LEN + 1),
                },
            )
            .unwrap_err();

        assert_eq!(empty.code(), ErrorCode::BadRequest);
        assert_eq!(long.code(), ErrorCode::BadRequest);
        assert_eq!(mgr.state_of(id), Some(SessionState::Unassigned));
    }

    #[test]
    fn test_host_cursor_reaches_viewers() {
        let mgr = manager();
        let (host, _) = connect(&mgr);
        let (viewer, viewer_tx) = connect(&mgr);
        join_viewer(&mgr, viewer, "ABCD");
        join_host(&mgr, host, "ABCD");
        viewer_tx.clear();

        mgr.handle_message(
            host,
            ClientMessage::HostCursor {
                room_code: "ABCD".to_string(),
                x_norm: 0.5,
                y_norm: 0.5,
            },
        )
        .unwrap();

        assert_eq!(
            viewer_tx.sent_messages(),
            vec![ServerMessage::HostCursor {
                x_norm: 0.5,
                y_norm: 0.5
            }]
        );
    }

    #[test]
    fn test_error_reply_carries_code_and_message() {
        let err = SessionError::NotInRoom {
            room_code: "ABCD".to_string(),
        };
        assert_eq!(
            err.to_server_message(),
            ServerMessage::Error {
                code: ErrorCode::NotInRoom,
                message: "not a member of room ABCD".to_string(),
            }
        );
    }
}
