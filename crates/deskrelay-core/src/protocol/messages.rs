//! JSON message types for the text side of the relay protocol.
//!
//! Frames travel as binary envelopes (see [`crate::protocol::codec`]).
//! Joining rooms, control events and keyframe requests all
//! travel as small JSON text messages.
//!
//! # Message flow
//!
//! ```text
//! Host/Viewer → Relay:  JSON text frame  →  ClientMessage
//! Relay → Host/Viewer:  ServerMessage    →  JSON text frame
//! ```
//!
//! # JSON discriminant
//!
//! Every message is a JSON object with a `"type"` field that identifies the
//! variant.  All other fields are flattened into the same object:
//!
//! ```json
//! {"type":"join-as-viewer","room_code":"ABCD"}
//! {"type":"control","room_code":"ABCD","payload":{"type":"mouse","action":"click","button":"left"}}
//! ```
//!
//! Two distinct enums are used for the two directions so that it is a
//! compile-time error to send a client-only message from the relay.

use serde::{Deserialize, Serialize};

// ── Client → Relay messages ───────────────────────────────────────────────────

/// All messages a host or viewer can send to the relay as JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Claims the host role for `room_code`.
    ///
    /// The relay checks `secret` with its authenticator.  A second successful
    /// claim replaces the first host (last writer wins).
    JoinAsHost {
        room_code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret: Option<String>,
    },

    /// Joins `room_code` as a viewer.  No authentication is required.
    JoinAsViewer { room_code: String },

    /// Asks the relay to allocate a fresh, unused room code.
    CreateRoom,

    /// Leaves the room.  The connection cannot join again afterwards.
    LeaveRoom { room_code: String },

    /// A viewer's control intent, forwarded to the room's host.
    Control {
        room_code: String,
        payload: ControlPayload,
    },

    /// A viewer asks the host for an independently decodable frame.
    RequestKeyframe { room_code: String },

    /// The host reports its cursor position so viewers can draw it locally.
    ///
    /// Coordinates are normalised to `[0, 1]` of the host's screen.
    HostCursor {
        room_code: String,
        x_norm: f64,
        y_norm: f64,
    },
}

impl ClientMessage {
    /// Returns a short type-name string for log messages.
    ///
    /// Never includes field values, so secrets and control payloads stay out
    /// of the logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMessage::JoinAsHost { .. } => "join-as-host",
            ClientMessage::JoinAsViewer { .. } => "join-as-viewer",
            ClientMessage::CreateRoom => "create-room",
            ClientMessage::LeaveRoom { .. } => "leave-room",
            ClientMessage::Control { .. } => "control",
            ClientMessage::RequestKeyframe { .. } => "request-keyframe",
            ClientMessage::HostCursor { .. } => "host-cursor",
        }
    }
}

// ── Relay → Client messages ───────────────────────────────────────────────────

/// All JSON messages the relay sends to hosts and viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// A join succeeded.
    Joined {
        room_code: String,
        role: Role,
        /// The id other parties see for this connection (e.g. `from_viewer`).
        connection_id: String,
    },

    /// Reply to `create-room`.
    RoomCreated { room_code: String },

    /// Reply to `leave-room`.
    Left { room_code: String },

    /// A request from this connection was refused.
    Error { code: ErrorCode, message: String },

    /// To the host: a viewer's control intent.
    ControlFromViewer {
        from_viewer: String,
        payload: ControlPayload,
    },

    /// To the host: a viewer noticed a sequence gap and wants a keyframe.
    RequestKeyframe { from_viewer: String },

    /// To viewers: the host's current cursor position.
    HostCursor { x_norm: f64, y_norm: f64 },

    /// To viewers: the host attached (`true`) or went away (`false`).
    HostStatus { connected: bool },
}

/// The role a connection plays inside a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Viewer,
}

/// Machine-readable reason carried by [`ServerMessage::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    AuthFailed,
    AlreadyJoined,
    Detached,
    NotInRoom,
    WrongRole,
    BadRequest,
}

// ── Control payloads ──────────────────────────────────────────────────────────

/// A single control intent originating from a viewer.
///
/// ```json
/// {"type":"mouse","action":"move","x_norm":0.5,"y_norm":0.25}
/// {"type":"key","action":"down","key":"Enter"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlPayload {
    Mouse(MouseControl),
    Key(KeyControl),
}

/// Mouse control actions.  Coordinates are normalised to `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum MouseControl {
    Move {
        x_norm: f64,
        y_norm: f64,
    },
    Click {
        #[serde(default)]
        button: MouseButton,
    },
    Down {
        #[serde(default)]
        button: MouseButton,
    },
    Up {
        #[serde(default)]
        button: MouseButton,
    },
    Scroll {
        #[serde(default)]
        delta_x: i32,
        #[serde(default)]
        delta_y: i32,
    },
}

/// Mouse button identifier.
///
/// Absent buttons, and any name other than `right` or `middle`, mean `left`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl From<String> for MouseButton {
    fn from(name: String) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "right" => MouseButton::Right,
            "middle" => MouseButton::Middle,
            _ => MouseButton::Left,
        }
    }
}

/// A key press or release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyControl {
    pub action: KeyAction,
    /// Browser-style key name, e.g. `"Enter"`, `"a"`, `"ArrowLeft"`.
    pub key: String,
    /// The raw character produced by the key, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAction {
    Down,
    Up,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
