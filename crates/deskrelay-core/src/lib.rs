//! # deskrelay-core
//!
//! Shared library for DeskRelay containing the relay wire protocol, the room
//! registry, and the rate-window accounting used by the relay hub.
//!
//! This crate is used by both the relay server and the host agent.
//! It has zero dependencies on OS APIs, async runtimes, or network sockets.
//!
//! # Architecture overview (for beginners)
//!
//! DeskRelay brokers remote-control sessions.  One *host* streams screen
//! frames and accepts mouse/keyboard control; any number of *viewers* watch
//! the stream and send control back.  Hosts and viewers meet in a *room*
//! identified by a short code.
//!
//! This crate (`deskrelay-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How bytes travel over the network.  Control traffic is
//!   JSON text; frames travel in a compact binary envelope (20-byte header +
//!   room code + opaque payload).
//!
//! - **`domain`** – Pure relay state with no I/O.  The most important piece
//!   is the `RoomRegistry`: the map of every room to its host, its viewers,
//!   and the per-room sequence and rate bookkeeping.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `deskrelay_core::RoomRegistry` instead of the full module path.
pub use domain::backoff::{BackoffConfig, ReconnectBackoff};
pub use domain::rate::RateWindow;
pub use domain::room::{ConnectionId, Room, RoomRegistry, SharedRoom};
pub use protocol::codec::{decode_frame, encode_frame, FrameEnvelope, FrameKind, ProtocolError};
pub use protocol::messages::{ClientMessage, ControlPayload, Role, ServerMessage};
