//! Delivery engine: frame fan-out and control routing.
//!
//! # Frame path
//!
//! Every host frame goes through the same decision, made under the room's
//! lock so that sequence numbers and rate accounting stay consistent across
//! concurrent callers:
//!
//! 1. Payloads over `max_frame_bytes` are dropped (no sequence consumed).
//! 2. The exact same payload handle as the previous frame is skipped.
//! 3. A room without viewers is a no-op.
//! 4. The frame is stamped with the next sequence number and recorded in
//!    the room's send window.
//! 5. If the window had room *and* no viewer is backlogged, the frame goes
//!    out on the **broadcast** path: one encoded buffer is offered to every
//!    viewer as a droppable send.  Otherwise it goes out on the
//!    **per-connection** path: each viewer is re-checked and skipped while
//!    backlogged, and the rest get a reliable send.
//!
//! The lock is released before any send.  The envelope is encoded exactly
//! once and shared between all viewers.
//!
//! # Control path
//!
//! Control messages and keyframe requests are unicast to the room's current
//! host.  A room without a host silently drops them.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, error};

use deskrelay_core::domain::rate::is_any_backlogged;
use deskrelay_core::domain::room::lock_room;
use deskrelay_core::protocol::codec::encode_frame_now;
use deskrelay_core::{ConnectionId, ControlPayload, FrameKind, RoomRegistry, ServerMessage};

use crate::application::connections::ConnectionTable;
use crate::application::transport::{DeliveryMode, Outbound, SendStatus, Transport};
use crate::domain::config::DeliveryLimits;

/// Which fan-out path a frame took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPath {
    Broadcast,
    PerConnection,
}

/// Per-viewer counts for one relayed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDelivery {
    pub sequence: u64,
    pub path: DeliveryPath,
    /// Viewers whose transport queued the frame.
    pub delivered: usize,
    /// Viewers skipped on the per-connection path because they were
    /// backlogged.
    pub skipped: usize,
    /// Viewers whose transport discarded the droppable broadcast.
    pub discarded: usize,
    /// Viewers whose transport refused the frame.
    pub failed: usize,
}

/// What happened to a frame handed to [`DeliveryEngine::relay_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Oversized { size: usize },
    Duplicate,
    NoViewers,
    /// The envelope could not be encoded; the sequence number was consumed.
    EncodeFailed { sequence: u64 },
    Delivered(FrameDelivery),
}

impl FrameOutcome {
    /// The sequence number stamped on the frame, if one was consumed.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            FrameOutcome::Delivered(d) => Some(d.sequence),
            FrameOutcome::EncodeFailed { sequence } => Some(*sequence),
            _ => None,
        }
    }
}

/// Outcome of a message sent to a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnicastOutcome {
    Delivered,
    /// No host in the room, or the recipient is already gone.
    NoRecipient,
    Failed,
}

/// Routes frames from hosts to viewers and control from viewers to hosts.
#[derive(Debug)]
pub struct DeliveryEngine {
    registry: Arc<RoomRegistry>,
    connections: Arc<ConnectionTable>,
    limits: DeliveryLimits,
}

/// Decision taken under the room lock, executed after it is released.
struct FramePlan {
    sequence: u64,
    path: DeliveryPath,
    targets: Vec<(ConnectionId, Arc<dyn Transport>)>,
}

impl DeliveryEngine {
    pub fn new(
        registry: Arc<RoomRegistry>,
        connections: Arc<ConnectionTable>,
        limits: DeliveryLimits,
    ) -> Self {
        Self {
            registry,
            connections,
            limits,
        }
    }

    pub fn limits(&self) -> DeliveryLimits {
        self.limits
    }

    /// Relays one host frame to every viewer of `room_code`.
    pub fn relay_frame(&self, room_code: &str, payload: Bytes) -> FrameOutcome {
        self.relay_frame_at(room_code, payload, Instant::now())
    }

    /// [`relay_frame`](Self::relay_frame) with an explicit clock, for tests
    /// of the rate window.
    pub fn relay_frame_at(&self, room_code: &str, payload: Bytes, now: Instant) -> FrameOutcome {
        if payload.len() > self.limits.max_frame_bytes {
            debug!(
                "room {room_code}: dropping oversized frame ({} > {} bytes)",
                payload.len(),
                self.limits.max_frame_bytes
            );
            return FrameOutcome::Oversized {
                size: payload.len(),
            };
        }

        let Some(room) = self.registry.get(room_code) else {
            return FrameOutcome::NoViewers;
        };

        let plan = {
            let mut room = lock_room(&room);
            if room.is_same_payload(&payload) {
                debug!("room {room_code}: skipping repeated payload");
                return FrameOutcome::Duplicate;
            }

            let targets = self.connections.transports_for(room.viewers());
            if targets.is_empty() {
                return FrameOutcome::NoViewers;
            }

            let window_open = room.rate_mut().can_send_now(now);
            let backlogged = is_any_backlogged(
                targets.iter().map(|(_, t)| t.buffered_bytes()),
                self.limits.backlog_threshold_bytes,
            );

            let sequence = room.next_sequence();
            room.rate_mut().record(now);
            room.remember_payload(payload.clone());

            let path = if window_open && !backlogged {
                room.mark_immediate_flush(now);
                DeliveryPath::Broadcast
            } else {
                DeliveryPath::PerConnection
            };

            FramePlan {
                sequence,
                path,
                targets,
            }
        };

        let encoded = match encode_frame_now(FrameKind::ViewerFrame, room_code, plan.sequence, &payload)
        {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("room {room_code}: frame {} encode error: {e}", plan.sequence);
                return FrameOutcome::EncodeFailed {
                    sequence: plan.sequence,
                };
            }
        };

        let delivery = self.fan_out(room_code, &plan, &encoded);
        debug!(
            "room {room_code}: frame {} via {:?} → {} delivered, {} skipped, {} discarded, {} failed",
            delivery.sequence,
            delivery.path,
            delivery.delivered,
            delivery.skipped,
            delivery.discarded,
            delivery.failed
        );
        FrameOutcome::Delivered(delivery)
    }

    /// Forwards a viewer's control intent to the room's current host.
    pub fn relay_control(
        &self,
        room_code: &str,
        from_viewer: ConnectionId,
        payload: ControlPayload,
    ) -> UnicastOutcome {
        let message = ServerMessage::ControlFromViewer {
            from_viewer: from_viewer.to_string(),
            payload,
        };
        self.send_to_host(room_code, &message)
    }

    /// Forwards a viewer's keyframe request to the room's current host.
    pub fn relay_keyframe_request(&self, room_code: &str, from_viewer: ConnectionId) -> UnicastOutcome {
        let message = ServerMessage::RequestKeyframe {
            from_viewer: from_viewer.to_string(),
        };
        self.send_to_host(room_code, &message)
    }

    /// Sends the host's cursor position to every viewer as a droppable
    /// message.  Returns how many viewers queued it.
    pub fn relay_host_cursor(&self, room_code: &str, x_norm: f64, y_norm: f64) -> usize {
        let message = ServerMessage::HostCursor { x_norm, y_norm };
        self.send_to_viewers(room_code, &message, DeliveryMode::Droppable)
    }

    /// Tells every viewer whether the room has a host.
    pub fn notify_host_status(&self, room_code: &str, connected: bool) -> usize {
        let message = ServerMessage::HostStatus { connected };
        self.send_to_viewers(room_code, &message, DeliveryMode::Reliable)
    }

    /// Sends `message` reliably to one connection.
    pub fn send_to(&self, id: ConnectionId, message: &ServerMessage) -> UnicastOutcome {
        let Some(transport) = self.connections.transport(id) else {
            return UnicastOutcome::NoRecipient;
        };
        let outbound = match Outbound::json(message) {
            Ok(outbound) => outbound,
            Err(e) => {
                error!("connection {id}: JSON serialization error: {e}");
                return UnicastOutcome::Failed;
            }
        };
        match transport.send(outbound, DeliveryMode::Reliable) {
            Ok(SendStatus::Queued) => UnicastOutcome::Delivered,
            Ok(SendStatus::Discarded) => UnicastOutcome::Failed,
            Err(e) => {
                debug!("connection {id}: send failed: {e}");
                UnicastOutcome::Failed
            }
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn fan_out(&self, room_code: &str, plan: &FramePlan, encoded: &Bytes) -> FrameDelivery {
        let mut delivery = FrameDelivery {
            sequence: plan.sequence,
            path: plan.path,
            delivered: 0,
            skipped: 0,
            discarded: 0,
            failed: 0,
        };

        for (id, transport) in &plan.targets {
            let mode = match plan.path {
                DeliveryPath::Broadcast => DeliveryMode::Droppable,
                DeliveryPath::PerConnection => {
                    if transport.buffered_bytes() > self.limits.backlog_threshold_bytes {
                        delivery.skipped += 1;
                        continue;
                    }
                    DeliveryMode::Reliable
                }
            };
            match transport.send(Outbound::Binary(encoded.clone()), mode) {
                Ok(SendStatus::Queued) => delivery.delivered += 1,
                Ok(SendStatus::Discarded) => delivery.discarded += 1,
                Err(e) => {
                    debug!("room {room_code}: viewer {id} frame send failed: {e}");
                    delivery.failed += 1;
                }
            }
        }
        delivery
    }

    fn send_to_host(&self, room_code: &str, message: &ServerMessage) -> UnicastOutcome {
        let host = self
            .registry
            .get(room_code)
            .and_then(|room| lock_room(&room).host());
        match host {
            Some(host) => self.send_to(host, message),
            None => {
                debug!("room {room_code}: no host; dropping {}", server_type_name(message));
                UnicastOutcome::NoRecipient
            }
        }
    }

    fn send_to_viewers(&self, room_code: &str, message: &ServerMessage, mode: DeliveryMode) -> usize {
        let Some(room) = self.registry.get(room_code) else {
            return 0;
        };
        let targets = {
            let room = lock_room(&room);
            self.connections.transports_for(room.viewers())
        };
        if targets.is_empty() {
            return 0;
        }
        let outbound = match Outbound::json(message) {
            Ok(outbound) => outbound,
            Err(e) => {
                error!("room {room_code}: JSON serialization error: {e}");
                return 0;
            }
        };
        targets
            .iter()
            .filter(|(_, transport)| {
                matches!(transport.send(outbound.clone(), mode), Ok(SendStatus::Queued))
            })
            .count()
    }
}

/// Short name of a relay message for logs; never includes payloads.
fn server_type_name(message: &ServerMessage) -> &'static str {
    match message {
        ServerMessage::Joined { .. } => "joined",
        ServerMessage::RoomCreated { .. } => "room-created",
        ServerMessage::Left { .. } => "left",
        ServerMessage::Error { .. } => "error",
        ServerMessage::ControlFromViewer { .. } => "control-from-viewer",
        ServerMessage::RequestKeyframe { .. } => "request-keyframe",
        ServerMessage::HostCursor { .. } => "host-cursor",
        ServerMessage::HostStatus { .. } => "host-status",
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
