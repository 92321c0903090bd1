//! The outbound side of one client connection, as seen by the relay core.
//!
//! The session manager and the delivery engine never touch sockets.  Each
//! connection is represented by an `Arc<dyn Transport>` that can report how
//! many bytes are still queued for it and accept new outbound messages.
//! The WebSocket adapter lives in `infrastructure::transport`; tests use the
//! recording mock next to it.

use bytes::Bytes;
use thiserror::Error;

use deskrelay_core::ServerMessage;

/// A message queued for one connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A JSON protocol message.
    Text(String),
    /// An encoded frame envelope.  Cloning shares the buffer.
    Binary(Bytes),
}

impl Outbound {
    /// Serialises a [`ServerMessage`] into a text message.
    pub fn json(message: &ServerMessage) -> Result<Self, serde_json::Error> {
        serde_json::to_string(message).map(Outbound::Text)
    }

    /// Size on the wire, used for backlog accounting.
    pub fn len(&self) -> usize {
        match self {
            Outbound::Text(text) => text.len(),
            Outbound::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How hard the transport should try to deliver a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Queue the message, or fail if the connection cannot take it.
    Reliable,
    /// The transport may silently discard the message when the connection
    /// is congested.
    Droppable,
}

/// Result of a successful [`Transport::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Queued,
    /// Only ever returned for [`DeliveryMode::Droppable`] sends.
    Discarded,
}

/// Errors raised by [`Transport::send`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection is closed")]
    Closed,

    #[error("outbound queue is full")]
    QueueFull,
}

/// The relay's handle on one connection's outbound path.
///
/// Implementations must be cheap to query: `buffered_bytes` is read under a
/// room lock on every frame.
pub trait Transport: Send + Sync {
    /// Bytes accepted by `send` but not yet written to the network.
    fn buffered_bytes(&self) -> usize;

    /// Queues `message` for delivery without blocking.
    fn send(&self, message: Outbound, mode: DeliveryMode) -> Result<SendStatus, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_outbound_carries_type_tag() {
        // Arrange
        let msg = ServerMessage::HostStatus { connected: false };

        // Act
        let outbound = Outbound::json(&msg).unwrap();

        // Assert
        match outbound {
            Outbound::Text(text) => assert!(text.contains(r#""type":"host-status""#)),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn test_len_reports_wire_size() {
        assert_eq!(Outbound::Text("abcd".to_string()).len(), 4);
        assert_eq!(Outbound::Binary(Bytes::from_static(&[0u8; 10])).len(), 10);
        assert!(Outbound::Binary(Bytes::new()).is_empty());
    }

    #[test]
    fn test_transport_error_messages() {
        assert_eq!(TransportError::Closed.to_string(), "connection is closed");
        assert_eq!(TransportError::QueueFull.to_string(), "outbound queue is full");
    }
}
