//! Recording transport for tests.
//!
//! Stores every accepted message instead of writing it anywhere, and lets
//! tests dictate the buffered-byte count the relay observes.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use deskrelay_core::{decode_frame, FrameEnvelope, ServerMessage};

use crate::application::transport::{DeliveryMode, Outbound, SendStatus, Transport, TransportError};

/// A [`Transport`] that records sends in memory.
#[derive(Debug, Default)]
pub struct MockTransport {
    sent: Mutex<Vec<(Outbound, DeliveryMode)>>,
    buffered: AtomicUsize,
    closed: AtomicBool,
    discard_droppable: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value returned by `buffered_bytes`.
    pub fn set_buffered_bytes(&self, bytes: usize) {
        self.buffered.store(bytes, Ordering::Relaxed);
    }

    /// Makes every later send fail with [`TransportError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    /// When set, droppable sends are discarded instead of recorded.
    pub fn set_discard_droppable(&self, discard: bool) {
        self.discard_droppable.store(discard, Ordering::Relaxed);
    }

    /// Every accepted message with the mode it was sent in.
    pub fn sent(&self) -> Vec<(Outbound, DeliveryMode)> {
        self.lock_sent().clone()
    }

    /// Accepted binary messages.
    pub fn sent_binaries(&self) -> Vec<Bytes> {
        self.sent()
            .into_iter()
            .filter_map(|(msg, _)| match msg {
                Outbound::Binary(bytes) => Some(bytes),
                Outbound::Text(_) => None,
            })
            .collect()
    }

    /// Accepted binary messages decoded as frame envelopes.  Anything that
    /// does not decode is left out.
    pub fn sent_frames(&self) -> Vec<FrameEnvelope> {
        self.sent_binaries()
            .into_iter()
            .filter_map(|bytes| decode_frame(bytes).ok())
            .collect()
    }

    /// Accepted text messages parsed as [`ServerMessage`]s.
    pub fn sent_messages(&self) -> Vec<ServerMessage> {
        self.sent()
            .into_iter()
            .filter_map(|(msg, _)| match msg {
                Outbound::Text(text) => serde_json::from_str(&text).ok(),
                Outbound::Binary(_) => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.lock_sent().clear();
    }

    fn lock_sent(&self) -> MutexGuard<'_, Vec<(Outbound, DeliveryMode)>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MockTransport {
    fn buffered_bytes(&self) -> usize {
        self.buffered.load(Ordering::Relaxed)
    }

    fn send(&self, message: Outbound, mode: DeliveryMode) -> Result<SendStatus, TransportError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(TransportError::Closed);
        }
        if mode == DeliveryMode::Droppable && self.discard_droppable.load(Ordering::Relaxed) {
            return Ok(SendStatus::Discarded);
        }
        self.lock_sent().push((message, mode));
        Ok(SendStatus::Queued)
    }
}
