//! WebSocket implementation of [`Transport`].
//!
//! Each connection gets a bounded queue between the relay core and a writer
//! task that owns the socket's sink half.  An atomic counter tracks bytes
//! that are queued but not yet written; that counter is what the delivery
//! engine reads as the connection's backlog.
//!
//! ```text
//! DeliveryEngine ──send()──► [ bounded mpsc ] ──► run_writer ──► WebSocket sink
//!        ▲                         │                    │
//!        └──buffered_bytes()── AtomicUsize ◄──fetch_sub─┘
//! ```
//!
//! Droppable sends are discarded outright while the backlog exceeds
//! `discard_above` or the queue is full, so a slow viewer can never make the
//! relay hold more than one queue's worth of frames for it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::interval;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::debug;

use crate::application::transport::{DeliveryMode, Outbound, SendStatus, Transport, TransportError};

/// Relay-side handle of one WebSocket connection's outbound path.
#[derive(Debug)]
pub struct WsTransport {
    tx: mpsc::Sender<Outbound>,
    buffered: Arc<AtomicUsize>,
    discard_above: usize,
}

/// Writer-side end of a [`WsTransport`] queue.
#[derive(Debug)]
pub struct OutboundQueue {
    rx: mpsc::Receiver<Outbound>,
    buffered: Arc<AtomicUsize>,
}

impl WsTransport {
    /// Creates a transport and the queue its writer task drains.
    ///
    /// `capacity` bounds the number of queued messages; `discard_above` is
    /// the backlog in bytes beyond which droppable sends are discarded.
    pub fn channel(capacity: usize, discard_above: usize) -> (Self, OutboundQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let buffered = Arc::new(AtomicUsize::new(0));
        (
            Self {
                tx,
                buffered: Arc::clone(&buffered),
                discard_above,
            },
            OutboundQueue { rx, buffered },
        )
    }
}

impl Transport for WsTransport {
    fn buffered_bytes(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    fn send(&self, message: Outbound, mode: DeliveryMode) -> Result<SendStatus, TransportError> {
        if mode == DeliveryMode::Droppable && self.buffered_bytes() > self.discard_above {
            return Ok(SendStatus::Discarded);
        }

        let len = message.len();
        self.buffered.fetch_add(len, Ordering::AcqRel);
        match self.tx.try_send(message) {
            Ok(()) => Ok(SendStatus::Queued),
            Err(e) => {
                self.buffered.fetch_sub(len, Ordering::AcqRel);
                match e {
                    TrySendError::Full(_) if mode == DeliveryMode::Droppable => {
                        Ok(SendStatus::Discarded)
                    }
                    TrySendError::Full(_) => Err(TransportError::QueueFull),
                    TrySendError::Closed(_) => Err(TransportError::Closed),
                }
            }
        }
    }
}

impl OutboundQueue {
    /// Waits for the next queued message.  `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.rx.recv().await
    }

    /// Releases `len` bytes from the backlog after they have been written.
    pub fn mark_written(&self, len: usize) {
        self.buffered.fetch_sub(len, Ordering::AcqRel);
    }
}

fn to_ws_message(message: Outbound) -> WsMessage {
    match message {
        Outbound::Text(text) => WsMessage::text(text),
        Outbound::Binary(bytes) => WsMessage::Binary(bytes),
    }
}

/// Drains `queue` into `sink`, sending a WebSocket ping every
/// `ping_interval`.
///
/// Runs until the queue closes (the connection was removed from the relay)
/// or the sink fails, then closes the sink.
pub async fn run_writer<S>(
    mut queue: OutboundQueue,
    mut sink: S,
    ping_interval: Duration,
    session_id: String,
) where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    let mut ticker = interval(ping_interval);
    ticker.tick().await; // Skip the immediate first tick.

    loop {
        tokio::select! {
            next = queue.recv() => {
                let Some(message) = next else {
                    debug!("session {session_id}: outbound queue closed");
                    break;
                };
                let len = message.len();
                let result = sink.send(to_ws_message(message)).await;
                queue.mark_written(len);
                if let Err(e) = result {
                    debug!("session {session_id}: WebSocket write failed: {e}");
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Default::default())).await {
                    debug!("session {session_id}: ping failed: {e}");
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}
