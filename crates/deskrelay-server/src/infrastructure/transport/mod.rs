//! Concrete [`Transport`](crate::application::Transport) implementations.
//!
//! - [`websocket`] – the production adapter over tokio-tungstenite.
//! - [`mock`] – an in-memory recorder for tests.

pub mod mock;
pub mod websocket;

pub use mock::MockTransport;
pub use websocket::{run_writer, OutboundQueue, WsTransport};
