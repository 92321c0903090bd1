//! Infrastructure layer for deskrelay-agent.
//!
//! - [`network`] – the WebSocket connection to the relay.
//! - [`input_injection`] – [`InputInjector`](crate::application::InputInjector)
//!   implementations.

pub mod input_injection;
pub mod network;
