//! Infrastructure layer for deskrelay-server.
//!
//! - [`ws_server`] – TCP accept loop and per-connection WebSocket tasks.
//! - [`transport`] – the WebSocket [`Transport`](crate::application::Transport)
//!   adapter and its test double.
//! - [`config_file`] – optional TOML configuration file.

pub mod config_file;
pub mod transport;
pub mod ws_server;

pub use ws_server::{build_session_manager, run_server, serve};
