//! # deskrelay-agent
//!
//! Reference host-side collaborator for the DeskRelay relay.
//!
//! The agent connects to the relay as the host of one room, applies the
//! control intents viewers send through an [`InputInjector`], and echoes the
//! resulting cursor position back so viewers can draw it locally.
//!
//! # Layers
//!
//! - **`application`** – [`ApplyControlUseCase`]: throttling, coordinate
//!   scaling, and key-name normalisation.  Pure logic over the
//!   [`InputInjector`] trait.
//! - **`infrastructure`** – the relay connection with its reconnect loop, and
//!   the recording injector used in tests and dry runs.
//!
//! Screen capture and OS-level injection are not part of this crate; an
//! embedder supplies frames through [`AgentConnection::send_frame`] and a
//! platform injector through the [`InputInjector`] trait.
//!
//! [`InputInjector`]: application::InputInjector
//! [`ApplyControlUseCase`]: application::ApplyControlUseCase
//! [`AgentConnection::send_frame`]: infrastructure::network::AgentConnection::send_frame

pub mod application;
pub mod infrastructure;
