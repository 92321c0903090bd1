//! deskrelay-server library crate.
//!
//! This crate provides the relay hub that matches one host and many viewers
//! into rooms and fans out frame and control traffic between them.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Host agent  ──frames──►  ┌──────────────────────────┐  ──frames──►  Viewers
//!             ◄─control──  │  deskrelay-server        │  ◄─control──
//!                          │   ├── domain/            │  RelayConfig
//!                          │   ├── application/       │  Session Manager, Delivery Engine,
//!                          │   │                      │  Transport + Authenticator traits
//!                          │   └── infrastructure/    │  WebSocket adapter, config file
//!                          └──────────────────────────┘
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O (plain configuration types).
//! - `application` depends on `domain` and `deskrelay-core` only; it talks to
//!   the network exclusively through the [`application::Transport`] trait.
//! - `infrastructure` depends on all other layers plus `tokio` and
//!   `tokio-tungstenite`.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: session state machine and frame/control delivery.
pub mod application;

/// Infrastructure layer: WebSocket server, transports, config file loading.
pub mod infrastructure;
