//! Application layer for deskrelay-server.
//!
//! - [`session`] – per-connection state machine; the entry point for every
//!   client message and frame.
//! - [`delivery`] – frame fan-out and control routing.
//! - [`connections`] – live connections, their transports and states.
//! - [`transport`] – the [`Transport`] trait the network adapters implement.
//! - [`auth`] – host admission.

pub mod auth;
pub mod connections;
pub mod delivery;
pub mod session;
pub mod transport;

pub use auth::{Authenticator, HostCredentials, SecretAuthenticator};
pub use connections::{ConnectionTable, SessionState};
pub use delivery::{DeliveryEngine, DeliveryPath, FrameDelivery, FrameOutcome, UnicastOutcome};
pub use session::{SessionError, SessionManager};
pub use transport::{DeliveryMode, Outbound, SendStatus, Transport, TransportError};
