//! Domain layer: pure relay state with no OS, network, or async dependencies.
//!
//! - [`room`] – room membership, sequence numbers, and the registry of rooms.
//! - [`rate`] – per-room sliding send window and the backlog predicate.
//! - [`backoff`] – reconnect delay policy for clients of the relay.

pub mod backoff;
pub mod rate;
pub mod room;
