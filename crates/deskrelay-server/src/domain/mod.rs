//! Domain layer for deskrelay-server.
//!
//! Pure configuration types with no dependency on I/O, networking, or
//! external frameworks.  The infrastructure layer is responsible for
//! populating them from CLI arguments, environment variables, or a TOML file.

pub mod config;

pub use config::{DeliveryLimits, HostAuthConfig, RelayConfig};
