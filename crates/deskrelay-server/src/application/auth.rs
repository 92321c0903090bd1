//! Host admission.
//!
//! Viewers join freely; claiming the host role of a room goes through an
//! [`Authenticator`].  The relay ships with [`SecretAuthenticator`], which
//! compares a shared secret per room.

use std::collections::HashMap;

use crate::domain::config::HostAuthConfig;

/// What a connection presented when it asked to become a room's host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCredentials {
    pub room_code: String,
    pub secret: Option<String>,
}

/// Decides whether a host claim is admitted.
#[cfg_attr(test, mockall::automock)]
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, credentials: &HostCredentials) -> bool;
}

/// Shared-secret authenticator.
///
/// A room with an entry in `room_secrets` requires that secret; any other
/// room requires `default_secret`.  A room with neither accepts every claim.
#[derive(Debug, Clone, Default)]
pub struct SecretAuthenticator {
    default_secret: Option<String>,
    room_secrets: HashMap<String, String>,
}

impl SecretAuthenticator {
    pub fn new(config: &HostAuthConfig) -> Self {
        Self {
            default_secret: config.default_secret.clone(),
            room_secrets: config.room_secrets.clone(),
        }
    }

    /// An authenticator that admits every host.
    pub fn open() -> Self {
        Self::default()
    }

    fn required_secret(&self, room_code: &str) -> Option<&str> {
        self.room_secrets
            .get(room_code)
            .or(self.default_secret.as_ref())
            .map(String::as_str)
    }
}

impl Authenticator for SecretAuthenticator {
    fn authenticate(&self, credentials: &HostCredentials) -> bool {
        match self.required_secret(&credentials.room_code) {
            None => true,
            Some(expected) => credentials
                .secret
                .as_deref()
                .is_some_and(|given| constant_time_eq(expected.as_bytes(), given.as_bytes())),
        }
    }
}

/// Compares two byte strings in time that depends only on their lengths.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
