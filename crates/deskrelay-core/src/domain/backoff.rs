//! Reconnect delay policy for relay clients.
//!
//! The relay itself never reconnects anything; this policy is used by hosts
//! and viewers that lose their connection.  Delays grow exponentially from
//! `base` up to `max`, with a uniform random jitter added so that a crowd of
//! clients dropped at the same moment does not reconnect in lock-step.

use std::time::Duration;

use rand::Rng;

/// Tunables for [`ReconnectBackoff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max: Duration,
    pub jitter: Duration,
}

impl Default for BackoffConfig {
    /// | Field  | Default |
    /// |--------|---------|
    /// | base   | 500 ms  |
    /// | max    | 10 s    |
    /// | jitter | 250 ms  |
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(10),
            jitter: Duration::from_millis(250),
        }
    }
}

/// Stateful exponential backoff: `min(max, base * 2^attempt) + uniform(0..=jitter)`.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt, without jitter.
    pub fn base_delay(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        self.config
            .base
            .checked_mul(factor)
            .unwrap_or(self.config.max)
            .min(self.config.max)
    }

    /// Returns the delay to wait now and advances to the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.base_delay() + self.jitter();
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Call after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.config.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}
