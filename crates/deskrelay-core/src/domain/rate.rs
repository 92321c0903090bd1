//! Rate and backlog gates for frame fan-out.
//!
//! Both gates are advisory: when they say "no", the relay falls back to a
//! slower per-connection delivery path rather than refusing the frame.
//!
//! # Sliding window
//!
//! [`RateWindow`] remembers the instants of recent sends.  Before every
//! decision it trims instants older than the window (1 second by default)
//! from the front, then compares the remaining count with the ceiling.
//!
//! Only the newest `ceiling` instants are ever kept.  "At least `ceiling`
//! sends in the trailing window" is true exactly when the `ceiling`-th newest
//! send is inside the window, so older entries carry no information and
//! memory stays bounded even when the fallback path keeps sending.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default trailing window for rate accounting.
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_millis(1000);

/// Per-room sliding window of recent send instants.
#[derive(Debug, Clone)]
pub struct RateWindow {
    sends: VecDeque<Instant>,
    ceiling: usize,
    window: Duration,
}

impl RateWindow {
    /// Creates a window allowing `ceiling` sends per [`DEFAULT_RATE_WINDOW`].
    pub fn new(ceiling: u32) -> Self {
        Self::with_window(ceiling, DEFAULT_RATE_WINDOW)
    }

    pub fn with_window(ceiling: u32, window: Duration) -> Self {
        let ceiling = ceiling as usize;
        Self {
            sends: VecDeque::with_capacity(ceiling.min(1024)),
            ceiling,
            window,
        }
    }

    /// Returns `true` while fewer than `ceiling` sends fall inside the window
    /// ending at `now`.
    ///
    /// A ceiling of zero never allows a send.
    pub fn can_send_now(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.sends.len() < self.ceiling
    }

    /// Records a send at `now`.
    pub fn record(&mut self, now: Instant) {
        if self.ceiling == 0 {
            return;
        }
        self.prune(now);
        if self.sends.len() == self.ceiling {
            self.sends.pop_front();
        }
        self.sends.push_back(now);
    }

    /// Number of remembered sends inside the window ending at `now`.
    pub fn count(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.sends.len()
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    fn prune(&mut self, now: Instant) {
        // `checked_sub` fails only within `window` of the process clock's
        // origin; nothing can have expired yet in that case.
        let Some(cutoff) = now.checked_sub(self.window) else {
            return;
        };
        while let Some(&oldest) = self.sends.front() {
            if oldest < cutoff {
                self.sends.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Returns `true` if any of the given live buffered-byte counts exceeds
/// `threshold`.
///
/// This is a point-in-time check; callers re-evaluate it on every send
/// decision.
pub fn is_any_backlogged<I>(buffered: I, threshold: usize) -> bool
where
    I: IntoIterator<Item = usize>,
{
    buffered.into_iter().any(|bytes| bytes > threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window_allows_send() {
        let mut window = RateWindow::new(3);
        assert!(window.can_send_now(Instant::now()));
    }

    #[test]
    fn test_window_closes_when_ceiling_reached() {
        // Arrange
        let mut window = RateWindow::new(3);
        let t0 = Instant::now();

        // Act: three sends within the same second
        for i in 0..3 {
            window.record(t0 + Duration::from_millis(i * 10));
        }

        // Assert
        assert!(!window.can_send_now(t0 + Duration::from_millis(50)));
    }

    #[test]
    fn test_window_reopens_after_oldest_send_expires() {
        let mut window = RateWindow::new(2);
        let t0 = Instant::now();
        window.record(t0);
        window.record(t0 + Duration::from_millis(500));

        assert!(!window.can_send_now(t0 + Duration::from_millis(999)));
        assert!(window.can_send_now(t0 + Duration::from_millis(1001)));
    }

    #[test]
    fn test_instant_exactly_at_window_edge_is_still_counted() {
        // Entries are trimmed only while older than `now - window`.
        let mut window = RateWindow::new(1);
        let t0 = Instant::now();
        window.record(t0);
        assert!(!window.can_send_now(t0 + DEFAULT_RATE_WINDOW));
    }

    #[test]
    fn test_record_keeps_at_most_ceiling_entries() {
        let mut window = RateWindow::new(4);
        let t0 = Instant::now();
        for i in 0..100 {
            window.record(t0 + Duration::from_micros(i));
        }
        assert_eq!(window.count(t0 + Duration::from_micros(100)), 4);
    }

    #[test]
    fn test_bounded_window_reopens_at_the_same_instant_as_unbounded() {
        // Arrange: ceiling 2, five sends spread over 400 ms
        let mut window = RateWindow::new(2);
        let t0 = Instant::now();
        for i in 0..5 {
            window.record(t0 + Duration::from_millis(i * 100));
        }

        // Assert: the 2nd newest send is at t0+300ms, so the gate opens just
        // after t0+1300ms, exactly as an unbounded window would behave.
        assert!(!window.can_send_now(t0 + Duration::from_millis(1300)));
        assert!(window.can_send_now(t0 + Duration::from_millis(1301)));
    }

    #[test]
    fn test_zero_ceiling_never_allows_send() {
        let mut window = RateWindow::new(0);
        let t0 = Instant::now();
        window.record(t0);
        assert!(!window.can_send_now(t0));
        assert_eq!(window.count(t0), 0);
    }

    #[test]
    fn test_custom_window_length() {
        let mut window = RateWindow::with_window(1, Duration::from_millis(100));
        let t0 = Instant::now();
        window.record(t0);
        assert!(!window.can_send_now(t0 + Duration::from_millis(50)));
        assert!(window.can_send_now(t0 + Duration::from_millis(101)));
    }

    #[test]
    fn test_backlog_detected_when_one_connection_exceeds_threshold() {
        assert!(is_any_backlogged([0, 600 * 1024, 10], 512 * 1024));
    }

    #[test]
    fn test_backlog_threshold_is_exclusive() {
        assert!(!is_any_backlogged([512 * 1024], 512 * 1024));
    }

    #[test]
    fn test_no_connections_is_not_backlogged() {
        assert!(!is_any_backlogged(std::iter::empty(), 0));
    }
}
