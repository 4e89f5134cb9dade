//! Time source abstraction.
//!
//! Cache eviction and checkpoint cadence are time-driven. All of that logic
//! takes `now_us` as a parameter; the runtime components read it from a
//! [`Clock`] so tests can control time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::time::Instant;

/// Source of monotonic time in microseconds.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current time in microseconds since the clock's origin.
    fn now_us(&self) -> u64;
}

/// Monotonic clock backed by `tokio::time::Instant`.
///
/// Follows tokio's paused time in tests, so `tokio::time::advance` moves it.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Creates a clock whose origin is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[allow(clippy::cast_possible_truncation)] // u64 microseconds covers ~584k years.
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

/// Manually driven clock for deterministic tests.
///
/// Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_us: Arc<AtomicU64>,
}

impl ManualClock {
    /// Creates a manual clock starting at `start_us`.
    #[must_use]
    pub fn new(start_us: u64) -> Self {
        Self {
            now_us: Arc::new(AtomicU64::new(start_us)),
        }
    }

    /// Moves time forward by `delta_us`.
    pub fn advance(&self, delta_us: u64) {
        self.now_us.fetch_add(delta_us, Ordering::SeqCst);
    }

    /// Sets the current time. Time never moves backwards.
    pub fn set(&self, now_us: u64) {
        self.now_us.fetch_max(now_us, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new(10);
        let other = clock.clone();
        clock.advance(5);
        assert_eq!(other.now_us(), 15);

        other.set(3);
        assert_eq!(clock.now_us(), 15, "time must not move backwards");
    }

    #[tokio::test(start_paused = true)]
    async fn test_monotonic_clock_follows_paused_time() {
        let clock = MonotonicClock::new();
        assert_eq!(clock.now_us(), 0);
        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(clock.now_us(), 250_000);
    }
}
