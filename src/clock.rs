//! Monotonic tick sources.
//!
//! All timestamps crossing component boundaries are `u64` ticks: nanoseconds
//! elapsed since the clock's origin. Plain integers keep them storable in
//! atomics, which is how the aggregator and watchdog share "last seen"
//! timestamps without a lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Monotonic high-resolution timestamp source.
pub trait Clock: Send + Sync {
    /// Nanoseconds since this clock's origin. Never decreases.
    fn now_ticks(&self) -> u64;
}

/// Convert a duration to ticks, saturating at `u64::MAX`.
pub fn duration_to_ticks(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

pub fn ticks_to_duration(ticks: u64) -> Duration {
    Duration::from_nanos(ticks)
}

/// Convert a tick delta to fractional milliseconds.
pub fn ticks_to_ms(ticks: u64) -> f64 {
    ticks as f64 / 1_000_000.0
}

/// Clock backed by `tokio::time::Instant`.
///
/// Under `#[tokio::test(start_paused = true)]` the runtime's virtual time
/// drives this clock, so sampler and watchdog loops can be tested without
/// real sleeps. Outside a paused runtime it reads the OS monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: tokio::time::Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ticks(&self) -> u64 {
        duration_to_ticks(tokio::time::Instant::now().saturating_duration_since(self.origin))
    }
}

/// Hand-driven clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    ticks: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.ticks
            .fetch_add(duration_to_ticks(by), Ordering::SeqCst);
    }

    /// Jump to an absolute offset from the origin. Moving backwards is ignored.
    pub fn set(&self, at: Duration) {
        self.ticks
            .fetch_max(duration_to_ticks(at), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }
}
