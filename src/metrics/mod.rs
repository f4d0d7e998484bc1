//! Latency metrics: exact sliding-window statistics plus bounded-memory
//! session statistics.
//!
//! - [`window`]: FIFO of recent samples, exact percentiles over the trailing window
//! - [`session`]: O(1) lifetime accumulators and a uniform reservoir for
//!   approximate session percentiles
//! - [`percentiles`]: the linear-interpolation percentile used by both
//! - [`aggregator`]: the thread-safe engine tying them together

pub mod aggregator;
pub mod percentiles;
pub mod session;
pub mod window;

pub use aggregator::{AggregatorConfig, MetricsAggregator, MetricsSnapshot, SampleListener};
pub use percentiles::PercentileSet;
pub use session::{Reservoir, SessionAccumulator, SessionMetrics};
pub use window::{SlidingWindow, WindowMetrics};

use serde::{Deserialize, Serialize};

/// Latency thresholds (ms) tracked by the window and session counters.
pub const THRESHOLD_100_MS: f64 = 100.0;
pub const THRESHOLD_250_MS: f64 = 250.0;
pub const THRESHOLD_1000_MS: f64 = 1000.0;

/// One measurement of main-thread scheduling latency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Clock ticks at which the probe callback ran.
    pub timestamp_ticks: u64,
    pub latency_ms: f64,
}

impl Sample {
    pub fn new(timestamp_ticks: u64, latency_ms: f64) -> Self {
        Self {
            timestamp_ticks,
            latency_ms: latency_ms.max(0.0),
        }
    }
}

/// How many samples met or exceeded each latency threshold.
///
/// Counts are inclusive: a sample of exactly 100 ms lands in `over_100ms`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdCounts {
    pub over_100ms: u64,
    pub over_250ms: u64,
    pub over_1000ms: u64,
}

impl ThresholdCounts {
    pub fn record(&mut self, latency_ms: f64) {
        if latency_ms >= THRESHOLD_100_MS {
            self.over_100ms += 1;
        }
        if latency_ms >= THRESHOLD_250_MS {
            self.over_250ms += 1;
        }
        if latency_ms >= THRESHOLD_1000_MS {
            self.over_1000ms += 1;
        }
    }

    pub fn from_values<'a>(values: impl IntoIterator<Item = &'a f64>) -> Self {
        let mut counts = Self::default();
        for &v in values {
            counts.record(v);
        }
        counts
    }
}
