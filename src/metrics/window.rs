use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::percentiles::PercentileSet;
use super::{Sample, ThresholdCounts};

/// Exact statistics over the trailing window. All zero when `count == 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub count: u64,
    pub latest_ms: f64,
    pub mean_ms: f64,
    #[serde(flatten)]
    pub percentiles: PercentileSet,
    pub max_ms: f64,
    #[serde(flatten)]
    pub thresholds: ThresholdCounts,
}

impl WindowMetrics {
    /// Compute metrics from window values in arrival order.
    pub fn from_values(values: Vec<f64>) -> Self {
        let latest_ms = match values.last() {
            Some(&v) => v,
            None => return Self::default(),
        };
        let count = values.len() as u64;
        let mean_ms = values.iter().sum::<f64>() / count as f64;
        let max_ms = values.iter().copied().fold(0.0, f64::max);
        let thresholds = ThresholdCounts::from_values(&values);

        Self {
            count,
            latest_ms,
            mean_ms,
            percentiles: PercentileSet::from_values(values),
            max_ms,
            thresholds,
        }
    }
}

/// FIFO of `(timestamp, latency)` covering the last `duration_ticks`.
///
/// Timestamps are pushed in non-decreasing order, so the oldest entry is
/// always at the front and eviction is amortized O(1).
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    duration_ticks: u64,
    entries: VecDeque<Sample>,
}

impl SlidingWindow {
    pub fn new(duration_ticks: u64) -> Self {
        Self {
            duration_ticks,
            entries: VecDeque::new(),
        }
    }

    /// Append a sample and evict everything older than the window relative to it.
    pub fn push(&mut self, sample: Sample) {
        // A timestamp behind the newest entry would break FIFO order; clamp it.
        let timestamp_ticks = match self.entries.back() {
            Some(last) if last.timestamp_ticks > sample.timestamp_ticks => last.timestamp_ticks,
            _ => sample.timestamp_ticks,
        };
        self.entries.push_back(Sample {
            timestamp_ticks,
            ..sample
        });
        self.prune(timestamp_ticks);
    }

    /// Evict entries with `timestamp < now - duration`.
    pub fn prune(&mut self, now_ticks: u64) {
        let cutoff = now_ticks.saturating_sub(self.duration_ticks);
        while let Some(front) = self.entries.front() {
            if front.timestamp_ticks >= cutoff {
                break;
            }
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Latencies currently in the window, oldest first.
    pub fn values(&self) -> Vec<f64> {
        self.entries.iter().map(|s| s.latency_ms).collect()
    }

    pub fn metrics(&self) -> WindowMetrics {
        WindowMetrics::from_values(self.values())
    }
}
