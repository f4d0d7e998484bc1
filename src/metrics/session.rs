use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::percentiles::PercentileSet;
use super::ThresholdCounts;

/// Whole-run statistics.
///
/// `count`, `mean_ms`, `max_ms` and the threshold counts are exact.
/// Percentiles come from the reservoir and are approximate once the run has
/// produced more samples than the reservoir holds; exact session percentiles
/// are not a goal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub count: u64,
    pub mean_ms: f64,
    pub max_ms: f64,
    #[serde(flatten)]
    pub percentiles: PercentileSet,
    #[serde(flatten)]
    pub thresholds: ThresholdCounts,
    /// Number of samples the percentiles were computed from.
    pub reservoir_len: usize,
}

/// Fixed-capacity uniform sample of an unbounded stream (Algorithm R).
///
/// Until full, every value is kept. After that the k-th value (1-indexed)
/// replaces a uniformly chosen slot with probability `capacity / k`.
#[derive(Debug, Clone)]
pub struct Reservoir {
    capacity: usize,
    values: Vec<f64>,
    seen: u64,
    rng: StdRng,
}

impl Reservoir {
    pub fn new(capacity: usize) -> Self {
        Self::with_rng(capacity, StdRng::from_entropy())
    }

    /// Deterministic reservoir, used by tests and simulations.
    pub fn with_seed(capacity: usize, seed: u64) -> Self {
        Self::with_rng(capacity, StdRng::seed_from_u64(seed))
    }

    fn with_rng(capacity: usize, rng: StdRng) -> Self {
        Self {
            capacity,
            values: Vec::with_capacity(capacity.min(4096)),
            seen: 0,
            rng,
        }
    }

    pub fn offer(&mut self, value: f64) {
        self.seen += 1;
        if self.values.len() < self.capacity {
            self.values.push(value);
            return;
        }
        let slot = self.rng.gen_range(0..self.seen);
        if slot < self.capacity as u64 {
            self.values[slot as usize] = value;
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Total values offered so far.
    pub fn seen(&self) -> u64 {
        self.seen
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// O(1)-per-sample lifetime accumulators. Never trimmed.
#[derive(Debug, Clone)]
pub struct SessionAccumulator {
    count: u64,
    sum_ms: f64,
    max_ms: f64,
    thresholds: ThresholdCounts,
    reservoir: Reservoir,
}

/// Copy of the session state taken under the aggregator lock; percentiles
/// are computed from it after the lock is released.
#[derive(Debug, Clone)]
pub struct SessionCapture {
    count: u64,
    sum_ms: f64,
    max_ms: f64,
    thresholds: ThresholdCounts,
    reservoir: Vec<f64>,
}

impl SessionAccumulator {
    pub fn new(reservoir: Reservoir) -> Self {
        Self {
            count: 0,
            sum_ms: 0.0,
            max_ms: 0.0,
            thresholds: ThresholdCounts::default(),
            reservoir,
        }
    }

    pub fn record(&mut self, latency_ms: f64) {
        self.count += 1;
        self.sum_ms += latency_ms;
        if latency_ms > self.max_ms {
            self.max_ms = latency_ms;
        }
        self.thresholds.record(latency_ms);
        self.reservoir.offer(latency_ms);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn reservoir(&self) -> &Reservoir {
        &self.reservoir
    }

    pub fn capture(&self) -> SessionCapture {
        SessionCapture {
            count: self.count,
            sum_ms: self.sum_ms,
            max_ms: self.max_ms,
            thresholds: self.thresholds,
            reservoir: self.reservoir.values().to_vec(),
        }
    }

    pub fn metrics(&self) -> SessionMetrics {
        self.capture().into_metrics()
    }
}

impl SessionCapture {
    pub fn into_metrics(self) -> SessionMetrics {
        if self.count == 0 {
            return SessionMetrics::default();
        }
        let reservoir_len = self.reservoir.len();
        SessionMetrics {
            count: self.count,
            mean_ms: self.sum_ms / self.count as f64,
            max_ms: self.max_ms,
            percentiles: PercentileSet::from_values(self.reservoir),
            thresholds: self.thresholds,
            reservoir_len,
        }
    }
}
