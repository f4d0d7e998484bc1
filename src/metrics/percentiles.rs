use serde::{Deserialize, Serialize};

/// p50 / p95 / p99 of a set of latencies, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PercentileSet {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl PercentileSet {
    /// Sort `values` and compute the three percentiles.
    /// Returns zeroes for an empty input.
    pub fn from_values(mut values: Vec<f64>) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        values.sort_unstable_by(|a, b| a.total_cmp(b));
        Self::from_sorted(&values)
    }

    pub fn from_sorted(sorted: &[f64]) -> Self {
        Self {
            p50_ms: interpolated_percentile(sorted, 0.50),
            p95_ms: interpolated_percentile(sorted, 0.95),
            p99_ms: interpolated_percentile(sorted, 0.99),
        }
    }
}

/// Percentile of an ascending slice using linear interpolation between the
/// two order statistics around rank `p * (n - 1)`.
///
/// `p` is a fraction in `[0, 1]`; values outside are clamped.
pub fn interpolated_percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = p.clamp(0.0, 1.0) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let fraction = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    #[test]
    fn test_interpolated_percentile() {
        let sorted = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(interpolated_percentile(&sorted, 0.0), 1.0);
        assert_eq!(interpolated_percentile(&sorted, 0.5), 3.0);
        assert_eq!(interpolated_percentile(&sorted, 1.0), 5.0);
        // rank 0.95 * 4 = 3.8 -> 4 + 0.8 * (5 - 4)
        assert!((interpolated_percentile(&sorted, 0.95) - 4.8).abs() < 1e-9);
    }

    #[test]
    fn test_interpolation_between_two_values() {
        let sorted = [10.0, 20.0];
        assert!((interpolated_percentile(&sorted, 0.5) - 15.0).abs() < 1e-9);
        assert!((interpolated_percentile(&sorted, 0.99) - 19.9).abs() < 1e-9);
    }

    #[test]
    fn test_empty_and_single() {
        assert_eq!(PercentileSet::from_values(Vec::new()), PercentileSet::default());
        let single = PercentileSet::from_values(vec![7.5]);
        assert_eq!(single.p50_ms, 7.5);
        assert_eq!(single.p99_ms, 7.5);
    }

    #[test]
    fn test_order_independent() {
        let values: Vec<f64> = (0..500).map(|i| ((i * 37) % 101) as f64 * 1.25).collect();
        let baseline = PercentileSet::from_values(values.clone());

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10 {
            let mut shuffled = values.clone();
            shuffled.shuffle(&mut rng);
            assert_eq!(PercentileSet::from_values(shuffled), baseline);
        }
        // Idempotent on already-sorted input too.
        let mut sorted = values;
        sorted.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(PercentileSet::from_sorted(&sorted), baseline);
    }
}
