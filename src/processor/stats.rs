/// Four-number summary of a distribution feature.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Snapshot {
    pub min: f64,
    pub mean: f64,
    pub max: f64,
    pub std: f64,
}

/// Running min/mean/max/std over integer samples.
///
/// Only count, sum, sum of squares and the extremes are kept, so adding a sample
/// is O(1) and a snapshot never replays history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatAccumulator {
    count: u64,
    sum: u64,
    sum_sq: u128,
    min: u64,
    max: u64,
}

impl StatAccumulator {
    pub fn new() -> Self { Self::default() }

    pub fn add(&mut self, sample: u64) {
        if self.count == 0 {
            self.min = sample;
            self.max = sample;
        } else {
            self.min = self.min.min(sample);
            self.max = self.max.max(sample);
        }
        self.count += 1;
        self.sum = self.sum.saturating_add(sample);
        self.sum_sq = self.sum_sq.saturating_add(sample as u128 * sample as u128);
    }

    #[inline]
    pub fn count(&self) -> u64 { self.count }

    #[inline]
    pub fn sum(&self) -> u64 { self.sum }

    pub fn snapshot(&self) -> Snapshot {
        if self.count == 0 {
            return Snapshot::default();
        }
        let n = self.count as f64;
        let sum = self.sum as f64;
        Snapshot {
            min: self.min as f64,
            mean: sum / n,
            max: self.max as f64,
            std: stddev(self.sum_sq as f64, sum, self.count),
        }
    }
}

// Unbiased sample standard deviation from sum and sum of squares; 0 below two samples
pub fn stddev(sum_sq: f64, sum: f64, count: u64) -> f64 {
    if count < 2 {
        return 0.0;
    }
    let n = count as f64;
    // Cancellation can push the numerator a hair below zero
    ((sum_sq - sum * sum / n) / (n - 1.0)).max(0.0).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct(samples: &[u64]) -> Snapshot {
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<u64>() as f64 / n;
        let var = samples.iter().map(|&s| (s as f64 - mean).powi(2)).sum::<f64>() / (n - 1.0);
        Snapshot {
            min: *samples.iter().min().unwrap() as f64,
            mean,
            max: *samples.iter().max().unwrap() as f64,
            std: var.sqrt(),
        }
    }

    #[test]
    fn test_empty_snapshot_is_zero() {
        assert_eq!(StatAccumulator::new().snapshot(), Snapshot::default());
    }

    #[test]
    fn test_single_sample_has_zero_std() {
        let mut acc = StatAccumulator::new();
        acc.add(1500);
        let s = acc.snapshot();
        assert_eq!(s.min, 1500.0);
        assert_eq!(s.mean, 1500.0);
        assert_eq!(s.max, 1500.0);
        assert_eq!(s.std, 0.0);
    }

    #[test]
    fn test_matches_direct_computation() {
        let samples = [2u64, 4, 4, 4, 5, 5, 7, 9];
        let mut acc = StatAccumulator::new();
        for &s in &samples {
            acc.add(s);
        }
        let got = acc.snapshot();
        let want = direct(&samples);
        assert_eq!(got.min, want.min);
        assert_eq!(got.max, want.max);
        assert!((got.mean - 5.0).abs() < 1e-12);
        assert!((got.std - want.std).abs() < 1e-9);
        assert!((got.std - (32.0f64 / 7.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_sample_order_does_not_matter() {
        let mut fwd = StatAccumulator::new();
        let mut rev = StatAccumulator::new();
        let samples = [60u64, 1514, 40, 52, 977, 40];
        for &s in &samples {
            fwd.add(s);
        }
        for &s in samples.iter().rev() {
            rev.add(s);
        }
        assert_eq!(fwd.snapshot(), rev.snapshot());
    }

    #[test]
    fn test_min_mean_max_ordering() {
        let mut acc = StatAccumulator::new();
        for s in [1_000_000u64, 3, 250_000, 17] {
            acc.add(s);
        }
        let s = acc.snapshot();
        assert!(s.min <= s.mean && s.mean <= s.max);
        assert_eq!(acc.count(), 4);
        assert_eq!(acc.sum(), 1_250_020);
    }
}
