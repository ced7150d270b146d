use std::collections::VecDeque;

use fleetwatch_common::types::EpochMs;

/// A single observation appended to a [`MetricBuffer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSample {
    pub value: f64,
    pub timestamp_ms: EpochMs,
}

/// Mean/variance snapshot over the buffer's current window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricStats {
    pub mean: f64,
    pub stddev: f64,
    pub count: usize,
}

/// Bounded, time-ordered sequence of samples for one (connection,
/// metric) pair, with running mean/variance maintained incrementally
/// via Welford's algorithm — applied in both directions, so evicting
/// the oldest sample on overflow is as cheap as adding a new one. No
/// full-window recompute is needed even though the window slides.
pub struct MetricBuffer {
    capacity: usize,
    min_samples: usize,
    samples: VecDeque<MetricSample>,
    count: u64,
    mean: f64,
    m2: f64,
}

impl MetricBuffer {
    pub fn new(capacity: usize, min_samples: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            min_samples: min_samples.max(1),
            samples: VecDeque::with_capacity(capacity),
            count: 0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether the buffer holds enough samples for the detector to
    /// trust its statistics (spec.md §4.A warm-up rule).
    pub fn is_warm(&self) -> bool {
        self.samples.len() >= self.min_samples
    }

    pub fn latest(&self) -> Option<&MetricSample> {
        self.samples.back()
    }

    /// Append a sample, evicting the oldest one first if the buffer is
    /// already at capacity.
    pub fn add(&mut self, sample: MetricSample) {
        if self.samples.len() >= self.capacity {
            if let Some(evicted) = self.samples.pop_front() {
                self.remove_from_stats(evicted.value);
            }
        }
        self.add_to_stats(sample.value);
        self.samples.push_back(sample);
    }

    fn add_to_stats(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    fn remove_from_stats(&mut self, value: f64) {
        if self.count <= 1 {
            self.count = 0;
            self.mean = 0.0;
            self.m2 = 0.0;
            return;
        }
        let old_count = self.count as f64;
        let new_count = old_count - 1.0;
        let delta = value - self.mean;
        let new_mean = (self.mean * old_count - value) / new_count;
        self.m2 -= delta * (value - new_mean);
        self.mean = new_mean;
        self.count -= 1;
    }

    /// Current mean/stddev over the window. Population stddev (divides
    /// by `n`, not `n - 1`) since the buffer is the whole population of
    /// interest, not a sample of a larger one.
    pub fn stats(&self) -> MetricStats {
        let count = self.samples.len();
        if count == 0 {
            return MetricStats {
                mean: 0.0,
                stddev: 0.0,
                count: 0,
            };
        }
        let variance = (self.m2 / self.count as f64).max(0.0);
        MetricStats {
            mean: self.mean,
            stddev: variance.sqrt(),
            count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(value: f64, t: i64) -> MetricSample {
        MetricSample {
            value,
            timestamp_ms: t,
        }
    }

    #[test]
    fn not_warm_below_min_samples() {
        let mut buf = MetricBuffer::new(10, 5);
        for i in 0..4 {
            buf.add(sample(i as f64, i));
        }
        assert!(!buf.is_warm());
    }

    #[test]
    fn warm_at_min_samples() {
        let mut buf = MetricBuffer::new(10, 5);
        for i in 0..5 {
            buf.add(sample(i as f64, i));
        }
        assert!(buf.is_warm());
    }

    #[test]
    fn stats_match_naive_recomputation_over_window() {
        let mut buf = MetricBuffer::new(5, 1);
        let values = [10.0, 12.0, 11.0, 13.0, 9.0, 20.0, 21.0];
        for (i, v) in values.iter().enumerate() {
            buf.add(sample(*v, i as i64));
        }
        // capacity 5: window is the last 5 values
        let window = &values[values.len() - 5..];
        let naive_mean = window.iter().sum::<f64>() / window.len() as f64;
        let naive_var = window.iter().map(|v| (v - naive_mean).powi(2)).sum::<f64>() / window.len() as f64;

        let stats = buf.stats();
        assert!((stats.mean - naive_mean).abs() < 1e-9);
        assert!((stats.stddev - naive_var.sqrt()).abs() < 1e-9);
        assert_eq!(stats.count, 5);
    }

    #[test]
    fn eviction_keeps_capacity_bounded() {
        let mut buf = MetricBuffer::new(3, 1);
        for i in 0..10 {
            buf.add(sample(i as f64, i));
        }
        assert_eq!(buf.len(), 3);
    }
}
