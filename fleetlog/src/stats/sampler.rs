//! Fixed-memory quantile estimation by reservoir sampling.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A uniform sample of at most `capacity` values from a stream of any length.
///
/// Appending follows Algorithm R: the first `capacity` values fill the buffer,
/// and the value numbered `seen` afterwards replaces a random slot with
/// probability `capacity / (seen + 1)`. At any point every value seen so far is
/// in the buffer with the same probability.
///
/// ```rust
/// use fleetlog::stats::QuantileSample;
///
/// let mut sample = QuantileSample::new(5);
/// for v in [3, 1, 4, 1, 5] {
///     sample.append(v);
/// }
/// assert_eq!(sample.quantiles(), vec![1, 1, 3, 4, 5]);
/// assert_eq!(sample.count(), 5);
/// ```
#[derive(Debug, Clone)]
pub struct QuantileSample {
    capacity: usize,
    buffer: Vec<i64>,
    seen: u64,
    rng: StdRng,
}

impl QuantileSample {
    pub fn new(capacity: usize) -> Self {
        Self::with_rng(capacity, StdRng::from_os_rng())
    }

    /// A sample with a deterministic replacement sequence.
    pub fn with_seed(capacity: usize, seed: u64) -> Self {
        Self::with_rng(capacity, StdRng::seed_from_u64(seed))
    }

    fn with_rng(capacity: usize, rng: StdRng) -> Self {
        Self {
            capacity,
            buffer: Vec::with_capacity(capacity),
            seen: 0,
            rng,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn append(&mut self, value: i64) {
        if self.buffer.len() < self.capacity {
            self.buffer.push(value);
        } else {
            let slot = self.rng.random_range(0..=self.seen);
            if let Ok(slot) = usize::try_from(slot) {
                if slot < self.capacity {
                    self.buffer[slot] = value;
                }
            }
        }
        self.seen += 1;
    }

    /// Exactly `capacity` values in ascending order.
    ///
    /// Once the stream has reached `capacity` values the sorted sample itself
    /// is returned. A shorter stream is stretched over `capacity` slots by
    /// taking, for slot `i`, the sorted value at `round(i * seen / capacity)`
    /// (halves round up). An empty stream yields zeros.
    pub fn quantiles(&self) -> Vec<i64> {
        let mut sorted = self.buffer.clone();
        sorted.sort_unstable();
        if sorted.len() >= self.capacity {
            return sorted;
        }
        if sorted.is_empty() {
            return vec![0; self.capacity];
        }

        let n = self.capacity as u64;
        let seen = sorted.len() as u64;
        (0..n)
            .map(|i| {
                let index = ((2 * i * seen + n) / (2 * n)).min(seen - 1);
                sorted[index as usize]
            })
            .collect()
    }

    /// How many values were appended since the last reset.
    pub fn count(&self) -> u64 {
        self.seen
    }

    /// Empties the sample, keeping its allocation.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.seen = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_stream_is_stretched() {
        let mut sample = QuantileSample::with_seed(4, 1);
        sample.append(10);
        sample.append(20);
        // i * 2 / 4 rounded half up: 0, 1 (0.5), 1, 2 -> clamped to 1
        assert_eq!(sample.quantiles(), vec![10, 20, 20, 20]);
    }

    #[test]
    fn test_empty_stream() {
        let sample = QuantileSample::with_seed(3, 1);
        assert_eq!(sample.quantiles(), vec![0, 0, 0]);
        assert_eq!(sample.count(), 0);
    }

    #[test]
    fn test_long_stream_keeps_size_and_count() {
        let mut sample = QuantileSample::with_seed(21, 7);
        for v in 0..10_000 {
            sample.append(v);
        }
        let quantiles = sample.quantiles();
        assert_eq!(quantiles.len(), 21);
        assert_eq!(sample.count(), 10_000);
        assert!(quantiles.windows(2).all(|w| w[0] <= w[1]));
        assert!(quantiles.iter().all(|v| (0..10_000).contains(v)));
    }

    #[test]
    fn test_reset_reuses_sample() {
        let mut sample = QuantileSample::with_seed(2, 3);
        for v in [9, 8, 7] {
            sample.append(v);
        }
        sample.reset();
        sample.append(1);
        assert_eq!(sample.count(), 1);
        assert_eq!(sample.quantiles(), vec![1, 1]);
    }

    #[test]
    fn test_inclusion_is_uniform() {
        // Every position of a 20-item stream should land in a 5-slot
        // reservoir about a quarter of the time.
        let trials = 4000;
        let mut hits = [0u32; 20];
        for seed in 0..trials {
            let mut sample = QuantileSample::with_seed(5, seed);
            for v in 0..20 {
                sample.append(v);
            }
            for &v in &sample.buffer {
                hits[v as usize] += 1;
            }
        }
        let expected = f64::from(trials as u32) * 5.0 / 20.0;
        for (position, &count) in hits.iter().enumerate() {
            let ratio = f64::from(count) / expected;
            assert!((0.85..1.15).contains(&ratio), "position {position}: {ratio}");
        }
    }
}
