//! Uniform reservoir sampling of per-operation latencies.
//!
//! Classic algorithm R: the first `capacity` observations fill the
//! reservoir, after which the n-th observation replaces a uniformly
//! random slot with probability `capacity / n`. The reservoir is then a
//! uniform sample of everything seen, and percentiles read from it are
//! unbiased estimates at any point in the stream.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

/// Percentile triple read from a reservoir at tick time. Construction
/// guarantees `p50 <= p90 <= p99`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

#[derive(Debug, Clone)]
pub struct Reservoir {
    capacity: usize,
    seen: u64,
    samples: Vec<f64>,
    rng: ChaCha8Rng,
}

impl Reservoir {
    pub fn new(capacity: usize, seed: u64) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: 0,
            samples: Vec::with_capacity(capacity.max(1).min(4096)),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn observe(&mut self, value: f64) {
        self.seen += 1;
        if self.samples.len() < self.capacity {
            self.samples.push(value);
            return;
        }
        let slot = self.rng.gen_range(0..self.seen);
        if (slot as usize) < self.capacity {
            self.samples[slot as usize] = value;
        }
    }

    /// Total observations offered, including those that fell out.
    pub fn seen(&self) -> u64 {
        self.seen
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Nearest-rank percentiles over the current sample, or `None` while
    /// the reservoir is empty.
    pub fn percentiles(&self) -> Option<Percentiles> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = |q: f64| -> f64 {
            let idx = ((q * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
            sorted[idx - 1]
        };
        Some(Percentiles {
            p50: rank(0.50),
            p90: rank(0.90),
            p99: rank(0.99),
        })
    }
}
