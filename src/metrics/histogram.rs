//! Fixed-bin cumulative latency histograms for Prometheus-style export.

use serde::Serialize;

/// Millisecond-scale upper bounds for typical replay latencies.
pub const DEFAULT_BOUNDS_MS: [f64; 11] = [
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0,
];

/// Microsecond-scale bounds (expressed in ms) for sub-millisecond
/// workloads where the default preset would collapse into its first bin.
pub const MICRO_BOUNDS_MS: [f64; 11] = [
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketPreset {
    Default,
    Micro,
}

impl BucketPreset {
    pub fn bounds(self) -> &'static [f64] {
        match self {
            BucketPreset::Default => &DEFAULT_BOUNDS_MS,
            BucketPreset::Micro => &MICRO_BOUNDS_MS,
        }
    }
}

/// Serialized histogram state: `cumulative[i]` counts observations at or
/// under `bounds[i]`; the final element is the `+Inf` bin (total count).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramSnapshot {
    pub bounds_ms: Vec<f64>,
    pub cumulative: Vec<u64>,
    pub count: u64,
    pub sum_ms: f64,
}

#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    bounds: Vec<f64>,
    /// Per-bin (non-cumulative) counts; last bin is the overflow bin.
    counts: Vec<u64>,
    count: u64,
    sum_ms: f64,
}

impl LatencyHistogram {
    pub fn new(preset: BucketPreset) -> Self {
        let bounds = preset.bounds().to_vec();
        let bins = bounds.len() + 1;
        Self {
            bounds,
            counts: vec![0; bins],
            count: 0,
            sum_ms: 0.0,
        }
    }

    pub fn observe(&mut self, ms: f64) {
        let bin = self
            .bounds
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(self.bounds.len());
        self.counts[bin] += 1;
        self.count += 1;
        self.sum_ms += ms;
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let mut cumulative = Vec::with_capacity(self.counts.len());
        let mut running = 0u64;
        for &c in &self.counts {
            running += c;
            cumulative.push(running);
        }
        HistogramSnapshot {
            bounds_ms: self.bounds.clone(),
            cumulative,
            count: self.count,
            sum_ms: self.sum_ms,
        }
    }

    /// Prometheus text exposition for this histogram under `name`.
    pub fn render_prometheus(&self, name: &str, out: &mut String) {
        use std::fmt::Write;
        let snap = self.snapshot();
        let _ = writeln!(out, "# TYPE {name} histogram");
        for (bound, cum) in snap.bounds_ms.iter().zip(&snap.cumulative) {
            let _ = writeln!(out, "{name}_bucket{{le=\"{bound}\"}} {cum}");
        }
        let total = snap.cumulative.last().copied().unwrap_or(0);
        let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {total}");
        let _ = writeln!(out, "{name}_sum {}", snap.sum_ms);
        let _ = writeln!(out, "{name}_count {}", snap.count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cumulative_counts_are_monotone() {
        let mut h = LatencyHistogram::new(BucketPreset::Default);
        for ms in [0.02, 0.3, 0.3, 7.0, 900.0] {
            h.observe(ms);
        }
        let snap = h.snapshot();
        assert_eq!(snap.count, 5);
        assert!(snap.cumulative.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*snap.cumulative.last().unwrap(), 5);
        // 900ms lands in the +Inf bin only.
        assert_eq!(snap.cumulative[snap.bounds_ms.len() - 1], 4);
    }

    #[test]
    fn observation_on_boundary_counts_into_bin() {
        let mut h = LatencyHistogram::new(BucketPreset::Default);
        h.observe(0.05);
        let snap = h.snapshot();
        assert_eq!(snap.cumulative[0], 1);
    }

    #[test]
    fn micro_preset_resolves_sub_millisecond() {
        let mut h = LatencyHistogram::new(BucketPreset::Micro);
        h.observe(0.004); // 4µs
        let snap = h.snapshot();
        assert_eq!(snap.cumulative[0], 0);
        assert_eq!(snap.cumulative[2], 1);
    }

    #[test]
    fn prometheus_rendering_ends_with_inf() {
        let mut h = LatencyHistogram::new(BucketPreset::Default);
        h.observe(1.0);
        let mut out = String::new();
        h.render_prometheus("flexmap_op_latency_ms", &mut out);
        assert!(out.contains("le=\"+Inf\"} 1"));
        assert!(out.contains("flexmap_op_latency_ms_count 1"));
    }
}
