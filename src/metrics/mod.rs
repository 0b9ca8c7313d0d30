//! Replay metrics: op counters, latency sampling, and the `metrics.v1`
//! tick record emitted while a workload runs.
//!
//! The tick schema is additive-only; removing or re-typing a field
//! requires bumping the schema tag.

pub mod histogram;
pub mod reservoir;

pub use histogram::{BucketPreset, HistogramSnapshot, LatencyHistogram};
pub use reservoir::{Percentiles, Reservoir};

use std::time::Instant;

use serde::Serialize;

use crate::map::Telemetry;

pub const SCHEMA: &str = "metrics.v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Put,
    Get,
    Del,
}

impl OpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Put => "put",
            OpKind::Get => "get",
            OpKind::Del => "del",
        }
    }
}

/// Engine-lifecycle events recorded during a tick window, in occurrence
/// order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Migration finished; the hybrid now serves from `to`.
    Switch { from: String, to: String },
    /// Robin Hood tombstone compaction finished.
    Compaction {
        backend: String,
        capacity_before: usize,
        capacity_after: usize,
    },
    /// A table doubled its slot array.
    Resize {
        backend: String,
        capacity_before: usize,
        capacity_after: usize,
    },
    /// Replay finished cleanly.
    Complete,
}

/// A watchdog observation included in the tick `alerts` list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub severity: String,
    pub backend: String,
    pub message: String,
}

impl Alert {
    pub fn warn(metric: &str, value: f64, threshold: f64, backend: &str) -> Self {
        Self {
            metric: metric.to_string(),
            value,
            threshold,
            severity: "warn".to_string(),
            backend: backend.to_string(),
            message: format!("{metric} {value:.4} exceeded warn threshold {threshold}"),
        }
    }

    pub fn error(metric: &str, backend: &str, message: impl Into<String>) -> Self {
        Self {
            metric: metric.to_string(),
            value: 0.0,
            threshold: 0.0,
            severity: "error".to_string(),
            backend: backend.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OpsByType {
    pub put: u64,
    pub get: u64,
    pub del: u64,
}

/// Latency percentile summaries per op kind; absent kinds had no
/// sampled observations yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub put: Option<Percentiles>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub get: Option<Percentiles>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub del: Option<Percentiles>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall: Option<Percentiles>,
}

/// One periodic metrics record. Serialized verbatim into the NDJSON
/// stream and served as the latest-tick JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsTick {
    pub schema: &'static str,
    /// Seconds since replay start; monotonically non-decreasing.
    pub t: f64,
    pub backend: String,
    pub ops: u64,
    pub ops_by_type: OpsByType,
    pub migrations: u64,
    pub compactions: u64,
    pub load_factor: f64,
    /// Longest chaining group. Open-addressed back-ends have no group
    /// bound, and JSON has no infinity literal, so they report `null`.
    pub max_group_len: Option<usize>,
    pub avg_probe_estimate: f64,
    pub tombstone_ratio: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub probe_hist: Vec<(u32, u64)>,
    pub latency_ms: LatencyBlock,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_hist_ms: Option<HistogramSnapshot>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alerts: Vec<Alert>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EngineEvent>,
}

/// Warn-level thresholds the aggregator checks at tick time.
#[derive(Debug, Clone, Copy, Default)]
pub struct WarnThresholds {
    pub load_factor: Option<f64>,
    pub avg_probe: Option<f64>,
    pub tombstone_ratio: Option<f64>,
}

/// Accumulates counters and latency samples across a replay run and
/// builds tick records on demand.
pub struct MetricsAggregator {
    started: Instant,
    ops: u64,
    by_type: OpsByType,
    put_lat: Reservoir,
    get_lat: Reservoir,
    del_lat: Reservoir,
    overall_lat: Reservoir,
    hist: LatencyHistogram,
    warn: WarnThresholds,
    last_t: f64,
}

/// Seed for the reservoir RNGs; latency values are timing-derived and
/// excluded from the determinism contract, so a fixed seed suffices.
const RESERVOIR_SEED: u64 = 0x5eed_0ff1_ce01;

impl MetricsAggregator {
    pub fn new(reservoir_size: usize, preset: BucketPreset, warn: WarnThresholds) -> Self {
        Self {
            started: Instant::now(),
            ops: 0,
            by_type: OpsByType::default(),
            put_lat: Reservoir::new(reservoir_size, RESERVOIR_SEED),
            get_lat: Reservoir::new(reservoir_size, RESERVOIR_SEED ^ 1),
            del_lat: Reservoir::new(reservoir_size, RESERVOIR_SEED ^ 2),
            overall_lat: Reservoir::new(reservoir_size, RESERVOIR_SEED ^ 3),
            hist: LatencyHistogram::new(preset),
            warn,
            last_t: 0.0,
        }
    }

    pub fn record_op(&mut self, kind: OpKind) {
        self.ops += 1;
        match kind {
            OpKind::Put => self.by_type.put += 1,
            OpKind::Get => self.by_type.get += 1,
            OpKind::Del => self.by_type.del += 1,
        }
    }

    /// Feed one sampled latency observation (milliseconds).
    pub fn observe_latency(&mut self, kind: OpKind, ms: f64) {
        match kind {
            OpKind::Put => self.put_lat.observe(ms),
            OpKind::Get => self.get_lat.observe(ms),
            OpKind::Del => self.del_lat.observe(ms),
        }
        self.overall_lat.observe(ms);
        self.hist.observe(ms);
    }

    pub fn ops(&self) -> u64 {
        self.ops
    }

    pub fn ops_by_type(&self) -> OpsByType {
        self.by_type
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn overall_percentiles(&self) -> Option<Percentiles> {
        self.overall_lat.percentiles()
    }

    pub fn latency_block(&self) -> LatencyBlock {
        LatencyBlock {
            put: self.put_lat.percentiles(),
            get: self.get_lat.percentiles(),
            del: self.del_lat.percentiles(),
            overall: self.overall_lat.percentiles(),
        }
    }

    fn watchdog_alerts(&self, telemetry: &Telemetry) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let backend = telemetry.backend.name();
        if let Some(limit) = self.warn.load_factor {
            if telemetry.load_factor > limit {
                alerts.push(Alert::warn("load_factor", telemetry.load_factor, limit, backend));
            }
        }
        if let Some(limit) = self.warn.avg_probe {
            if telemetry.avg_probe > limit {
                alerts.push(Alert::warn("avg_probe", telemetry.avg_probe, limit, backend));
            }
        }
        if let Some(limit) = self.warn.tombstone_ratio {
            if telemetry.tombstone_ratio > limit {
                alerts.push(Alert::warn(
                    "tombstone_ratio",
                    telemetry.tombstone_ratio,
                    limit,
                    backend,
                ));
            }
        }
        alerts
    }

    /// Build the tick record for the window that just closed.
    pub fn build_tick(
        &mut self,
        telemetry: &Telemetry,
        migrations: u64,
        compactions: u64,
        mut alerts: Vec<Alert>,
        events: Vec<EngineEvent>,
    ) -> MetricsTick {
        let t = self.elapsed_secs().max(self.last_t);
        self.last_t = t;
        let watchdog = self.watchdog_alerts(telemetry);
        for alert in &watchdog {
            tracing::warn!(
                metric = %alert.metric,
                value = alert.value,
                threshold = alert.threshold,
                backend = %alert.backend,
                "watchdog threshold exceeded"
            );
        }
        alerts.extend(watchdog);
        MetricsTick {
            schema: SCHEMA,
            t,
            backend: telemetry.backend.name().to_string(),
            ops: self.ops,
            ops_by_type: self.by_type,
            migrations,
            compactions,
            // A pinned chained table can pack past its nominal capacity;
            // the tick field is contractually within [0, 1].
            load_factor: telemetry.load_factor.clamp(0.0, 1.0),
            max_group_len: telemetry.max_group_len,
            avg_probe_estimate: telemetry.avg_probe,
            tombstone_ratio: telemetry.tombstone_ratio,
            probe_hist: telemetry.probe_hist.clone(),
            latency_ms: self.latency_block(),
            latency_hist_ms: Some(self.hist.snapshot()),
            alerts,
            events,
        }
    }

    pub fn histogram(&self) -> &LatencyHistogram {
        &self.hist
    }
}
