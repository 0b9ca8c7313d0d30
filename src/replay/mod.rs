#![forbid(unsafe_code)]

//! CSV replay driver: validates a workload trace, executes it against an
//! engine, and emits periodic metric ticks.
//!
//! The driver thread owns the map; the metrics surface only ever sees
//! published tick snapshots. Ticks fire on operation-count boundaries so
//! the tick sequence is deterministic for a given input; only
//! timing-derived fields (`t`, latencies) vary between runs.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use csv::{Reader, ReaderBuilder, StringRecord};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{EngineConfig, EngineMode};
use crate::error::{EngineError, Result};
use crate::map::{Backend, ChainingMap, HybridAdaptiveMap, RobinHoodMap};
use crate::metrics::{
    BucketPreset, EngineEvent, LatencyBlock, MetricsAggregator, MetricsTick, OpKind, OpsByType,
    WarnThresholds,
};
use crate::server::{self, SharedTick};
use crate::snapshot::{read_snapshot, write_snapshot, SnapshotOwned, SnapshotRef};

const NDJSON_FILE: &str = "metrics.ndjson";

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub csv: PathBuf,
    pub mode: EngineMode,
    pub config: EngineConfig,
    pub snapshot_in: Option<PathBuf>,
    pub snapshot_out: Option<PathBuf>,
    pub compress: bool,
    pub metrics_out_dir: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    pub json_summary_out: Option<PathBuf>,
    /// Reservoir size per op kind (`latency-sample-k`).
    pub reservoir_size: usize,
    /// Time every n-th operation (`latency-sample-every`).
    pub sample_every: u64,
    /// Proactive compaction period in seconds.
    pub compact_interval: Option<f64>,
    pub dry_run: bool,
    /// Row clamp; 0 disables.
    pub max_rows: u64,
    /// Byte clamp; 0 disables.
    pub max_bytes: u64,
    pub buckets: BucketPreset,
    pub tick_every_ops: u64,
    pub metrics_max_ticks: usize,
}

impl ReplayOptions {
    pub fn new(csv: PathBuf, mode: EngineMode, config: EngineConfig) -> Self {
        Self {
            csv,
            mode,
            config,
            snapshot_in: None,
            snapshot_out: None,
            compress: false,
            metrics_out_dir: None,
            metrics_port: None,
            json_summary_out: None,
            reservoir_size: 512,
            sample_every: 32,
            compact_interval: None,
            dry_run: false,
            max_rows: 0,
            max_bytes: 0,
            buckets: BucketPreset::Default,
            tick_every_ops: 10_000,
            metrics_max_ticks: 512,
        }
    }
}

/// Envelope returned by `--dry-run`: validation outcome only.
#[derive(Debug, Clone, Serialize)]
pub struct DryRunReport {
    pub rows: u64,
    pub puts: u64,
    pub gets: u64,
    pub dels: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    pub rows: u64,
    pub ops: u64,
    pub ops_by_type: OpsByType,
    pub elapsed_secs: f64,
    pub ops_per_second: f64,
    pub backend: String,
    pub state: String,
    pub final_size: usize,
    pub migrations: u64,
    pub compactions: u64,
    pub latency_ms: LatencyBlock,
    pub ticks: u64,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_out: Option<String>,
}

/// Winner report for `profile`.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileReport {
    pub rows_sampled: u64,
    pub chaining_ms: f64,
    pub robinhood_ms: f64,
    pub winner_mode: String,
}

fn open_reader(path: &Path) -> Result<Reader<File>> {
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(file);
    let headers = reader.headers().map_err(EngineError::from)?;
    let expected = ["op", "key", "value"];
    let actual: Vec<&str> = headers.iter().collect();
    if actual != expected {
        return Err(EngineError::bad_input(format!(
            "row 1: header must be exactly \"op,key,value\", found \"{}\"",
            actual.join(",")
        )));
    }
    Ok(reader)
}

fn parse_row(record: &StringRecord, row: u64) -> Result<(OpKind, String, String)> {
    if record.len() != 3 {
        return Err(EngineError::bad_input(format!(
            "row {row}: expected 3 columns (op,key,value), found {}",
            record.len()
        )));
    }
    let kind = match record[0].to_ascii_lowercase().as_str() {
        "put" => OpKind::Put,
        "get" => OpKind::Get,
        "del" => OpKind::Del,
        other => {
            return Err(EngineError::bad_input(format!(
                "row {row}, column 1 (op): unknown operation \"{other}\""
            )));
        }
    };
    let key = &record[1];
    if key.is_empty() {
        return Err(EngineError::bad_input(format!(
            "row {row}, column 2 (key): key must be non-empty"
        )));
    }
    let value = &record[2];
    match kind {
        OpKind::Put if value.is_empty() => {
            return Err(EngineError::bad_input(format!(
                "row {row}, column 3 (value): put requires a non-empty value"
            )));
        }
        OpKind::Get | OpKind::Del if !value.is_empty() => {
            return Err(EngineError::bad_input(format!(
                "row {row}, column 3 (value): {} must have an empty value",
                kind.as_str()
            )));
        }
        _ => {}
    }
    Ok((kind, key.to_string(), value.to_string()))
}

fn check_clamps(rows: u64, bytes: u64, options: &ReplayOptions) -> Result<()> {
    if options.max_rows > 0 && rows > options.max_rows {
        return Err(EngineError::bad_input(format!(
            "csv exceeds the row clamp of {} rows",
            options.max_rows
        )));
    }
    if options.max_bytes > 0 && bytes > options.max_bytes {
        return Err(EngineError::bad_input(format!(
            "csv exceeds the byte clamp of {} bytes",
            options.max_bytes
        )));
    }
    Ok(())
}

/// Validate the whole trace without touching a map or any sink.
pub fn dry_run(options: &ReplayOptions) -> Result<DryRunReport> {
    let mut reader = open_reader(&options.csv)?;
    let mut report = DryRunReport {
        rows: 0,
        puts: 0,
        gets: 0,
        dels: 0,
    };
    let mut record = StringRecord::new();
    while reader.read_record(&mut record).map_err(EngineError::from)? {
        report.rows += 1;
        check_clamps(report.rows, reader.position().byte(), options)?;
        let (kind, _, _) = parse_row(&record, report.rows + 1)?;
        match kind {
            OpKind::Put => report.puts += 1,
            OpKind::Get => report.gets += 1,
            OpKind::Del => report.dels += 1,
        }
    }
    Ok(report)
}

fn build_engine(options: &ReplayOptions) -> Result<HybridAdaptiveMap> {
    match &options.snapshot_in {
        Some(path) => engine_from_snapshot(path, options.mode, options.config.clone()),
        None => HybridAdaptiveMap::new(options.config.clone().apply_mode(options.mode)),
    }
}

/// Rehydrate an engine from any snapshot payload. Bare back-ends are
/// wrapped under the caller's configuration; a hybrid payload keeps its
/// own guardrails with the selected mode's pinning applied on top.
pub fn engine_from_snapshot(
    path: &Path,
    mode: EngineMode,
    config: EngineConfig,
) -> Result<HybridAdaptiveMap> {
    let config = config.apply_mode(mode);
    let (owned, _) = read_snapshot(path)?;
    info!(path = %path.display(), kind = owned.kind(), "resuming from snapshot");
    match owned {
        SnapshotOwned::Chaining(map) => {
            Ok(HybridAdaptiveMap::with_active(config, Backend::Chaining(map)))
        }
        SnapshotOwned::RobinHood(map) => Ok(HybridAdaptiveMap::with_active(
            config,
            Backend::RobinHood(map),
        )),
        SnapshotOwned::Hybrid(mut map) => {
            let carried = map.config().clone().apply_mode(mode);
            map.reconfigure(carried)?;
            Ok(map)
        }
    }
}

struct NdjsonSink {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl NdjsonSink {
    fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(NDJSON_FILE);
        let file = File::create(&path)?;
        info!(path = %path.display(), "tick stream opened");
        Ok(Self {
            writer: BufWriter::new(file),
            path,
        })
    }

    /// Append one tick. A failed write aborts the run; ticks are never
    /// dropped silently.
    fn append(&mut self, tick: &MetricsTick) -> Result<()> {
        let line = serde_json::to_string(tick)
            .map_err(|e| EngineError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        let write = |w: &mut BufWriter<File>| -> std::io::Result<()> {
            w.write_all(line.as_bytes())?;
            w.write_all(b"\n")?;
            w.flush()
        };
        write(&mut self.writer).map_err(|e| {
            EngineError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {e}", self.path.display()),
            ))
        })
    }
}

struct TickPipeline {
    aggregator: MetricsAggregator,
    sink: Option<NdjsonSink>,
    shared: Option<Arc<SharedTick>>,
    ring: std::collections::VecDeque<Arc<MetricsTick>>,
    ring_cap: usize,
    emitted: u64,
}

impl TickPipeline {
    fn emit(
        &mut self,
        engine: &mut HybridAdaptiveMap,
        extra_events: Vec<EngineEvent>,
    ) -> Result<()> {
        let mut events = engine.take_events();
        events.extend(extra_events);
        let alerts = engine.take_alerts();
        let tick = self.aggregator.build_tick(
            &engine.telemetry(),
            engine.migrations(),
            engine.compactions(),
            alerts,
            events,
        );
        let tick = Arc::new(tick);
        if let Some(sink) = &mut self.sink {
            sink.append(&tick)?;
        }
        if let Some(shared) = &self.shared {
            shared.publish(tick.clone());
        }
        if self.ring.len() == self.ring_cap {
            self.ring.pop_front();
        }
        self.ring.push_back(tick);
        self.emitted += 1;
        Ok(())
    }
}

fn spawn_signal_listener() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let observer = flag.clone();
    let spawned = std::thread::Builder::new()
        .name("flexmap-signals".to_string())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build();
            if let Ok(runtime) = runtime {
                if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
                    warn!("interrupt received; finishing the current tick");
                    observer.store(true, Ordering::SeqCst);
                }
            }
        });
    if spawned.is_err() {
        warn!("signal listener could not start; cancellation disabled");
    }
    flag
}

/// Choose the payload shape for persisting an engine: bare back-ends for
/// pinned modes at rest, the full hybrid record otherwise (adaptive mode
/// or a transition still in flight).
pub fn snapshot_view<'a>(
    engine: &'a HybridAdaptiveMap,
    mode: EngineMode,
) -> SnapshotRef<'a> {
    let (_, active, transition) = engine.snapshot_parts();
    if matches!(mode, EngineMode::Adaptive) || transition.is_some() {
        return SnapshotRef::Hybrid(engine);
    }
    match active {
        Backend::Chaining(map) => SnapshotRef::Chaining(map),
        Backend::RobinHood(map) => SnapshotRef::RobinHood(map),
    }
}

/// Execute a validated trace in file order, ticking every
/// `tick_every_ops` operations and once more at the end.
pub fn run(options: &ReplayOptions) -> Result<ReplaySummary> {
    if options.dry_run {
        return Err(EngineError::bad_input(
            "run() called in dry-run mode; use dry_run()",
        ));
    }
    let mut reader = open_reader(&options.csv)?;
    let mut engine = build_engine(options)?;

    let warn_thresholds = {
        let config = engine.config();
        WarnThresholds {
            load_factor: config.load_factor_warn,
            avg_probe: config.avg_probe_warn,
            tombstone_ratio: config.tombstone_ratio_warn,
        }
    };
    let mut pipeline = TickPipeline {
        aggregator: MetricsAggregator::new(options.reservoir_size, options.buckets, warn_thresholds),
        sink: match &options.metrics_out_dir {
            Some(dir) => Some(NdjsonSink::create(dir)?),
            None => None,
        },
        shared: None,
        ring: std::collections::VecDeque::new(),
        ring_cap: options.metrics_max_ticks.max(1),
        emitted: 0,
    };
    if let Some(port) = options.metrics_port {
        let shared = Arc::new(SharedTick::new());
        server::spawn(port, shared.clone())?;
        pipeline.shared = Some(shared);
    }

    let cancelled = spawn_signal_listener();
    let started = Instant::now();
    let mut last_compaction_check = Instant::now();
    let mut rows = 0u64;
    let mut was_cancelled = false;
    let sample_every = options.sample_every.max(1);

    let mut record = StringRecord::new();
    while reader.read_record(&mut record).map_err(EngineError::from)? {
        if cancelled.load(Ordering::SeqCst) {
            was_cancelled = true;
            break;
        }
        rows += 1;
        check_clamps(rows, reader.position().byte(), options)?;
        let (kind, key, value) = parse_row(&record, rows + 1)?;

        let timer = (pipeline.aggregator.ops() % sample_every == 0).then(Instant::now);
        match kind {
            OpKind::Put => {
                engine.put(key.as_bytes(), value.as_bytes())?;
            }
            OpKind::Get => {
                engine.get(key.as_bytes())?;
            }
            OpKind::Del => {
                engine.delete(key.as_bytes())?;
            }
        }
        if let Some(t0) = timer {
            pipeline
                .aggregator
                .observe_latency(kind, t0.elapsed().as_secs_f64() * 1e3);
        }
        pipeline.aggregator.record_op(kind);

        if let Some(interval) = options.compact_interval {
            if last_compaction_check.elapsed().as_secs_f64() >= interval {
                last_compaction_check = Instant::now();
                if engine.request_compaction()? {
                    info!("proactive compaction scheduled");
                }
            }
        }

        if pipeline.aggregator.ops() % options.tick_every_ops == 0 {
            pipeline.emit(&mut engine, Vec::new())?;
        }
    }

    // A clean run comes to rest before the final tick; cancellation
    // keeps the mid-transition state (it is snapshot-recoverable).
    if !was_cancelled {
        engine.drain_to_steady()?;
    }
    // Final tick: flush whatever the last window accumulated, with a
    // completion marker only on a clean run.
    let final_events = if was_cancelled {
        Vec::new()
    } else {
        vec![EngineEvent::Complete]
    };
    pipeline.emit(&mut engine, final_events)?;

    let elapsed = started.elapsed().as_secs_f64();
    let ops = pipeline.aggregator.ops();
    let mut summary = ReplaySummary {
        rows,
        ops,
        ops_by_type: pipeline.aggregator.ops_by_type(),
        elapsed_secs: elapsed,
        ops_per_second: if elapsed > 0.0 {
            ops as f64 / elapsed
        } else {
            0.0
        },
        backend: engine.backend_kind().name().to_string(),
        state: engine.state_name().to_string(),
        final_size: engine.len(),
        migrations: engine.migrations(),
        compactions: engine.compactions(),
        latency_ms: pipeline.aggregator.latency_block(),
        ticks: pipeline.emitted,
        cancelled: was_cancelled,
        snapshot_out: None,
    };

    if let Some(out) = &options.snapshot_out {
        write_snapshot(out, snapshot_view(&engine, options.mode), options.compress)?;
        summary.snapshot_out = Some(out.display().to_string());
    }
    if let Some(path) = &options.json_summary_out {
        let mut file = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut file, &summary)
            .map_err(|e| EngineError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        file.write_all(b"\n")?;
        file.flush()?;
    }
    info!(
        ops = summary.ops,
        backend = %summary.backend,
        migrations = summary.migrations,
        compactions = summary.compactions,
        "replay finished"
    );
    Ok(summary)
}

/// Time a small prefix of the trace against both concrete back-ends and
/// name the faster mode.
pub fn profile(csv: &Path, sample_ops: u64, config: &EngineConfig) -> Result<ProfileReport> {
    let mut reader = open_reader(csv)?;
    let mut prefix: Vec<(OpKind, String, String)> = Vec::new();
    let mut record = StringRecord::new();
    let mut rows = 0u64;
    while rows < sample_ops && reader.read_record(&mut record).map_err(EngineError::from)? {
        rows += 1;
        prefix.push(parse_row(&record, rows + 1)?);
    }
    if prefix.is_empty() {
        return Err(EngineError::bad_input("csv has no data rows to profile"));
    }

    let chaining_ms = {
        let mut map = ChainingMap::new(config.initial_buckets, config.groups_per_bucket)?;
        let t0 = Instant::now();
        for (kind, key, value) in &prefix {
            match kind {
                OpKind::Put => {
                    map.put(key.as_bytes(), value.as_bytes());
                }
                OpKind::Get => {
                    map.get(key.as_bytes());
                }
                OpKind::Del => {
                    map.delete(key.as_bytes());
                }
            }
        }
        t0.elapsed().as_secs_f64() * 1e3
    };
    let robinhood_ms = {
        let mut map = RobinHoodMap::new(config.initial_capacity_rh)?;
        let t0 = Instant::now();
        for (kind, key, value) in &prefix {
            match kind {
                OpKind::Put => {
                    map.put(key.as_bytes(), value.as_bytes())?;
                }
                OpKind::Get => {
                    map.get(key.as_bytes());
                }
                OpKind::Del => {
                    map.delete(key.as_bytes());
                }
            }
        }
        t0.elapsed().as_secs_f64() * 1e3
    };

    let winner_mode = if chaining_ms <= robinhood_ms {
        "fast-insert"
    } else {
        "fast-lookup"
    };
    Ok(ProfileReport {
        rows_sampled: rows,
        chaining_ms,
        robinhood_ms,
        winner_mode: winner_mode.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::{generate_into, WorkloadSpec};
    use tempfile::TempDir;

    fn write_csv(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    fn workload_csv(dir: &TempDir, ops: u64, seed: u64) -> PathBuf {
        let spec = WorkloadSpec {
            ops,
            read_ratio: 0.5,
            key_skew: 0.0,
            key_space: 500,
            adversarial_ratio: 0.0,
            adversarial_lowbits: 8,
            seed,
        };
        let mut buf = Vec::new();
        generate_into(spec, &mut buf).unwrap();
        let path = dir.path().join("workload.csv");
        fs::write(&path, buf).unwrap();
        path
    }

    fn options(csv: PathBuf) -> ReplayOptions {
        let mut options =
            ReplayOptions::new(csv, EngineMode::Adaptive, EngineConfig::default());
        options.tick_every_ops = 1000;
        options
    }

    #[test]
    fn dry_run_counts_without_mutating() {
        let dir = TempDir::new().unwrap();
        let csv = write_csv(
            &dir,
            "ok.csv",
            "op,key,value\nput,a,1\nget,a,\ndel,a,\nPUT,b,2\n",
        );
        let report = dry_run(&options(csv)).unwrap();
        assert_eq!(report.rows, 4);
        assert_eq!(report.puts, 2);
        assert_eq!(report.gets, 1);
        assert_eq!(report.dels, 1);
    }

    #[test]
    fn bad_header_is_rejected_with_diagnostics() {
        let dir = TempDir::new().unwrap();
        let csv = write_csv(&dir, "bad.csv", "op,key,value,extra\nput,a,1,x\n");
        let err = dry_run(&options(csv)).unwrap_err();
        assert_eq!(err.kind(), "BadInput");
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn row_errors_carry_row_and_column() {
        let dir = TempDir::new().unwrap();
        for (body, needle) in [
            ("op,key,value\nput,a,\n", "column 3"),
            ("op,key,value\nget,a,oops\n", "column 3"),
            ("op,key,value\nput,,v\n", "column 2"),
            ("op,key,value\nfrob,a,\n", "column 1"),
            ("op,key,value\nput,a\n", "2"),
        ] {
            let csv = write_csv(&dir, "case.csv", body);
            let err = dry_run(&options(csv)).unwrap_err();
            assert_eq!(err.kind(), "BadInput", "{body}");
            assert!(err.to_string().contains(needle), "{body}: {err}");
            assert!(err.to_string().contains("row 2"), "{body}: {err}");
        }
    }

    #[test]
    fn row_clamp_is_enforced() {
        let dir = TempDir::new().unwrap();
        let csv = write_csv(&dir, "big.csv", "op,key,value\nput,a,1\nput,b,2\nput,c,3\n");
        let mut opts = options(csv);
        opts.max_rows = 2;
        assert_eq!(dry_run(&opts).unwrap_err().kind(), "BadInput");
        opts.max_rows = 0;
        assert!(dry_run(&opts).is_ok());
    }

    #[test]
    fn replay_executes_in_order_and_reports() {
        let dir = TempDir::new().unwrap();
        let csv = write_csv(
            &dir,
            "trace.csv",
            "op,key,value\nput,a,1\nput,b,2\nput,a,3\ndel,b,\nget,a,\n",
        );
        let summary = run(&options(csv)).unwrap();
        assert_eq!(summary.ops, 5);
        assert_eq!(summary.ops_by_type.put, 3);
        assert_eq!(summary.final_size, 1);
        assert_eq!(summary.backend, "chaining");
        assert!(!summary.cancelled);
        assert!(summary.ticks >= 1);
    }

    #[test]
    fn ndjson_ticks_are_valid_json_lines() {
        let dir = TempDir::new().unwrap();
        let csv = workload_csv(&dir, 5000, 7);
        let mut opts = options(csv);
        opts.metrics_out_dir = Some(dir.path().join("metrics"));
        opts.tick_every_ops = 500;
        let summary = run(&opts).unwrap();
        let text = fs::read_to_string(dir.path().join("metrics").join(NDJSON_FILE)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len() as u64, summary.ticks);
        let mut last_t = -1.0f64;
        let mut last_ops = 0u64;
        for line in lines {
            let tick: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(tick["schema"], "metrics.v1");
            let t = tick["t"].as_f64().unwrap();
            assert!(t >= last_t);
            last_t = t;
            let ops = tick["ops"].as_u64().unwrap();
            assert!(ops >= last_ops);
            last_ops = ops;
        }
        // Final line carries the completion marker.
        let final_tick: serde_json::Value =
            serde_json::from_str(text.lines().last().unwrap()).unwrap();
        let events = final_tick["events"].as_array().unwrap();
        assert!(events.iter().any(|e| e["type"] == "complete"));
    }

    #[test]
    fn snapshot_roundtrip_resumes_identically() {
        let dir = TempDir::new().unwrap();
        let csv = workload_csv(&dir, 4000, 11);

        // One-pass baseline.
        let one_pass = run(&options(csv.clone())).unwrap();

        // Two halves of the same trace.
        let text = fs::read_to_string(&csv).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        let rows: Vec<&str> = lines.collect();
        let (first, second) = rows.split_at(rows.len() / 2);
        let half1 = write_csv(&dir, "h1.csv", &format!("{header}\n{}\n", first.join("\n")));
        let half2 = write_csv(&dir, "h2.csv", &format!("{header}\n{}\n", second.join("\n")));

        let snap = dir.path().join("mid.snap");
        let mut opts1 = options(half1);
        opts1.snapshot_out = Some(snap.clone());
        opts1.compress = true;
        run(&opts1).unwrap();

        let mut opts2 = options(half2);
        opts2.snapshot_in = Some(snap);
        let resumed = run(&opts2).unwrap();

        assert_eq!(resumed.final_size, one_pass.final_size);
    }

    #[test]
    fn profile_picks_a_winner() {
        let dir = TempDir::new().unwrap();
        let csv = workload_csv(&dir, 3000, 5);
        let report = profile(&csv, 1000, &EngineConfig::default()).unwrap();
        assert_eq!(report.rows_sampled, 1000);
        assert!(["fast-insert", "fast-lookup"].contains(&report.winner_mode.as_str()));
    }
}
