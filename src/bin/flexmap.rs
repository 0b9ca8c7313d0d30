//! Binary entry point for the flexmap CLI.
#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;

use flexmap::config::{EngineConfig, EngineMode};
use flexmap::error::{EngineError, Result};
use flexmap::metrics::BucketPreset;
use flexmap::replay::{self, ReplayOptions};
use flexmap::snapshot::{self, write_snapshot};
use flexmap::workload::{self, WorkloadSpec};
use flexmap::HybridAdaptiveMap;

#[derive(Parser, Debug)]
#[command(
    name = "flexmap",
    version,
    about = "Adaptive in-memory key-value store and workload replayer",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = ModeArg::Adaptive,
        help = "Back-end selection mode"
    )]
    mode: ModeArg,

    #[arg(
        long,
        global = true,
        env = "FLEXMAP_CONFIG",
        value_name = "FILE",
        help = "TOML configuration file (map shape and guardrails)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Emit structured JSON envelopes on stdout"
    )]
    json: bool,

    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Verbose engine logging on stderr"
    )]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    /// Pin the chained table (insert-heavy workloads).
    FastInsert,
    /// Pin the Robin Hood table (read-heavy workloads).
    FastLookup,
    /// Alias of fast-insert: the chained table is the denser layout.
    MemoryTight,
    /// Let the guardrails drive migration.
    Adaptive,
}

impl From<ModeArg> for EngineMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::FastInsert => EngineMode::FastInsert,
            ModeArg::FastLookup => EngineMode::FastLookup,
            ModeArg::MemoryTight => EngineMode::MemoryTight,
            ModeArg::Adaptive => EngineMode::Adaptive,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BucketsArg {
    /// Millisecond-scale latency bins.
    Default,
    /// Microsecond-scale bins for sub-millisecond workloads.
    Micro,
}

impl From<BucketsArg> for BucketPreset {
    fn from(arg: BucketsArg) -> Self {
        match arg {
            BucketsArg::Default => BucketPreset::Default,
            BucketsArg::Micro => BucketPreset::Micro,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Insert one pair into a one-shot map.
    Put {
        key: String,
        value: String,
        #[arg(long, value_name = "FILE", help = "Load/store the map as a snapshot")]
        snapshot: Option<PathBuf>,
        #[arg(long, help = "Gzip the written snapshot")]
        compress: bool,
    },
    /// Look one key up in a one-shot map.
    Get {
        key: String,
        #[arg(long, value_name = "FILE")]
        snapshot: Option<PathBuf>,
    },
    /// Delete one key from a one-shot map.
    Del {
        key: String,
        #[arg(long, value_name = "FILE")]
        snapshot: Option<PathBuf>,
        #[arg(long)]
        compress: bool,
    },
    /// Enumerate all pairs of a one-shot map.
    Items {
        #[arg(long, value_name = "FILE")]
        snapshot: Option<PathBuf>,
    },
    /// Synthesize a deterministic workload CSV.
    GenerateCsv(GenerateCsvCmd),
    /// Time a trace prefix on both back-ends and print the winner.
    Profile(ProfileCmd),
    /// Execute a workload CSV with metric ticks.
    RunCsv(RunCsvCmd),
    /// Validate a snapshot, optionally repairing it.
    VerifySnapshot(VerifySnapshotCmd),
    /// Compact a RobinHood snapshot offline.
    CompactSnapshot(CompactSnapshotCmd),
}

#[derive(Args, Debug)]
struct GenerateCsvCmd {
    #[arg(value_name = "OUTFILE")]
    outfile: PathBuf,

    #[arg(long, default_value_t = 100_000)]
    ops: u64,

    #[arg(long, default_value_t = 0.8, help = "Share of get operations")]
    read_ratio: f64,

    #[arg(long, default_value_t = 0.0, help = "Zipf exponent; 0 = uniform")]
    key_skew: f64,

    #[arg(long, default_value_t = 20_000, help = "Distinct key count")]
    key_space: u64,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(
        long,
        default_value_t = 0.0,
        help = "Fraction of operations drawn from a low-bits-collision family"
    )]
    adversarial_ratio: f64,

    #[arg(long, default_value_t = 8, help = "Low hash bits the family shares")]
    adversarial_lowbits: u32,
}

#[derive(Args, Debug)]
struct ProfileCmd {
    #[arg(value_name = "CSV")]
    csv: PathBuf,

    #[arg(long, default_value_t = 5000, help = "Prefix rows to time")]
    sample_ops: u64,

    /// Re-dispatch these arguments with --mode set to the winner,
    /// e.g. `--then run-csv trace.csv --metrics-out-dir out`.
    #[arg(long = "then", num_args = 1.., allow_hyphen_values = true, value_name = "ARGS")]
    then: Vec<String>,
}

#[derive(Args, Debug)]
struct RunCsvCmd {
    #[arg(value_name = "CSV")]
    csv: PathBuf,

    #[arg(long, help = "Serve /metrics and /metrics.json on this port")]
    metrics_port: Option<u16>,

    #[arg(long, value_name = "DIR", help = "Append tick NDJSON under this directory")]
    metrics_out_dir: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Write the aggregate summary JSON here")]
    json_summary_out: Option<PathBuf>,

    #[arg(long, value_name = "FILE")]
    snapshot_in: Option<PathBuf>,

    #[arg(long, value_name = "FILE")]
    snapshot_out: Option<PathBuf>,

    #[arg(long, help = "Gzip the written snapshot")]
    compress: bool,

    #[arg(long, default_value_t = 512, help = "Latency reservoir size per op kind")]
    latency_sample_k: usize,

    #[arg(long, default_value_t = 32, help = "Time every n-th operation")]
    latency_sample_every: u64,

    #[arg(long, value_name = "SECS", help = "Proactive compaction period")]
    compact_interval: Option<f64>,

    #[arg(long, help = "Validate the CSV without executing it")]
    dry_run: bool,

    #[arg(long, default_value_t = 0, help = "Reject traces longer than this; 0 disables")]
    csv_max_rows: u64,

    #[arg(long, default_value_t = 0, help = "Reject traces larger than this; 0 disables")]
    csv_max_bytes: u64,

    #[arg(long, value_enum, default_value_t = BucketsArg::Default)]
    latency_buckets: BucketsArg,

    #[arg(long, default_value_t = 10_000, help = "Operations per metric tick")]
    tick_every_ops: u64,

    #[arg(long, default_value_t = 512, help = "In-memory tick ring size")]
    metrics_max_ticks: usize,
}

#[derive(Args, Debug)]
struct VerifySnapshotCmd {
    #[arg(long = "in", value_name = "FILE")]
    input: PathBuf,

    #[arg(long, help = "Compact a RobinHood payload and rewrite the snapshot")]
    repair: bool,

    #[arg(long, value_name = "FILE", help = "Repair destination; defaults to --in")]
    out: Option<PathBuf>,

    #[arg(long, help = "Also print advisory findings in text output")]
    verbose: bool,
}

#[derive(Args, Debug)]
struct CompactSnapshotCmd {
    #[arg(long = "in", value_name = "FILE")]
    input: PathBuf,

    #[arg(long, value_name = "FILE")]
    out: PathBuf,

    #[arg(long, help = "Gzip the output; default keeps the input framing")]
    compress: bool,
}

fn main() {
    let cli = Cli::parse();
    flexmap::logging::init(cli.verbose);
    if let Err(err) = run(cli) {
        let mut envelope = serde_json::json!({
            "error": err.kind(),
            "detail": err.to_string(),
        });
        if let Some(hint) = err.hint() {
            envelope["hint"] = hint.into();
        }
        eprintln!("{envelope}");
        process::exit(err.exit_code());
    }
}

fn run(cli: Cli) -> Result<()> {
    let mode = EngineMode::from(cli.mode);
    let config = EngineConfig::load(cli.config.as_deref())?;
    let json = cli.json;
    match cli.command {
        Command::Put {
            key,
            value,
            snapshot,
            compress,
        } => cmd_put(mode, config, json, &key, &value, snapshot.as_deref(), compress),
        Command::Get { key, snapshot } => cmd_get(mode, config, json, &key, snapshot.as_deref()),
        Command::Del {
            key,
            snapshot,
            compress,
        } => cmd_del(mode, config, json, &key, snapshot.as_deref(), compress),
        Command::Items { snapshot } => cmd_items(mode, config, json, snapshot.as_deref()),
        Command::GenerateCsv(cmd) => cmd_generate_csv(json, cmd),
        Command::Profile(cmd) => cmd_profile(config, json, cmd),
        Command::RunCsv(cmd) => cmd_run_csv(mode, config, json, cmd),
        Command::VerifySnapshot(cmd) => cmd_verify_snapshot(json, cmd),
        Command::CompactSnapshot(cmd) => cmd_compact_snapshot(json, cmd),
    }
}

/// Print a command outcome: pretty JSON with `--json`, else through the
/// text printer.
fn emit<T, F>(json: bool, value: &T, printer: F) -> Result<()>
where
    T: Serialize,
    F: Fn(&T),
{
    if json {
        let rendered = serde_json::to_string_pretty(value)
            .map_err(|e| EngineError::bad_input(format!("envelope serialization: {e}")))?;
        println!("{rendered}");
    } else {
        printer(value);
    }
    Ok(())
}

fn one_shot_engine(
    mode: EngineMode,
    config: EngineConfig,
    snapshot: Option<&Path>,
) -> Result<HybridAdaptiveMap> {
    match snapshot {
        Some(path) if path.exists() => replay::engine_from_snapshot(path, mode, config),
        _ => HybridAdaptiveMap::new(config.apply_mode(mode)),
    }
}

fn persist_one_shot(
    engine: &HybridAdaptiveMap,
    mode: EngineMode,
    snapshot: Option<&Path>,
    compress: bool,
) -> Result<()> {
    if let Some(path) = snapshot {
        write_snapshot(path, replay::snapshot_view(engine, mode), compress)?;
    }
    Ok(())
}

#[derive(Serialize)]
struct MutationEnvelope {
    ok: bool,
    op: &'static str,
    key: String,
    changed: bool,
    size: usize,
    backend: String,
}

fn cmd_put(
    mode: EngineMode,
    config: EngineConfig,
    json: bool,
    key: &str,
    value: &str,
    snapshot: Option<&Path>,
    compress: bool,
) -> Result<()> {
    let mut engine = one_shot_engine(mode, config, snapshot)?;
    let newly = engine.put(key.as_bytes(), value.as_bytes())?;
    persist_one_shot(&engine, mode, snapshot, compress)?;
    let envelope = MutationEnvelope {
        ok: true,
        op: "put",
        key: key.to_string(),
        changed: newly,
        size: engine.len(),
        backend: engine.backend_kind().name().to_string(),
    };
    emit(json, &envelope, |e| {
        println!(
            "put {} ({}) size={}",
            e.key,
            if e.changed { "inserted" } else { "overwritten" },
            e.size
        );
    })
}

#[derive(Serialize)]
struct GetEnvelope {
    ok: bool,
    op: &'static str,
    key: String,
    found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

fn cmd_get(
    mode: EngineMode,
    config: EngineConfig,
    json: bool,
    key: &str,
    snapshot: Option<&Path>,
) -> Result<()> {
    let mut engine = one_shot_engine(mode, config, snapshot)?;
    let value = engine
        .get(key.as_bytes())?
        .map(|v| String::from_utf8_lossy(v).into_owned());
    let envelope = GetEnvelope {
        ok: true,
        op: "get",
        key: key.to_string(),
        found: value.is_some(),
        value,
    };
    emit(json, &envelope, |e| match &e.value {
        Some(v) => println!("{v}"),
        None => println!("(absent)"),
    })
}

fn cmd_del(
    mode: EngineMode,
    config: EngineConfig,
    json: bool,
    key: &str,
    snapshot: Option<&Path>,
    compress: bool,
) -> Result<()> {
    let mut engine = one_shot_engine(mode, config, snapshot)?;
    let removed = engine.delete(key.as_bytes())?;
    persist_one_shot(&engine, mode, snapshot, compress)?;
    let envelope = MutationEnvelope {
        ok: true,
        op: "del",
        key: key.to_string(),
        changed: removed,
        size: engine.len(),
        backend: engine.backend_kind().name().to_string(),
    };
    emit(json, &envelope, |e| {
        println!(
            "del {} ({}) size={}",
            e.key,
            if e.changed { "removed" } else { "absent" },
            e.size
        );
    })
}

#[derive(Serialize)]
struct ItemsEnvelope {
    ok: bool,
    count: usize,
    items: Vec<(String, String)>,
}

fn cmd_items(
    mode: EngineMode,
    config: EngineConfig,
    json: bool,
    snapshot: Option<&Path>,
) -> Result<()> {
    let engine = one_shot_engine(mode, config, snapshot)?;
    let items: Vec<(String, String)> = engine
        .items()
        .map(|(k, v)| {
            (
                String::from_utf8_lossy(k).into_owned(),
                String::from_utf8_lossy(v).into_owned(),
            )
        })
        .collect();
    let envelope = ItemsEnvelope {
        ok: true,
        count: items.len(),
        items,
    };
    emit(json, &envelope, |e| {
        for (k, v) in &e.items {
            println!("{k}\t{v}");
        }
        println!("({} items)", e.count);
    })
}

#[derive(Serialize)]
struct GenerateEnvelope {
    ok: bool,
    outfile: String,
    rows: u64,
    puts: u64,
    gets: u64,
    dels: u64,
}

fn cmd_generate_csv(json: bool, cmd: GenerateCsvCmd) -> Result<()> {
    let spec = WorkloadSpec {
        ops: cmd.ops,
        read_ratio: cmd.read_ratio,
        key_skew: cmd.key_skew,
        key_space: cmd.key_space,
        adversarial_ratio: cmd.adversarial_ratio,
        adversarial_lowbits: cmd.adversarial_lowbits,
        seed: cmd.seed,
    };
    let summary = workload::generate_to_path(spec, &cmd.outfile)?;
    let envelope = GenerateEnvelope {
        ok: true,
        outfile: cmd.outfile.display().to_string(),
        rows: summary.rows,
        puts: summary.puts,
        gets: summary.gets,
        dels: summary.dels,
    };
    emit(json, &envelope, |e| {
        println!(
            "wrote {} rows to {} (put={} get={} del={})",
            e.rows, e.outfile, e.puts, e.gets, e.dels
        );
    })
}

fn cmd_profile(config: EngineConfig, json: bool, cmd: ProfileCmd) -> Result<()> {
    let report = replay::profile(&cmd.csv, cmd.sample_ops, &config)?;
    emit(json, &report, |r| {
        println!(
            "profiled {} rows: chaining {:.2} ms, robinhood {:.2} ms -> {}",
            r.rows_sampled, r.chaining_ms, r.robinhood_ms, r.winner_mode
        );
    })?;
    if cmd.then.is_empty() {
        return Ok(());
    }
    let mut argv = vec![
        "flexmap".to_string(),
        "--mode".to_string(),
        report.winner_mode.clone(),
    ];
    if json {
        argv.push("--json".to_string());
    }
    argv.extend(cmd.then);
    let chained = Cli::try_parse_from(&argv)
        .map_err(|e| EngineError::bad_input(format!("--then arguments: {e}")))?;
    run(chained)
}

fn cmd_run_csv(mode: EngineMode, config: EngineConfig, json: bool, cmd: RunCsvCmd) -> Result<()> {
    let mut options = ReplayOptions::new(cmd.csv, mode, config);
    options.snapshot_in = cmd.snapshot_in;
    options.snapshot_out = cmd.snapshot_out;
    options.compress = cmd.compress;
    options.metrics_out_dir = cmd.metrics_out_dir;
    options.metrics_port = cmd.metrics_port;
    options.json_summary_out = cmd.json_summary_out;
    options.reservoir_size = cmd.latency_sample_k;
    options.sample_every = cmd.latency_sample_every;
    options.compact_interval = cmd.compact_interval;
    options.dry_run = cmd.dry_run;
    options.max_rows = cmd.csv_max_rows;
    options.max_bytes = cmd.csv_max_bytes;
    options.buckets = cmd.latency_buckets.into();
    options.tick_every_ops = cmd.tick_every_ops.max(1);
    options.metrics_max_ticks = cmd.metrics_max_ticks;

    if options.dry_run {
        let report = replay::dry_run(&options)?;
        return emit(json, &report, |r| {
            println!(
                "dry run ok: {} rows (put={} get={} del={})",
                r.rows, r.puts, r.gets, r.dels
            );
        });
    }

    let summary = replay::run(&options)?;
    emit(json, &summary, |s| {
        println!(
            "replayed {} ops in {:.2}s ({:.0} ops/s) on {} [{}]",
            s.ops, s.elapsed_secs, s.ops_per_second, s.backend, s.state
        );
        println!(
            "  size={} migrations={} compactions={} ticks={}{}",
            s.final_size,
            s.migrations,
            s.compactions,
            s.ticks,
            if s.cancelled { " (cancelled)" } else { "" }
        );
        if let Some(overall) = &s.latency_ms.overall {
            println!(
                "  latency p50={:.4}ms p90={:.4}ms p99={:.4}ms",
                overall.p50, overall.p90, overall.p99
            );
        }
        if let Some(path) = &s.snapshot_out {
            println!("  snapshot written to {path}");
        }
    })
}

fn cmd_verify_snapshot(json: bool, cmd: VerifySnapshotCmd) -> Result<()> {
    let repair_out = cmd.repair.then(|| cmd.out.clone().unwrap_or_else(|| cmd.input.clone()));
    let report = snapshot::verify_snapshot(&cmd.input, repair_out.as_deref())?;
    let verbose = cmd.verbose;
    emit(json, &report, |r| {
        println!(
            "verify {} => ok (kind={} size={} capacity={} tombstones={})",
            cmd.input.display(),
            r.kind,
            r.size,
            r.capacity,
            r.tombstones
        );
        if r.repaired {
            if let Some(path) = &r.repaired_path {
                println!("  repaired snapshot written to {path}");
            }
        }
        if verbose || !r.findings.is_empty() {
            for finding in &r.findings {
                println!("  - {finding}");
            }
        }
    })
}

fn cmd_compact_snapshot(json: bool, cmd: CompactSnapshotCmd) -> Result<()> {
    let compress = cmd.compress.then_some(true);
    let report = snapshot::compact_snapshot(&cmd.input, &cmd.out, compress)?;
    emit(json, &report, |r| {
        println!(
            "compacted {} -> {}: size={} tombstones {} -> {} capacity {} -> {}",
            cmd.input.display(),
            cmd.out.display(),
            r.size,
            r.tombstones_before,
            r.tombstones_after,
            r.capacity_before,
            r.capacity_after
        );
    })
}
