//! Live metrics surface: the latest published tick as JSON plus a
//! Prometheus text rendering, served from a background runtime thread.
//!
//! The replay driver and this server share exactly one thing: an
//! `Arc`-swapped latest tick. A reader sees the previous tick or the new
//! one in its entirety, never a torn mixture.

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::RwLock;
use tracing::{error, info};

use crate::error::Result;
use crate::metrics::MetricsTick;

/// The single cross-thread cell. Publication is an `Arc` pointer swap
/// under a short write lock.
#[derive(Default)]
pub struct SharedTick {
    latest: RwLock<Option<Arc<MetricsTick>>>,
}

impl SharedTick {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, tick: Arc<MetricsTick>) {
        *self.latest.write() = Some(tick);
    }

    pub fn latest(&self) -> Option<Arc<MetricsTick>> {
        self.latest.read().clone()
    }
}

/// Bind `port` on localhost and serve until the process exits. Binding
/// happens synchronously so an occupied port surfaces as `IO` before
/// the replay starts.
pub fn spawn(port: u16, shared: Arc<SharedTick>) -> Result<SocketAddr> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", port))?;
    listener.set_nonblocking(true)?;
    let addr = listener.local_addr()?;
    thread::Builder::new()
        .name("flexmap-metrics".to_string())
        .spawn(move || serve_on(listener, shared))?;
    info!(%addr, "metrics surface listening");
    Ok(addr)
}

fn serve_on(listener: std::net::TcpListener, shared: Arc<SharedTick>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            error!(error = %err, "metrics runtime failed to start");
            return;
        }
    };
    runtime.block_on(async move {
        let app = Router::new()
            .route("/metrics.json", get(latest_json))
            .route("/metrics", get(prometheus_text))
            .with_state(shared);
        let listener = match tokio::net::TcpListener::from_std(listener) {
            Ok(l) => l,
            Err(err) => {
                error!(error = %err, "metrics listener handoff failed");
                return;
            }
        };
        if let Err(err) = axum::serve(listener, app).await {
            error!(error = %err, "metrics surface stopped");
        }
    });
}

async fn latest_json(State(shared): State<Arc<SharedTick>>) -> Json<serde_json::Value> {
    match shared.latest() {
        Some(tick) => Json(serde_json::to_value(tick.as_ref()).unwrap_or_else(
            |e| serde_json::json!({ "error": e.to_string() }),
        )),
        None => Json(serde_json::json!({ "schema": crate::metrics::SCHEMA, "status": "no ticks yet" })),
    }
}

async fn prometheus_text(State(shared): State<Arc<SharedTick>>) -> String {
    match shared.latest() {
        Some(tick) => render_prometheus(&tick),
        None => String::from("# no ticks yet\n"),
    }
}

/// Render the latest tick in Prometheus exposition format.
pub fn render_prometheus(tick: &MetricsTick) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# TYPE flexmap_ops_total counter");
    let _ = writeln!(out, "flexmap_ops_total {}", tick.ops);
    for (kind, count) in [
        ("put", tick.ops_by_type.put),
        ("get", tick.ops_by_type.get),
        ("del", tick.ops_by_type.del),
    ] {
        let _ = writeln!(out, "flexmap_ops_by_type_total{{op=\"{kind}\"}} {count}");
    }
    let _ = writeln!(out, "# TYPE flexmap_migrations_total counter");
    let _ = writeln!(out, "flexmap_migrations_total {}", tick.migrations);
    let _ = writeln!(out, "# TYPE flexmap_compactions_total counter");
    let _ = writeln!(out, "flexmap_compactions_total {}", tick.compactions);
    let _ = writeln!(
        out,
        "# TYPE flexmap_load_factor gauge\nflexmap_load_factor{{backend=\"{}\"}} {}",
        tick.backend, tick.load_factor
    );
    let _ = writeln!(
        out,
        "# TYPE flexmap_avg_probe gauge\nflexmap_avg_probe {}",
        tick.avg_probe_estimate
    );
    let _ = writeln!(
        out,
        "# TYPE flexmap_tombstone_ratio gauge\nflexmap_tombstone_ratio {}",
        tick.tombstone_ratio
    );
    if let Some(hist) = &tick.latency_hist_ms {
        let _ = writeln!(out, "# TYPE flexmap_op_latency_ms histogram");
        for (bound, cum) in hist.bounds_ms.iter().zip(&hist.cumulative) {
            let _ = writeln!(out, "flexmap_op_latency_ms_bucket{{le=\"{bound}\"}} {cum}");
        }
        let total = hist.cumulative.last().copied().unwrap_or(0);
        let _ = writeln!(out, "flexmap_op_latency_ms_bucket{{le=\"+Inf\"}} {total}");
        let _ = writeln!(out, "flexmap_op_latency_ms_sum {}", hist.sum_ms);
        let _ = writeln!(out, "flexmap_op_latency_ms_count {}", hist.count);
    }
    out
}
