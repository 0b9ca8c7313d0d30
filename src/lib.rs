//! # Flexmap - Adaptive In-Memory Key-Value Store
//!
//! Flexmap is an embedded key→value engine with two hash-table back-ends
//! and a hybrid controller that migrates between them online: a chained
//! table tuned for dense insert-heavy workloads and an open-addressed
//! Robin Hood table tuned for read-heavy ones.
//!
//! ## Quick Start
//!
//! ```rust
//! use flexmap::{EngineConfig, HybridAdaptiveMap};
//!
//! let mut map = HybridAdaptiveMap::new(EngineConfig::default())?;
//! map.put(b"alpha", b"1")?;
//! assert_eq!(map.get(b"alpha")?, Some(b"1".as_slice()));
//! map.delete(b"alpha")?;
//! # Ok::<(), flexmap::EngineError>(())
//! ```
//!
//! ## Features
//!
//! - **Adaptive back-end selection**: guardrails on load factor, group
//!   length, probe distance, and tombstone ratio drive incremental
//!   migration between the two tables
//! - **Incremental everything**: migration and compaction are amortised
//!   across operations, never stop-the-world
//! - **Deterministic workloads**: seeded CSV traces with uniform, Zipf,
//!   and adversarial low-bit-collision key families
//! - **Replay with metrics**: `metrics.v1` ticks to NDJSON, a live JSON
//!   surface, and Prometheus export
//! - **Checksummed snapshots**: versioned container with a keyed
//!   integrity hash, restricted decoding, and offline verify/compact
//!
//! ## Architecture
//!
//! The engine is a dependency-ordered stack: hashing primitives, the two
//! concrete tables, the hybrid controller, then the replay driver and
//! snapshot container on top. The replay driver owns the map; the
//! metrics surface only ever sees published tick snapshots.

pub mod config;
pub mod error;
pub mod hash;
pub mod logging;
pub mod map;
pub mod metrics;
pub mod replay;
pub mod server;
pub mod snapshot;
pub mod workload;

// Re-export the main public API
pub use crate::config::{BackendKind, EngineConfig, EngineMode};
pub use crate::error::{EngineError, Result};
pub use crate::map::{Backend, ChainingMap, HybridAdaptiveMap, RobinHoodMap, Telemetry};
pub use crate::metrics::{MetricsTick, OpKind};
pub use crate::replay::{ReplayOptions, ReplaySummary};
pub use crate::snapshot::{SnapshotOwned, SnapshotRef};
