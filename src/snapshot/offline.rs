//! Offline snapshot maintenance: verification, safe repair, and
//! whole-file compaction.

use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::error::{EngineError, Result};
use crate::map::RobinHoodMap;
use crate::snapshot::{read_snapshot, write_snapshot, SnapshotOwned, SnapshotRef};

/// Result of `verify-snapshot`. Container- or invariant-level corruption
/// surfaces as an error before a report exists; `findings` carry
/// advisory observations about an otherwise healthy snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub kind: String,
    pub version: u16,
    pub compressed: bool,
    pub payload_len: u64,
    pub size: u64,
    pub capacity: u64,
    pub tombstones: u64,
    pub findings: Vec<String>,
    pub success: bool,
    pub repaired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repaired_path: Option<String>,
}

/// Result of `compact-snapshot`.
#[derive(Debug, Clone, Serialize)]
pub struct CompactReport {
    pub size: u64,
    pub capacity_before: u64,
    pub capacity_after: u64,
    pub tombstones_before: u64,
    pub tombstones_after: u64,
}

fn stats_of(owned: &SnapshotOwned) -> (u64, u64, u64) {
    match owned {
        SnapshotOwned::Chaining(m) => (m.len() as u64, m.capacity() as u64, 0),
        SnapshotOwned::RobinHood(m) => {
            (m.len() as u64, m.capacity() as u64, m.tombstones() as u64)
        }
        SnapshotOwned::Hybrid(m) => {
            let telemetry = m.telemetry();
            (
                telemetry.size as u64,
                telemetry.capacity as u64,
                telemetry.tombstones as u64,
            )
        }
    }
}

fn advisory_findings(owned: &SnapshotOwned) -> Vec<String> {
    let mut findings = Vec::new();
    match owned {
        SnapshotOwned::RobinHood(m) => {
            if m.tombstone_ratio() > 0.25 {
                findings.push(format!(
                    "tombstone ratio {:.2} is high; compact-snapshot would reclaim {} slots",
                    m.tombstone_ratio(),
                    m.tombstones()
                ));
            }
        }
        SnapshotOwned::Chaining(m) => {
            if m.max_group_len() > 8 {
                findings.push(format!(
                    "longest group holds {} entries; lookups in it scan linearly",
                    m.max_group_len()
                ));
            }
        }
        SnapshotOwned::Hybrid(m) => {
            if m.state_name() != "steady" {
                findings.push(format!(
                    "snapshot was taken mid-{}; replay will resume the transition",
                    m.state_name()
                ));
            }
        }
    }
    findings
}

/// Validate a snapshot end to end: container framing, checksum, payload
/// decoding, and the back-end's own structural invariants (the decode
/// path re-derives displacement and bucket placement and rejects any
/// violation). With `repair_out`, a Robin Hood payload is additionally
/// compacted and rewritten.
pub fn verify_snapshot(input: &Path, repair_out: Option<&Path>) -> Result<VerifyReport> {
    let (owned, meta) = read_snapshot(input)?;
    let (size, capacity, tombstones) = stats_of(&owned);
    let mut report = VerifyReport {
        kind: owned.kind().to_string(),
        version: meta.version,
        compressed: meta.compressed,
        payload_len: meta.payload_len,
        size,
        capacity,
        tombstones,
        findings: advisory_findings(&owned),
        success: true,
        repaired: false,
        repaired_path: None,
    };

    let Some(out) = repair_out else {
        return Ok(report);
    };

    match owned {
        SnapshotOwned::RobinHood(mut map) => {
            map.compact()?;
            write_snapshot(out, SnapshotRef::RobinHood(&map), meta.compressed)?;
            info!(path = %out.display(), "repaired snapshot written");
        }
        SnapshotOwned::Hybrid(mut map) => {
            if !map.compact_offline()? {
                return Err(EngineError::policy(
                    "repair requires a steady robinhood payload; this hybrid is not one",
                ));
            }
            write_snapshot(out, SnapshotRef::Hybrid(&map), meta.compressed)?;
            info!(path = %out.display(), "repaired snapshot written");
        }
        SnapshotOwned::Chaining(_) => {
            return Err(EngineError::policy(
                "repair performs a robinhood compaction; a chaining payload has nothing to repair",
            ));
        }
    }
    report.repaired = true;
    report.repaired_path = Some(out.display().to_string());
    Ok(report)
}

/// Apply the tombstone-dropping compaction to a serialized RobinHoodMap.
/// Any other payload type is rejected without writing the output file.
pub fn compact_snapshot(input: &Path, output: &Path, compress: Option<bool>) -> Result<CompactReport> {
    let (owned, meta) = read_snapshot(input)?;
    let mut map: RobinHoodMap = match owned {
        SnapshotOwned::RobinHood(map) => map,
        other => {
            return Err(EngineError::policy(format!(
                "compact-snapshot requires a robinhood payload, found {}",
                other.kind()
            )));
        }
    };
    let capacity_before = map.capacity() as u64;
    let tombstones_before = map.tombstones() as u64;
    map.compact()?;
    let report = CompactReport {
        size: map.len() as u64,
        capacity_before,
        capacity_after: map.capacity() as u64,
        tombstones_before,
        tombstones_after: map.tombstones() as u64,
    };
    write_snapshot(
        output,
        SnapshotRef::RobinHood(&map),
        compress.unwrap_or(meta.compressed),
    )?;
    info!(
        path = %output.display(),
        reclaimed = tombstones_before,
        "compacted snapshot written"
    );
    Ok(report)
}
