#![forbid(unsafe_code)]

//! Versioned, checksummed snapshot container.
//!
//! Layout: 8-byte magic, u16 version, u64 payload length, 32-byte keyed
//! checksum, payload. An optional gzip frame wraps the whole container.
//! The payload is a tag-dispatched data tree restricted to the engine's
//! own types; the checksum is verified before a single payload byte is
//! interpreted, and no tag outside the allowlist is ever constructed.

pub mod offline;

pub use offline::{compact_snapshot, verify_snapshot, CompactReport, VerifyReport};

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use crate::config::{BackendKind, EngineConfig};
use crate::error::{EngineError, Result};
use crate::map::hybrid::TransitionKind;
use crate::map::robinhood::Slot;
use crate::map::{Backend, ChainingMap, HybridAdaptiveMap, Key, RobinHoodMap, Value};

const MAGIC: &[u8; 8] = b"FLEXSNAP";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 8 + 2 + 8 + 32;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

// Payload type allowlist. Anything else fails as an invariant violation.
const TAG_CHAINING: u8 = 0x01;
const TAG_ROBINHOOD: u8 = 0x02;
const TAG_HYBRID: u8 = 0x03;
const TAG_CONFIG: u8 = 0x04;

const STATE_STEADY: u8 = 0;
const STATE_MIGRATING: u8 = 1;
const STATE_COMPACTING: u8 = 2;

const SLOT_EMPTY: u8 = 0;
const SLOT_TOMBSTONE: u8 = 1;
const SLOT_OCCUPIED: u8 = 2;

fn checksum_key() -> [u8; 32] {
    blake3::derive_key("flexmap snapshot integrity v1", MAGIC)
}

fn checksum(payload: &[u8]) -> [u8; 32] {
    *blake3::keyed_hash(&checksum_key(), payload).as_bytes()
}

/// Borrowed view of the object being persisted.
#[derive(Debug, Clone, Copy)]
pub enum SnapshotRef<'a> {
    Chaining(&'a ChainingMap),
    RobinHood(&'a RobinHoodMap),
    Hybrid(&'a HybridAdaptiveMap),
}

/// Rehydrated snapshot contents.
#[derive(Debug)]
pub enum SnapshotOwned {
    Chaining(ChainingMap),
    RobinHood(RobinHoodMap),
    Hybrid(HybridAdaptiveMap),
}

impl SnapshotOwned {
    pub fn kind(&self) -> &'static str {
        match self {
            SnapshotOwned::Chaining(_) => "chaining",
            SnapshotOwned::RobinHood(_) => "robinhood",
            SnapshotOwned::Hybrid(_) => "hybrid",
        }
    }
}

/// Container-level facts learned while reading a snapshot.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotMeta {
    pub version: u16,
    pub compressed: bool,
    pub payload_len: u64,
}

pub fn write_snapshot(path: &Path, snapshot: SnapshotRef<'_>, compress: bool) -> Result<()> {
    let payload = encode_payload(snapshot)?;
    let mut container = Vec::with_capacity(HEADER_LEN + payload.len());
    container.extend_from_slice(MAGIC);
    container.extend_from_slice(&VERSION.to_le_bytes());
    container.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    container.extend_from_slice(&checksum(&payload));
    container.extend_from_slice(&payload);

    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut tmp = match parent {
        Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
        None => tempfile::NamedTempFile::new_in(".")?,
    };
    if compress {
        let mut encoder = GzEncoder::new(tmp.as_file_mut(), Compression::default());
        encoder.write_all(&container)?;
        encoder.finish()?;
    } else {
        tmp.write_all(&container)?;
    }
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path).map_err(|e| EngineError::Io(e.error))?;
    debug!(path = %path.display(), bytes = container.len(), compressed = compress, "snapshot written");
    Ok(())
}

pub fn read_snapshot(path: &Path) -> Result<(SnapshotOwned, SnapshotMeta)> {
    let mut raw = Vec::new();
    File::open(path)?.read_to_end(&mut raw)?;
    let compressed = raw.len() >= 2 && raw[..2] == GZIP_MAGIC;
    let container = if compressed {
        let mut inflated = Vec::new();
        GzDecoder::new(raw.as_slice())
            .read_to_end(&mut inflated)
            .map_err(|e| EngineError::invariant(format!("gzip frame is corrupt: {e}")))?;
        inflated
    } else {
        raw
    };

    if container.len() < HEADER_LEN {
        return Err(EngineError::invariant(
            "snapshot shorter than the container header",
        ));
    }
    if &container[..8] != MAGIC {
        return Err(EngineError::invariant("bad snapshot magic"));
    }
    let version = u16::from_le_bytes([container[8], container[9]]);
    if version != VERSION {
        return Err(EngineError::invariant(format!(
            "unsupported snapshot version {version}"
        )));
    }
    let payload_len =
        u64::from_le_bytes(container[10..18].try_into().expect("slice is 8 bytes"));
    let payload = &container[HEADER_LEN..];
    if payload.len() as u64 != payload_len {
        return Err(EngineError::invariant(format!(
            "payload length {} does not match header {payload_len}",
            payload.len()
        )));
    }
    let declared: [u8; 32] = container[18..50].try_into().expect("slice is 32 bytes");
    if checksum(payload) != declared {
        return Err(EngineError::invariant("snapshot checksum mismatch"));
    }

    let owned = decode_payload(payload)?;
    Ok((
        owned,
        SnapshotMeta {
            version,
            compressed,
            payload_len,
        },
    ))
}

// ---- payload encoding ----

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    let len: u32 = bytes
        .len()
        .try_into()
        .map_err(|_| EngineError::bad_input("entry length exceeds u32::MAX"))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

fn encode_payload(snapshot: SnapshotRef<'_>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    match snapshot {
        SnapshotRef::Chaining(map) => encode_chaining(&mut buf, map)?,
        SnapshotRef::RobinHood(map) => encode_robinhood(&mut buf, map)?,
        SnapshotRef::Hybrid(map) => encode_hybrid(&mut buf, map)?,
    }
    Ok(buf)
}

fn encode_chaining(buf: &mut Vec<u8>, map: &ChainingMap) -> Result<()> {
    buf.push(TAG_CHAINING);
    buf.extend_from_slice(&(map.bucket_count() as u32).to_le_bytes());
    buf.extend_from_slice(&(map.groups_per_bucket() as u32).to_le_bytes());
    for group in map.group_slices() {
        buf.extend_from_slice(&(group.len() as u32).to_le_bytes());
        for entry in group {
            put_bytes(buf, &entry.key)?;
            put_bytes(buf, &entry.value)?;
        }
    }
    Ok(())
}

fn encode_robinhood(buf: &mut Vec<u8>, map: &RobinHoodMap) -> Result<()> {
    buf.push(TAG_ROBINHOOD);
    buf.extend_from_slice(&(map.capacity() as u64).to_le_bytes());
    buf.extend_from_slice(&(map.len() as u64).to_le_bytes());
    buf.extend_from_slice(&(map.tombstones() as u64).to_le_bytes());
    for slot in map.slot_states() {
        match slot {
            Slot::Empty => buf.push(SLOT_EMPTY),
            Slot::Tombstone => buf.push(SLOT_TOMBSTONE),
            Slot::Occupied(entry) => {
                buf.push(SLOT_OCCUPIED);
                put_bytes(buf, &entry.key)?;
                put_bytes(buf, &entry.value)?;
            }
        }
    }
    Ok(())
}

fn encode_backend(buf: &mut Vec<u8>, backend: &Backend) -> Result<()> {
    match backend {
        Backend::Chaining(map) => encode_chaining(buf, map),
        Backend::RobinHood(map) => encode_robinhood(buf, map),
    }
}

fn encode_config(buf: &mut Vec<u8>, config: &EngineConfig) {
    buf.push(TAG_CONFIG);
    buf.push(match config.start_backend {
        BackendKind::Chaining => 0,
        BackendKind::RobinHood => 1,
    });
    buf.extend_from_slice(&(config.initial_buckets as u32).to_le_bytes());
    buf.extend_from_slice(&(config.groups_per_bucket as u32).to_le_bytes());
    buf.extend_from_slice(&(config.initial_capacity_rh as u64).to_le_bytes());
    buf.extend_from_slice(&(config.incremental_batch as u64).to_le_bytes());
    let thresholds = [
        config.max_lf_chaining,
        config.max_group_len.map(|v| v as f64),
        config.max_avg_probe_robinhood,
        config.max_tombstone_ratio,
        config.load_factor_warn,
        config.avg_probe_warn,
        config.tombstone_ratio_warn,
    ];
    for threshold in thresholds {
        match threshold {
            Some(v) => {
                buf.push(1);
                buf.extend_from_slice(&v.to_le_bytes());
            }
            None => buf.push(0),
        }
    }
}

fn encode_hybrid(buf: &mut Vec<u8>, map: &HybridAdaptiveMap) -> Result<()> {
    buf.push(TAG_HYBRID);
    let (config, active, transition) = map.snapshot_parts();
    encode_config(buf, config);
    match transition {
        None => {
            buf.push(STATE_STEADY);
            encode_backend(buf, active)?;
        }
        Some((kind, target, cursor)) => {
            buf.push(match kind {
                TransitionKind::Migration => STATE_MIGRATING,
                TransitionKind::Compaction => STATE_COMPACTING,
            });
            encode_backend(buf, active)?;
            buf.extend_from_slice(&(cursor as u64).to_le_bytes());
            encode_backend(buf, target)?;
        }
    }
    Ok(())
}

// ---- payload decoding ----

/// Bounds-checked little-endian reader over the payload. Every length is
/// validated against the remaining bytes before any allocation.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(EngineError::invariant("snapshot payload truncated"));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(
            self.take(4)?.try_into().expect("slice is 4 bytes"),
        ))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(
            self.take(8)?.try_into().expect("slice is 8 bytes"),
        ))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(
            self.take(8)?.try_into().expect("slice is 8 bytes"),
        ))
    }

    fn bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn finish(&self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(EngineError::invariant(format!(
                "{} trailing bytes after snapshot payload",
                self.remaining()
            )));
        }
        Ok(())
    }
}

fn decode_payload(payload: &[u8]) -> Result<SnapshotOwned> {
    let mut reader = Reader::new(payload);
    let owned = decode_tagged(&mut reader)?;
    reader.finish()?;
    Ok(owned)
}

fn decode_tagged(reader: &mut Reader<'_>) -> Result<SnapshotOwned> {
    match reader.u8()? {
        TAG_CHAINING => Ok(SnapshotOwned::Chaining(decode_chaining(reader)?)),
        TAG_ROBINHOOD => Ok(SnapshotOwned::RobinHood(decode_robinhood(reader)?)),
        TAG_HYBRID => Ok(SnapshotOwned::Hybrid(decode_hybrid(reader)?)),
        tag => Err(EngineError::invariant(format!(
            "payload type tag 0x{tag:02x} is not in the snapshot allowlist"
        ))),
    }
}

fn decode_backend(reader: &mut Reader<'_>) -> Result<Backend> {
    match reader.u8()? {
        TAG_CHAINING => Ok(Backend::Chaining(decode_chaining(reader)?)),
        TAG_ROBINHOOD => Ok(Backend::RobinHood(decode_robinhood(reader)?)),
        tag => Err(EngineError::invariant(format!(
            "backend type tag 0x{tag:02x} is not in the snapshot allowlist"
        ))),
    }
}

fn decode_chaining(reader: &mut Reader<'_>) -> Result<ChainingMap> {
    let buckets = reader.u32()? as usize;
    let groups_per_bucket = reader.u32()? as usize;
    if !buckets.is_power_of_two() || !groups_per_bucket.is_power_of_two() {
        return Err(EngineError::invariant(format!(
            "chaining shape {buckets}x{groups_per_bucket} is not a power of two"
        )));
    }
    let total = buckets
        .checked_mul(groups_per_bucket)
        .ok_or_else(|| EngineError::invariant("chaining shape overflows"))?;
    if total > reader.remaining() / 4 + 1 {
        return Err(EngineError::invariant(
            "chaining shape larger than the remaining payload",
        ));
    }
    let mut groups: Vec<Vec<(Key, Value)>> = Vec::with_capacity(total);
    for _ in 0..total {
        let count = reader.u32()? as usize;
        let mut group = Vec::new();
        for _ in 0..count {
            let key = reader.bytes()?;
            let value = reader.bytes()?;
            group.push((key, value));
        }
        groups.push(group);
    }
    ChainingMap::rehydrate(buckets, groups_per_bucket, groups)
}

fn decode_robinhood(reader: &mut Reader<'_>) -> Result<RobinHoodMap> {
    let capacity = reader.u64()? as usize;
    let declared_size = reader.u64()?;
    let declared_tombstones = reader.u64()?;
    if capacity > reader.remaining() {
        return Err(EngineError::invariant(
            "robinhood capacity larger than the remaining payload",
        ));
    }
    let mut raw: Vec<Option<Option<(Key, Value)>>> = Vec::with_capacity(capacity);
    for _ in 0..capacity {
        match reader.u8()? {
            SLOT_EMPTY => raw.push(None),
            SLOT_TOMBSTONE => raw.push(Some(None)),
            SLOT_OCCUPIED => {
                let key = reader.bytes()?;
                let value = reader.bytes()?;
                raw.push(Some(Some((key, value))));
            }
            tag => {
                return Err(EngineError::invariant(format!(
                    "slot state tag 0x{tag:02x} is not in the snapshot allowlist"
                )))
            }
        }
    }
    let map = RobinHoodMap::rehydrate(capacity, raw)?;
    if map.len() as u64 != declared_size {
        return Err(EngineError::invariant(format!(
            "snapshot declares {declared_size} entries but {} were found",
            map.len()
        )));
    }
    if map.tombstones() as u64 != declared_tombstones {
        return Err(EngineError::invariant(format!(
            "snapshot declares {declared_tombstones} tombstones but {} were found",
            map.tombstones()
        )));
    }
    Ok(map)
}

fn decode_config(reader: &mut Reader<'_>) -> Result<EngineConfig> {
    if reader.u8()? != TAG_CONFIG {
        return Err(EngineError::invariant(
            "hybrid payload missing configuration record",
        ));
    }
    let start_backend = match reader.u8()? {
        0 => BackendKind::Chaining,
        1 => BackendKind::RobinHood,
        tag => {
            return Err(EngineError::invariant(format!(
                "unknown backend tag 0x{tag:02x} in configuration record"
            )))
        }
    };
    let initial_buckets = reader.u32()? as usize;
    let groups_per_bucket = reader.u32()? as usize;
    let initial_capacity_rh = reader.u64()? as usize;
    let incremental_batch = reader.u64()? as usize;
    let mut thresholds = [None; 7];
    for slot in thresholds.iter_mut() {
        *slot = match reader.u8()? {
            0 => None,
            1 => Some(reader.f64()?),
            tag => {
                return Err(EngineError::invariant(format!(
                    "unknown threshold presence tag 0x{tag:02x}"
                )))
            }
        };
    }
    let config = EngineConfig {
        start_backend,
        initial_buckets,
        groups_per_bucket,
        initial_capacity_rh,
        incremental_batch,
        max_lf_chaining: thresholds[0],
        max_group_len: thresholds[1].map(|v| v as usize),
        max_avg_probe_robinhood: thresholds[2],
        max_tombstone_ratio: thresholds[3],
        load_factor_warn: thresholds[4],
        avg_probe_warn: thresholds[5],
        tombstone_ratio_warn: thresholds[6],
    };
    config
        .validate()
        .map_err(|e| EngineError::invariant(format!("snapshot configuration invalid: {e}")))?;
    Ok(config)
}

fn decode_hybrid(reader: &mut Reader<'_>) -> Result<HybridAdaptiveMap> {
    let config = decode_config(reader)?;
    let state = reader.u8()?;
    let active = decode_backend(reader)?;
    match state {
        STATE_STEADY => Ok(HybridAdaptiveMap::with_active(config, active)),
        STATE_MIGRATING | STATE_COMPACTING => {
            let cursor = reader.u64()? as usize;
            let target = decode_backend(reader)?;
            let kind = if state == STATE_MIGRATING {
                TransitionKind::Migration
            } else {
                if !matches!(active, Backend::RobinHood(_))
                    || !matches!(target, Backend::RobinHood(_))
                {
                    return Err(EngineError::invariant(
                        "compacting snapshot must hold robinhood source and target",
                    ));
                }
                TransitionKind::Compaction
            };
            let limit = match &active {
                Backend::Chaining(m) => m.bucket_count() * m.groups_per_bucket(),
                Backend::RobinHood(m) => m.capacity(),
            };
            if cursor > limit {
                return Err(EngineError::invariant(format!(
                    "transition cursor {cursor} beyond source extent {limit}"
                )));
            }
            Ok(HybridAdaptiveMap::restore_transition(
                config, active, kind, target, cursor,
            ))
        }
        tag => Err(EngineError::invariant(format!(
            "unknown hybrid state tag 0x{tag:02x}"
        ))),
    }
}
