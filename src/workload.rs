//! Synthetic workload generation: deterministic CSV traces over uniform,
//! Zipf-skewed, and adversarial low-bit-collision key families.
//!
//! Everything is drawn from one seeded ChaCha8 stream in a fixed order,
//! so a `(spec, seed)` pair produces byte-identical traces on every
//! platform.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::hash::hash_key;

/// Share of non-read operations that are deletes.
const DELETE_SHARE: f64 = 0.25;
/// Adversarial keys are drawn from a bounded mined pool.
const MAX_ADVERSARIAL_POOL: usize = 512;
/// Mining cost grows as `2^lowbits` per pool key; cap it.
const MAX_LOWBITS: u32 = 16;

#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    pub ops: u64,
    pub read_ratio: f64,
    pub key_skew: f64,
    pub key_space: u64,
    pub adversarial_ratio: f64,
    pub adversarial_lowbits: u32,
    pub seed: u64,
}

impl WorkloadSpec {
    pub fn validate(&self) -> Result<()> {
        if self.ops == 0 {
            return Err(EngineError::bad_input("ops must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.read_ratio) {
            return Err(EngineError::bad_input(format!(
                "read-ratio must be within [0, 1], got {}",
                self.read_ratio
            )));
        }
        if !(0.0..=1.0).contains(&self.adversarial_ratio) {
            return Err(EngineError::bad_input(format!(
                "adversarial-ratio must be within [0, 1], got {}",
                self.adversarial_ratio
            )));
        }
        if self.key_skew < 0.0 || !self.key_skew.is_finite() {
            return Err(EngineError::bad_input(format!(
                "key-skew must be a non-negative number, got {}",
                self.key_skew
            )));
        }
        if self.key_space == 0 {
            return Err(EngineError::bad_input("key-space must be at least 1"));
        }
        if self.adversarial_lowbits == 0 || self.adversarial_lowbits > MAX_LOWBITS {
            return Err(EngineError::bad_input(format!(
                "adversarial-lowbits must be within [1, {MAX_LOWBITS}], got {}",
                self.adversarial_lowbits
            )));
        }
        Ok(())
    }
}

/// One trace row. `value` is empty for `get`/`del`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub op: &'static str,
    pub key: String,
    pub value: String,
}

/// Cumulative-weight table for Zipf sampling; `skew == 0` degenerates to
/// the uniform distribution and skips the table entirely.
#[derive(Debug)]
struct ZipfTable {
    cumulative: Vec<f64>,
}

impl ZipfTable {
    fn new(n: usize, skew: f64) -> Self {
        let mut cumulative = Vec::with_capacity(n);
        let mut total = 0.0;
        for rank in 0..n {
            total += 1.0 / ((rank + 1) as f64).powf(skew);
            cumulative.push(total);
        }
        Self { cumulative }
    }

    fn sample(&self, rng: &mut ChaCha8Rng) -> usize {
        let total = *self.cumulative.last().expect("table is non-empty");
        let needle = rng.gen::<f64>() * total;
        self.cumulative.partition_point(|&c| c <= needle)
    }
}

pub struct WorkloadGenerator {
    spec: WorkloadSpec,
    rng: ChaCha8Rng,
    zipf: Option<ZipfTable>,
    adversarial_pool: Vec<String>,
    emitted: u64,
}

impl WorkloadGenerator {
    pub fn new(spec: WorkloadSpec) -> Result<Self> {
        spec.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(spec.seed);
        let zipf = if spec.key_skew > 0.0 {
            Some(ZipfTable::new(spec.key_space as usize, spec.key_skew))
        } else {
            None
        };
        let adversarial_pool = if spec.adversarial_ratio > 0.0 {
            mine_adversarial_pool(
                &mut rng,
                spec.adversarial_lowbits,
                (spec.key_space as usize).min(MAX_ADVERSARIAL_POOL),
            )
        } else {
            Vec::new()
        };
        Ok(Self {
            spec,
            rng,
            zipf,
            adversarial_pool,
            emitted: 0,
        })
    }

    fn sample_key_rank(&mut self, limit: usize) -> usize {
        match &self.zipf {
            Some(table) => table.sample(&mut self.rng) % limit,
            None => self.rng.gen_range(0..limit),
        }
    }

    fn next_key(&mut self) -> String {
        let adversarial = !self.adversarial_pool.is_empty()
            && self.rng.gen::<f64>() < self.spec.adversarial_ratio;
        if adversarial {
            let rank = self.sample_key_rank(self.adversarial_pool.len());
            self.adversarial_pool[rank].clone()
        } else {
            let rank = self.sample_key_rank(self.spec.key_space as usize);
            format!("k{rank:08}")
        }
    }
}

impl Iterator for WorkloadGenerator {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        if self.emitted >= self.spec.ops {
            return None;
        }
        self.emitted += 1;
        let op_draw: f64 = self.rng.gen();
        let key = self.next_key();
        let row = if op_draw < self.spec.read_ratio {
            Row {
                op: "get",
                key,
                value: String::new(),
            }
        } else if self.rng.gen::<f64>() < DELETE_SHARE {
            Row {
                op: "del",
                key,
                value: String::new(),
            }
        } else {
            Row {
                op: "put",
                key,
                value: format!("v{:016x}", self.rng.gen::<u64>()),
            }
        };
        Some(row)
    }
}

/// Mine keys whose hashes agree on their low `lowbits` bits. The target
/// pattern comes from the seeded stream, so pools differ across seeds
/// but are identical for the same seed.
fn mine_adversarial_pool(rng: &mut ChaCha8Rng, lowbits: u32, pool_size: usize) -> Vec<String> {
    let mask: u64 = (1 << lowbits) - 1;
    let target = rng.gen::<u64>() & mask;
    let mut pool = Vec::with_capacity(pool_size);
    let mut nonce: u64 = 0;
    while pool.len() < pool_size {
        let candidate = format!("x{nonce:012x}");
        if hash_key(candidate.as_bytes()) & mask == target {
            pool.push(candidate);
        }
        nonce += 1;
    }
    pool
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateSummary {
    pub rows: u64,
    pub puts: u64,
    pub gets: u64,
    pub dels: u64,
}

/// Stream a full trace into `out` as CSV with the mandatory
/// `op,key,value` header.
pub fn generate_into(spec: WorkloadSpec, out: impl Write) -> Result<GenerateSummary> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(["op", "key", "value"])?;
    let mut summary = GenerateSummary {
        rows: 0,
        puts: 0,
        gets: 0,
        dels: 0,
    };
    for row in WorkloadGenerator::new(spec)? {
        match row.op {
            "put" => summary.puts += 1,
            "get" => summary.gets += 1,
            _ => summary.dels += 1,
        }
        summary.rows += 1;
        writer.write_record([row.op, row.key.as_str(), row.value.as_str()])?;
    }
    writer.flush()?;
    Ok(summary)
}

/// Generate to a file with a progress bar on stderr.
pub fn generate_to_path(spec: WorkloadSpec, path: &Path) -> Result<GenerateSummary> {
    let total = spec.ops;
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template("{bar:30} {pos}/{len} rows {msg}")
            .expect("static template is valid"),
    );
    let file = File::create(path)?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    writer.write_record(["op", "key", "value"])?;
    let mut summary = GenerateSummary {
        rows: 0,
        puts: 0,
        gets: 0,
        dels: 0,
    };
    for row in WorkloadGenerator::new(spec)? {
        match row.op {
            "put" => summary.puts += 1,
            "get" => summary.gets += 1,
            _ => summary.dels += 1,
        }
        summary.rows += 1;
        if summary.rows % 4096 == 0 {
            bar.set_position(summary.rows);
        }
        writer.write_record([row.op, row.key.as_str(), row.value.as_str()])?;
    }
    writer.flush()?;
    bar.finish_and_clear();
    Ok(summary)
}
