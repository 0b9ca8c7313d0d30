//! Engine configuration: guardrail thresholds and table shapes.
//!
//! The configuration is an explicit value threaded into the hybrid
//! container. Loading happens once at startup (explicit `--config` path,
//! else a per-user default location, else built-in defaults); nothing in
//! the engine reads the environment afterwards.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{EngineError, Result};

/// Which concrete table the hybrid starts on (or is pinned to).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Chaining,
    RobinHood,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Chaining => "chaining",
            BackendKind::RobinHood => "robinhood",
        }
    }
}

/// Operating mode selected on the command line. `fast-insert` and the
/// `memory-tight` alias pin the chained table, `fast-lookup` pins Robin
/// Hood, `adaptive` lets the guardrails drive migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    FastInsert,
    FastLookup,
    MemoryTight,
    Adaptive,
}

/// Resolved configuration record. `None` in a threshold field means that
/// watchdog is disabled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineConfig {
    pub start_backend: BackendKind,
    pub initial_buckets: usize,
    pub groups_per_bucket: usize,
    pub initial_capacity_rh: usize,
    pub incremental_batch: usize,
    pub max_lf_chaining: Option<f64>,
    pub max_group_len: Option<usize>,
    pub max_avg_probe_robinhood: Option<f64>,
    pub max_tombstone_ratio: Option<f64>,
    pub load_factor_warn: Option<f64>,
    pub avg_probe_warn: Option<f64>,
    pub tombstone_ratio_warn: Option<f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            start_backend: BackendKind::Chaining,
            initial_buckets: 64,
            groups_per_bucket: 8,
            initial_capacity_rh: 64,
            incremental_batch: 2048,
            max_lf_chaining: Some(0.82),
            max_group_len: Some(8),
            max_avg_probe_robinhood: Some(6.0),
            max_tombstone_ratio: Some(0.25),
            load_factor_warn: Some(0.9),
            avg_probe_warn: Some(8.0),
            tombstone_ratio_warn: Some(0.35),
        }
    }
}

impl EngineConfig {
    /// Load from an explicit path, else the per-user default location,
    /// else built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path().filter(|p| p.exists()),
        };
        let mut config = match path {
            Some(p) => {
                let text = fs::read_to_string(&p)?;
                let raw: RawConfig = toml::from_str(&text).map_err(|e| {
                    EngineError::bad_input(format!("{}: {e}", p.display()))
                })?;
                raw.resolve()
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Pin or free the guardrails according to the selected mode.
    pub fn apply_mode(mut self, mode: EngineMode) -> Self {
        match mode {
            EngineMode::Adaptive => {}
            EngineMode::FastInsert | EngineMode::MemoryTight => {
                self.start_backend = BackendKind::Chaining;
                self.max_lf_chaining = None;
                self.max_group_len = None;
                self.max_avg_probe_robinhood = None;
            }
            EngineMode::FastLookup => {
                self.start_backend = BackendKind::RobinHood;
                self.max_lf_chaining = None;
                self.max_group_len = None;
                self.max_avg_probe_robinhood = None;
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.initial_buckets.is_power_of_two() {
            return Err(EngineError::bad_input(format!(
                "initial_buckets must be a power of two, got {}",
                self.initial_buckets
            )));
        }
        if !self.groups_per_bucket.is_power_of_two() {
            return Err(EngineError::bad_input(format!(
                "groups_per_bucket must be a power of two, got {}",
                self.groups_per_bucket
            )));
        }
        if !self.initial_capacity_rh.is_power_of_two() {
            return Err(EngineError::bad_input(format!(
                "initial_capacity_rh must be a power of two, got {}",
                self.initial_capacity_rh
            )));
        }
        if self.incremental_batch == 0 {
            return Err(EngineError::bad_input(
                "incremental_batch must be at least 1",
            ));
        }
        for (name, value) in [
            ("max_lf_chaining", self.max_lf_chaining),
            ("max_tombstone_ratio", self.max_tombstone_ratio),
            ("load_factor_warn", self.load_factor_warn),
            ("tombstone_ratio_warn", self.tombstone_ratio_warn),
        ] {
            if let Some(v) = value {
                if !(0.0..=1.0).contains(&v) {
                    return Err(EngineError::bad_input(format!(
                        "{name} must be within [0, 1], got {v}"
                    )));
                }
            }
        }
        for (name, value) in [
            ("max_avg_probe_robinhood", self.max_avg_probe_robinhood),
            ("avg_probe_warn", self.avg_probe_warn),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(EngineError::bad_input(format!(
                        "{name} must be a non-negative number, got {v}"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("flexmap").join("config.toml"))
}

/// A threshold field in TOML: a number, or the string sentinel `"none"`
/// that disables the watchdog.
#[derive(Debug, Clone, Copy)]
struct Threshold(Option<f64>);

impl<'de> Deserialize<'de> for Threshold {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Sentinel(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(v) => Ok(Threshold(Some(v))),
            Raw::Sentinel(s) if s == "none" => Ok(Threshold(None)),
            Raw::Sentinel(s) => Err(serde::de::Error::custom(format!(
                "expected a number or \"none\", got \"{s}\""
            ))),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    map: RawMapTable,
    #[serde(default)]
    guardrails: RawGuardrailTable,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMapTable {
    start_backend: Option<BackendKind>,
    initial_buckets: Option<usize>,
    groups_per_bucket: Option<usize>,
    initial_capacity_rh: Option<usize>,
    incremental_batch: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGuardrailTable {
    max_lf_chaining: Option<Threshold>,
    max_group_len: Option<Threshold>,
    max_avg_probe_robinhood: Option<Threshold>,
    max_tombstone_ratio: Option<Threshold>,
    load_factor_warn: Option<Threshold>,
    avg_probe_warn: Option<Threshold>,
    tombstone_ratio_warn: Option<Threshold>,
}

impl RawConfig {
    fn resolve(self) -> EngineConfig {
        let defaults = EngineConfig::default();
        let pick = |raw: Option<Threshold>, default: Option<f64>| match raw {
            Some(Threshold(v)) => v,
            None => default,
        };
        EngineConfig {
            start_backend: self.map.start_backend.unwrap_or(defaults.start_backend),
            initial_buckets: self.map.initial_buckets.unwrap_or(defaults.initial_buckets),
            groups_per_bucket: self
                .map
                .groups_per_bucket
                .unwrap_or(defaults.groups_per_bucket),
            initial_capacity_rh: self
                .map
                .initial_capacity_rh
                .unwrap_or(defaults.initial_capacity_rh),
            incremental_batch: self
                .map
                .incremental_batch
                .unwrap_or(defaults.incremental_batch),
            max_lf_chaining: pick(self.guardrails.max_lf_chaining, defaults.max_lf_chaining),
            max_group_len: match self.guardrails.max_group_len {
                Some(Threshold(v)) => v.map(|v| v as usize),
                None => defaults.max_group_len,
            },
            max_avg_probe_robinhood: pick(
                self.guardrails.max_avg_probe_robinhood,
                defaults.max_avg_probe_robinhood,
            ),
            max_tombstone_ratio: pick(
                self.guardrails.max_tombstone_ratio,
                defaults.max_tombstone_ratio,
            ),
            load_factor_warn: pick(self.guardrails.load_factor_warn, defaults.load_factor_warn),
            avg_probe_warn: pick(self.guardrails.avg_probe_warn, defaults.avg_probe_warn),
            tombstone_ratio_warn: pick(
                self.guardrails.tombstone_ratio_warn,
                defaults.tombstone_ratio_warn,
            ),
        }
    }
}
