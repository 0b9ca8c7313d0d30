//! Map back-ends and the hybrid controller that migrates between them.
//!
//! The back-end set is closed: migration logic pattern-matches on the
//! active variant, so the dispatch is an enum rather than a trait object.

pub mod chaining;
pub mod hybrid;
pub mod robinhood;

pub use chaining::ChainingMap;
pub use hybrid::{HybridAdaptiveMap, Telemetry};
pub use robinhood::RobinHoodMap;

use crate::config::BackendKind;
use crate::error::Result;

/// Keys and values are opaque byte strings compared by byte identity.
pub type Key = Vec<u8>;
pub type Value = Vec<u8>;

/// One concrete table. The hybrid container owns exactly one `Backend`
/// outside a transition and two during one.
#[derive(Debug, Clone)]
pub enum Backend {
    Chaining(ChainingMap),
    RobinHood(RobinHoodMap),
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Chaining(_) => BackendKind::Chaining,
            Backend::RobinHood(_) => BackendKind::RobinHood,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Backend::Chaining(m) => m.len(),
            Backend::RobinHood(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        match self {
            Backend::Chaining(m) => Ok(m.put(key, value)),
            Backend::RobinHood(m) => m.put(key, value),
        }
    }

    pub fn get(&mut self, key: &[u8]) -> Option<&[u8]> {
        match self {
            Backend::Chaining(m) => m.get(key),
            Backend::RobinHood(m) => m.get(key),
        }
    }

    /// Lookup without touching probe telemetry.
    pub fn peek(&self, key: &[u8]) -> Option<&[u8]> {
        match self {
            Backend::Chaining(m) => m.get(key),
            Backend::RobinHood(m) => m.peek(key),
        }
    }

    pub fn delete(&mut self, key: &[u8]) -> bool {
        match self {
            Backend::Chaining(m) => m.delete(key),
            Backend::RobinHood(m) => m.delete(key),
        }
    }

    pub fn items(&self) -> Box<dyn Iterator<Item = (&[u8], &[u8])> + '_> {
        match self {
            Backend::Chaining(m) => Box::new(m.items()),
            Backend::RobinHood(m) => Box::new(m.items()),
        }
    }

    pub fn check_invariants(&self) -> Result<()> {
        match self {
            Backend::Chaining(m) => m.check_invariants(),
            Backend::RobinHood(m) => m.check_invariants(),
        }
    }
}
