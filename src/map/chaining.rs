#![forbid(unsafe_code)]

//! Two-level chained hash table: a fixed power-of-two array of buckets,
//! each split into a fixed power-of-two count of small ordered groups.
//! Dense and cheap to insert into; the hybrid controller leaves it once
//! groups grow past the guardrail.

use smallvec::SmallVec;

use crate::error::{EngineError, Result};
use crate::hash::{bucket_index, group_index, hash_key};
use crate::map::{Key, Value};

/// One stored pair. Groups keep insertion order except where `delete`
/// swap-removes (see below).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Key,
    pub value: Value,
}

type Group = SmallVec<[Entry; 2]>;

#[derive(Debug, Clone)]
pub struct ChainingMap {
    buckets: usize,
    groups_per_bucket: usize,
    groups: Vec<Group>,
    size: usize,
    /// Group-length histogram; index = length, value = group count.
    len_counts: Vec<usize>,
    max_group_len: usize,
}

impl ChainingMap {
    pub fn new(buckets: usize, groups_per_bucket: usize) -> Result<Self> {
        if !buckets.is_power_of_two() || !groups_per_bucket.is_power_of_two() {
            return Err(EngineError::bad_input(format!(
                "chaining shape must be powers of two, got {buckets}x{groups_per_bucket}"
            )));
        }
        let total = buckets * groups_per_bucket;
        let mut groups = Vec::new();
        groups.try_reserve_exact(total)?;
        groups.resize_with(total, Group::new);
        Ok(Self {
            buckets,
            groups_per_bucket,
            groups,
            size: 0,
            len_counts: vec![total],
            max_group_len: 0,
        })
    }

    /// Shape a fresh table so `expected` entries land under a comfortable
    /// load factor. Used when this map is a migration target.
    pub fn with_capacity_for(expected: usize, groups_per_bucket: usize) -> Result<Self> {
        let wanted = (expected as f64 / (groups_per_bucket as f64 * 0.6)).ceil() as usize;
        let buckets = wanted.max(64).next_power_of_two();
        Self::new(buckets, groups_per_bucket)
    }

    #[inline]
    fn group_slot(&self, hash: u64) -> usize {
        let b = bucket_index(hash, self.buckets);
        let g = group_index(hash, self.buckets, self.groups_per_bucket);
        b * self.groups_per_bucket + g
    }

    fn note_group_grew(&mut self, old_len: usize) {
        self.len_counts[old_len] -= 1;
        if self.len_counts.len() <= old_len + 1 {
            self.len_counts.resize(old_len + 2, 0);
        }
        self.len_counts[old_len + 1] += 1;
        if old_len + 1 > self.max_group_len {
            self.max_group_len = old_len + 1;
        }
    }

    fn note_group_shrank(&mut self, old_len: usize) {
        self.len_counts[old_len] -= 1;
        self.len_counts[old_len - 1] += 1;
        while self.max_group_len > 0 && self.len_counts[self.max_group_len] == 0 {
            self.max_group_len -= 1;
        }
    }

    /// Insert or overwrite. Returns `true` when the key was newly inserted.
    /// An overwrite keeps the entry's position within its group.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> bool {
        let slot = self.group_slot(hash_key(key));
        let group = &mut self.groups[slot];
        for entry in group.iter_mut() {
            if entry.key == key {
                entry.value = value.to_vec();
                return false;
            }
        }
        let old_len = group.len();
        group.push(Entry {
            key: key.to_vec(),
            value: value.to_vec(),
        });
        self.size += 1;
        self.note_group_grew(old_len);
        true
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        let slot = self.group_slot(hash_key(key));
        self.groups[slot]
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.value.as_slice())
    }

    /// Remove a key by swapping it with the last entry of its group and
    /// popping. O(1), at the cost of weakening intra-group order around
    /// the deleted slot; callers must not rely on iteration order.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        let slot = self.group_slot(hash_key(key));
        let group = &mut self.groups[slot];
        let Some(pos) = group.iter().position(|entry| entry.key == key) else {
            return false;
        };
        let old_len = group.len();
        group.swap_remove(pos);
        self.size -= 1;
        self.note_group_shrank(old_len);
        true
    }

    /// All pairs in group-major order. Order within a group is
    /// implementation-defined.
    pub fn items(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.groups
            .iter()
            .flat_map(|g| g.iter().map(|e| (e.key.as_slice(), e.value.as_slice())))
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets
    }

    pub fn groups_per_bucket(&self) -> usize {
        self.groups_per_bucket
    }

    /// Total entry capacity used for the load-factor guardrail.
    pub fn capacity(&self) -> usize {
        self.buckets * self.groups_per_bucket
    }

    pub fn load_factor(&self) -> f64 {
        self.size as f64 / self.capacity() as f64
    }

    pub fn max_group_len(&self) -> usize {
        self.max_group_len
    }

    pub(crate) fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Pop one entry from the given flat group index. Used by the hybrid
    /// container to drain this map during migration.
    pub(crate) fn pop_from_group(&mut self, group: usize) -> Option<(Key, Value)> {
        let g = &mut self.groups[group];
        let entry = g.pop()?;
        let new_len = g.len();
        self.size -= 1;
        self.note_group_shrank(new_len + 1);
        Some((entry.key, entry.value))
    }

    /// Group contents in flat order, for the snapshot writer.
    pub(crate) fn group_slices(&self) -> impl Iterator<Item = &[Entry]> {
        self.groups.iter().map(|g| g.as_slice())
    }

    /// Rebuild from snapshot groups, checking that every key sits in the
    /// group its hash selects and appears only once.
    pub(crate) fn rehydrate(
        buckets: usize,
        groups_per_bucket: usize,
        groups: Vec<Vec<(Key, Value)>>,
    ) -> Result<Self> {
        let mut map = Self::new(buckets, groups_per_bucket)?;
        if groups.len() != map.group_count() {
            return Err(EngineError::invariant(format!(
                "snapshot has {} groups, shape {buckets}x{groups_per_bucket} requires {}",
                groups.len(),
                map.group_count()
            )));
        }
        for (idx, entries) in groups.into_iter().enumerate() {
            for (key, value) in entries {
                let expected = map.group_slot(hash_key(&key));
                if expected != idx {
                    return Err(EngineError::invariant(format!(
                        "key hashes to group {expected} but was stored in group {idx}"
                    )));
                }
                let group = &mut map.groups[idx];
                if group.iter().any(|e| e.key == key) {
                    return Err(EngineError::invariant(
                        "duplicate key within a snapshot group",
                    ));
                }
                let old_len = group.len();
                group.push(Entry { key, value });
                map.size += 1;
                map.note_group_grew(old_len);
            }
        }
        Ok(map)
    }

    /// Structural self-check used by `verify-snapshot` and tests.
    pub fn check_invariants(&self) -> Result<()> {
        let total: usize = self.groups.iter().map(|g| g.len()).sum();
        if total != self.size {
            return Err(EngineError::invariant(format!(
                "size {} does not match sum of group lengths {total}",
                self.size
            )));
        }
        let actual_max = self.groups.iter().map(|g| g.len()).max().unwrap_or(0);
        if actual_max != self.max_group_len {
            return Err(EngineError::invariant(format!(
                "tracked max group length {} does not match actual {actual_max}",
                self.max_group_len
            )));
        }
        for (idx, group) in self.groups.iter().enumerate() {
            for entry in group.iter() {
                let expected = self.group_slot(hash_key(&entry.key));
                if expected != idx {
                    return Err(EngineError::invariant(format!(
                        "key in group {idx} hashes to group {expected}"
                    )));
                }
            }
        }
        Ok(())
    }
}
