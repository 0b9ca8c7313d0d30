#![forbid(unsafe_code)]

//! Open-addressed Robin Hood table with tombstone deletion.
//!
//! Slots keep displacement monotonicity: an occupied slot never sits
//! further from its home than the entry that probing carries past it.
//! That ordering is what gives lookups their early-exit proof of absence,
//! and it must survive adversarial key families whose low hash bits all
//! collide.

use std::collections::HashSet;
use std::mem;

use crate::error::{EngineError, Result};
use crate::hash::{hash_key, home_index, probe_distance};
use crate::map::{Key, Value};

/// Insert-side high-water mark: `(size + tombstones + 1) / capacity`
/// above this triggers a doubling rehash.
pub const RESIZE_HIGH_WATER: f64 = 0.85;
/// Occupancy below this lets compaction shrink the slot array.
const SHRINK_LOW_WATER: f64 = 0.3;
/// Probe-length distribution bins; the last bin saturates.
pub const PROBE_HIST_BINS: usize = 33;

const MIN_CAPACITY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupiedEntry {
    pub key: Key,
    pub value: Value,
    pub hash: u64,
    /// Distance from the home slot, maintained through swaps.
    pub dib: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    Empty,
    Tombstone,
    Occupied(OccupiedEntry),
}

#[derive(Debug, Clone)]
pub struct RobinHoodMap {
    slots: Vec<Slot>,
    size: usize,
    tombstones: usize,
    /// Running sum of occupied-slot displacements, for `avg_probe`.
    dib_sum: u64,
    probe_hist: [u64; PROBE_HIST_BINS],
    /// Grow events (old capacity, new capacity) not yet drained by the
    /// owning container.
    resize_log: Vec<(usize, usize)>,
}

fn alloc_slots(capacity: usize) -> Result<Vec<Slot>> {
    let mut slots = Vec::new();
    slots.try_reserve_exact(capacity)?;
    slots.resize_with(capacity, || Slot::Empty);
    Ok(slots)
}

impl RobinHoodMap {
    pub fn new(capacity: usize) -> Result<Self> {
        if !capacity.is_power_of_two() {
            return Err(EngineError::bad_input(format!(
                "robinhood capacity must be a power of two, got {capacity}"
            )));
        }
        let capacity = capacity.max(MIN_CAPACITY);
        Ok(Self {
            slots: alloc_slots(capacity)?,
            size: 0,
            tombstones: 0,
            dib_sum: 0,
            probe_hist: [0; PROBE_HIST_BINS],
            resize_log: Vec::new(),
        })
    }

    /// Size a fresh table so `expected` entries fit without an immediate
    /// grow. Used when this map is a migration or compaction target.
    pub fn with_capacity_for(expected: usize) -> Result<Self> {
        let wanted = ((expected as f64 / 0.6).ceil() as usize).max(MIN_CAPACITY);
        Self::new(wanted.next_power_of_two())
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn tombstones(&self) -> usize {
        self.tombstones
    }

    /// In-use slots (occupied + tombstones) over capacity.
    pub fn load_factor(&self) -> f64 {
        (self.size + self.tombstones) as f64 / self.capacity() as f64
    }

    pub fn tombstone_ratio(&self) -> f64 {
        self.tombstones as f64 / self.capacity() as f64
    }

    /// Mean displacement of stored entries; 0 for an empty table.
    pub fn avg_probe(&self) -> f64 {
        if self.size == 0 {
            0.0
        } else {
            self.dib_sum as f64 / self.size as f64
        }
    }

    /// Non-empty probe-length bins as `(distance, count)` pairs. The last
    /// bin aggregates everything at or beyond its distance.
    pub fn probe_histogram(&self) -> Vec<(u32, u64)> {
        self.probe_hist
            .iter()
            .enumerate()
            .filter(|(_, &count)| count > 0)
            .map(|(dist, &count)| (dist as u32, count))
            .collect()
    }

    #[inline]
    fn record_probe(&mut self, distance: usize) {
        let bin = distance.min(PROBE_HIST_BINS - 1);
        self.probe_hist[bin] += 1;
    }

    /// Walk the probe sequence for `key`. Returns the slot index when the
    /// key is present, plus the distance walked either way.
    fn probe(&self, hash: u64, key: &[u8]) -> (Option<usize>, usize) {
        let cap = self.capacity();
        let mask = cap - 1;
        let home = home_index(hash, cap);
        let mut idx = home;
        let mut dist = 0usize;
        loop {
            match &self.slots[idx] {
                Slot::Empty => return (None, dist),
                Slot::Tombstone => {}
                Slot::Occupied(entry) => {
                    if entry.hash == hash && entry.key == key {
                        return (Some(idx), dist);
                    }
                    // Displacement monotonicity: nothing with this home
                    // can live past a slot that is closer to its own.
                    if (entry.dib as usize) < dist {
                        return (None, dist);
                    }
                }
            }
            idx = (idx + 1) & mask;
            dist += 1;
            if dist >= cap {
                return (None, dist);
            }
        }
    }

    pub fn get(&mut self, key: &[u8]) -> Option<&[u8]> {
        let hash = hash_key(key);
        let (found, dist) = self.probe(hash, key);
        self.record_probe(dist);
        match found {
            Some(idx) => match &self.slots[idx] {
                Slot::Occupied(entry) => Some(entry.value.as_slice()),
                _ => None,
            },
            None => None,
        }
    }

    /// Lookup without touching probe telemetry.
    pub fn peek(&self, key: &[u8]) -> Option<&[u8]> {
        let hash = hash_key(key);
        match self.probe(hash, key) {
            (Some(idx), _) => match &self.slots[idx] {
                Slot::Occupied(entry) => Some(entry.value.as_slice()),
                _ => None,
            },
            (None, _) => None,
        }
    }

    /// Insert or overwrite. Returns `true` when the key was newly
    /// inserted. A single probe walk finds an existing key or remembers
    /// the first tombstone for recycling; only a genuinely new key that
    /// meets no tombstone pays the displacement walk.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        self.ensure_room()?;
        let hash = hash_key(key);
        let cap = self.capacity();
        let mask = cap - 1;
        let home = home_index(hash, cap);

        let mut idx = home;
        let mut dist = 0usize;
        let mut first_tombstone: Option<usize> = None;
        loop {
            match &mut self.slots[idx] {
                Slot::Empty => break,
                Slot::Tombstone => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(idx);
                    }
                }
                Slot::Occupied(entry) => {
                    if entry.hash == hash && entry.key == key {
                        entry.value = value.to_vec();
                        return Ok(false);
                    }
                    if (entry.dib as usize) < dist {
                        break;
                    }
                }
            }
            idx = (idx + 1) & mask;
            dist += 1;
        }

        if let Some(tomb) = first_tombstone {
            let dib = probe_distance(home, tomb, cap) as u32;
            self.slots[tomb] = Slot::Occupied(OccupiedEntry {
                key: key.to_vec(),
                value: value.to_vec(),
                hash,
                dib,
            });
            self.tombstones -= 1;
            self.size += 1;
            self.dib_sum += u64::from(dib);
            return Ok(true);
        }

        self.insert_displacing(
            OccupiedEntry {
                key: key.to_vec(),
                value: value.to_vec(),
                hash,
                dib: dist as u32,
            },
            idx,
        );
        Ok(true)
    }

    /// Robin Hood displacement walk starting at `idx` with a carried
    /// entry. Swaps whenever the resident is strictly closer to its home
    /// than the carried entry; ties advance without swapping.
    fn insert_displacing(&mut self, mut carried: OccupiedEntry, mut idx: usize) {
        let mask = self.capacity() - 1;
        loop {
            match &mut self.slots[idx] {
                Slot::Empty => {
                    self.dib_sum += u64::from(carried.dib);
                    self.slots[idx] = Slot::Occupied(carried);
                    self.size += 1;
                    return;
                }
                Slot::Tombstone => {
                    self.dib_sum += u64::from(carried.dib);
                    self.slots[idx] = Slot::Occupied(carried);
                    self.tombstones -= 1;
                    self.size += 1;
                    return;
                }
                Slot::Occupied(resident) => {
                    if resident.dib < carried.dib {
                        self.dib_sum -= u64::from(resident.dib);
                        self.dib_sum += u64::from(carried.dib);
                        carried = mem::replace(resident, carried);
                    }
                }
            }
            idx = (idx + 1) & mask;
            carried.dib += 1;
        }
    }

    /// Tombstone delete; no back-shifting. Compaction reclaims the slots.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        let hash = hash_key(key);
        let (found, dist) = self.probe(hash, key);
        self.record_probe(dist);
        let Some(idx) = found else {
            return false;
        };
        if let Slot::Occupied(entry) = &self.slots[idx] {
            self.dib_sum -= u64::from(entry.dib);
        }
        self.slots[idx] = Slot::Tombstone;
        self.size -= 1;
        self.tombstones += 1;
        true
    }

    pub fn items(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied(e) => Some((e.key.as_slice(), e.value.as_slice())),
            _ => None,
        })
    }

    fn ensure_room(&mut self) -> Result<()> {
        let projected = (self.size + self.tombstones + 1) as f64 / self.capacity() as f64;
        if projected > RESIZE_HIGH_WATER {
            let old = self.capacity();
            self.rebuild(old * 2)?;
            self.resize_log.push((old, old * 2));
        }
        Ok(())
    }

    /// Reinsert every occupied entry into a fresh slot array of
    /// `new_capacity`, dropping tombstones. All-or-nothing: the old array
    /// stays authoritative if the new allocation fails.
    fn rebuild(&mut self, new_capacity: usize) -> Result<()> {
        let new_slots = alloc_slots(new_capacity)?;
        let old_slots = mem::replace(&mut self.slots, new_slots);
        self.size = 0;
        self.tombstones = 0;
        self.dib_sum = 0;
        for slot in old_slots {
            if let Slot::Occupied(entry) = slot {
                let home = home_index(entry.hash, new_capacity);
                self.insert_displacing(
                    OccupiedEntry {
                        dib: 0,
                        ..entry
                    },
                    home,
                );
            }
        }
        Ok(())
    }

    /// Drop all tombstones by rebuilding at the same capacity, or at the
    /// smallest power of two that fits when the table is underfull.
    pub fn compact(&mut self) -> Result<()> {
        let target = self.compacted_capacity();
        self.rebuild(target)
    }

    pub(crate) fn compacted_capacity(&self) -> usize {
        let cap = self.capacity();
        if (self.size as f64) < SHRINK_LOW_WATER * cap as f64 {
            ((self.size as f64 / 0.5).ceil() as usize)
                .max(MIN_CAPACITY)
                .next_power_of_two()
        } else {
            cap
        }
    }

    pub(crate) fn take_resizes(&mut self) -> Vec<(usize, usize)> {
        mem::take(&mut self.resize_log)
    }

    /// Remove and return the entry at `idx` if occupied, leaving a
    /// tombstone so later probes still traverse the chain. Used by the
    /// hybrid container to drain this map incrementally.
    pub(crate) fn take_slot(&mut self, idx: usize) -> Option<(Key, Value)> {
        match mem::replace(&mut self.slots[idx], Slot::Tombstone) {
            Slot::Occupied(entry) => {
                self.size -= 1;
                self.tombstones += 1;
                self.dib_sum -= u64::from(entry.dib);
                Some((entry.key, entry.value))
            }
            other => {
                self.slots[idx] = other;
                None
            }
        }
    }

    pub(crate) fn slot_states(&self) -> &[Slot] {
        &self.slots
    }

    /// Rebuild from a snapshot slot layout, re-deriving hashes and
    /// displacements and checking the table's invariants.
    pub(crate) fn rehydrate(capacity: usize, raw: Vec<Option<Option<(Key, Value)>>>) -> Result<Self> {
        // raw: None = empty, Some(None) = tombstone, Some(Some(kv)) = occupied
        if !capacity.is_power_of_two() {
            return Err(EngineError::invariant(format!(
                "snapshot capacity {capacity} is not a power of two"
            )));
        }
        if raw.len() != capacity {
            return Err(EngineError::invariant(format!(
                "snapshot slot count {} does not match capacity {capacity}",
                raw.len()
            )));
        }
        let mut map = Self {
            slots: alloc_slots(capacity)?,
            size: 0,
            tombstones: 0,
            dib_sum: 0,
            probe_hist: [0; PROBE_HIST_BINS],
            resize_log: Vec::new(),
        };
        for (idx, cell) in raw.into_iter().enumerate() {
            match cell {
                None => {}
                Some(None) => {
                    map.slots[idx] = Slot::Tombstone;
                    map.tombstones += 1;
                }
                Some(Some((key, value))) => {
                    let hash = hash_key(&key);
                    let dib = probe_distance(home_index(hash, capacity), idx, capacity) as u32;
                    map.slots[idx] = Slot::Occupied(OccupiedEntry {
                        key,
                        value,
                        hash,
                        dib,
                    });
                    map.size += 1;
                    map.dib_sum += u64::from(dib);
                }
            }
        }
        map.check_invariants()?;
        Ok(map)
    }

    /// Full structural check: slot accounting, displacement bookkeeping,
    /// reachability of every entry from its home slot, and key
    /// uniqueness. Used by `verify-snapshot`, rehydration, and tests.
    pub fn check_invariants(&self) -> Result<()> {
        let cap = self.capacity();
        let mask = cap - 1;
        let mut occupied = 0usize;
        let mut tombs = 0usize;
        let mut dib_sum = 0u64;
        let mut seen: HashSet<&[u8]> = HashSet::new();
        for (idx, slot) in self.slots.iter().enumerate() {
            match slot {
                Slot::Empty => {}
                Slot::Tombstone => tombs += 1,
                Slot::Occupied(entry) => {
                    occupied += 1;
                    dib_sum += u64::from(entry.dib);
                    if entry.hash != hash_key(&entry.key) {
                        return Err(EngineError::invariant(format!(
                            "slot {idx}: stored hash does not match key"
                        )));
                    }
                    let home = home_index(entry.hash, cap);
                    let actual = probe_distance(home, idx, cap);
                    if actual != entry.dib as usize {
                        return Err(EngineError::invariant(format!(
                            "slot {idx}: recorded dib {} but actual distance {actual}",
                            entry.dib
                        )));
                    }
                    if !seen.insert(entry.key.as_slice()) {
                        return Err(EngineError::invariant(format!(
                            "slot {idx}: duplicate key in table"
                        )));
                    }
                    // The entry must be reachable: no empty slot and no
                    // closer-to-home resident on the probe path before it.
                    for step in 0..entry.dib as usize {
                        match &self.slots[(home + step) & mask] {
                            Slot::Empty => {
                                return Err(EngineError::invariant(format!(
                                    "slot {idx}: probe chain broken by empty slot at step {step}"
                                )));
                            }
                            Slot::Occupied(on_path) if (on_path.dib as usize) < step => {
                                return Err(EngineError::invariant(format!(
                                    "slot {idx}: displacement monotonicity violated at step {step}"
                                )));
                            }
                            _ => {}
                        }
                    }
                }
            }
        }
        if occupied != self.size {
            return Err(EngineError::invariant(format!(
                "size {} does not match occupied slot count {occupied}",
                self.size
            )));
        }
        if tombs != self.tombstones {
            return Err(EngineError::invariant(format!(
                "tombstones {} does not match tombstone slot count {tombs}",
                self.tombstones
            )));
        }
        if self.size + self.tombstones > cap {
            return Err(EngineError::invariant(
                "occupied plus tombstone slots exceed capacity",
            ));
        }
        if dib_sum != self.dib_sum {
            return Err(EngineError::invariant(format!(
                "dib sum {} does not match recomputed {dib_sum}",
                self.dib_sum
            )));
        }
        Ok(())
    }
}
