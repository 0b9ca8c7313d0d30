#![forbid(unsafe_code)]

//! Stable key hashing and probe-sequence arithmetic.
//!
//! Every table in the engine derives its slot indexes from the same 64-bit
//! hash so that snapshots rehydrate onto identical layouts across runs and
//! across machines. The hash is seeded with a fixed constant; workloads in
//! this repository deliberately include keys whose low hash bits collide,
//! so the probing discipline (not the hash) is what absorbs burstiness.

use xxhash_rust::xxh64::xxh64;

/// Fixed seed so key placement is reproducible across processes.
const HASH_SEED: u64 = 0x666c_6578_6d61_7001;

/// Stable 64-bit hash of an opaque byte-string key.
#[inline]
pub fn hash_key(key: &[u8]) -> u64 {
    xxh64(key, HASH_SEED)
}

/// Home slot for an open-addressed table of power-of-two `capacity`.
#[inline]
pub fn home_index(hash: u64, capacity: usize) -> usize {
    debug_assert!(capacity.is_power_of_two());
    (hash as usize) & (capacity - 1)
}

/// Top-level bucket for a chained table of power-of-two `buckets`.
#[inline]
pub fn bucket_index(hash: u64, buckets: usize) -> usize {
    debug_assert!(buckets.is_power_of_two());
    (hash as usize) & (buckets - 1)
}

/// Group within a bucket: the bits above the bucket bits, reduced modulo
/// the power-of-two group count.
#[inline]
pub fn group_index(hash: u64, buckets: usize, groups_per_bucket: usize) -> usize {
    debug_assert!(buckets.is_power_of_two());
    debug_assert!(groups_per_bucket.is_power_of_two());
    let bucket_bits = buckets.trailing_zeros();
    ((hash >> bucket_bits) as usize) & (groups_per_bucket - 1)
}

/// Probe distance from `home` to `index` on the linear sequence
/// `home, home+1, ...` modulo `capacity`.
#[inline]
pub fn probe_distance(home: usize, index: usize, capacity: usize) -> usize {
    debug_assert!(capacity.is_power_of_two());
    index.wrapping_sub(home) & (capacity - 1)
}
