//! Capacity-bounded cache with least-recently-used eviction.
//!
//! Entries carry a caller-assigned charge counted against the capacity.
//! `lookup`/`insert` hand out `CacheHandle`s that pin their entry until
//! dropped (or passed to `release`). The cache is split into shards, each
//! behind its own mutex, so concurrent readers rarely contend.

mod lru;

pub use lru::{CacheHandle, Deleter};

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use xxhash_rust::xxh3::xxh3_64;

use lru::LruShard;

const NUM_SHARD_BITS: u32 = 4;
const NUM_SHARDS: usize = 1 << NUM_SHARD_BITS;

pub struct LruCache<V> {
    shards: Vec<Mutex<LruShard<V>>>,
    last_id: AtomicU64,
}

impl<V> LruCache<V> {
    /// Create a cache holding roughly `capacity` worth of charge.
    pub fn new(capacity: usize) -> Self {
        let per_shard = capacity.div_ceil(NUM_SHARDS);
        LruCache {
            shards: (0..NUM_SHARDS)
                .map(|_| Mutex::new(LruShard::new(per_shard)))
                .collect(),
            last_id: AtomicU64::new(0),
        }
    }

    fn shard(&self, key: &[u8]) -> &Mutex<LruShard<V>> {
        let hash = xxh3_64(key);
        &self.shards[(hash >> (64 - NUM_SHARD_BITS)) as usize]
    }

    /// Insert a mapping, replacing any previous one for `key`, and return a
    /// handle to it. May evict unreferenced entries to make room.
    pub fn insert(&self, key: &[u8], value: V, charge: usize) -> CacheHandle<V> {
        self.shard(key).lock().insert(key, value, charge, None)
    }

    /// Like `insert`, with a cleanup callback run once the entry is gone
    /// from the cache and no handle references it.
    pub fn insert_with_deleter(
        &self,
        key: &[u8],
        value: V,
        charge: usize,
        deleter: Deleter<V>,
    ) -> CacheHandle<V> {
        self.shard(key).lock().insert(key, value, charge, Some(deleter))
    }

    /// Find `key` and mark it most recently used.
    pub fn lookup(&self, key: &[u8]) -> Option<CacheHandle<V>> {
        self.shard(key).lock().lookup(key)
    }

    /// Release a handle from `lookup` or `insert`. Equivalent to dropping it.
    pub fn release(&self, handle: CacheHandle<V>) {
        drop(handle);
    }

    /// Remove the mapping for `key`, if any.
    pub fn erase(&self, key: &[u8]) {
        self.shard(key).lock().remove(key);
    }

    /// A new id, for clients sharing one cache to partition the key space.
    pub fn new_id(&self) -> u64 {
        self.last_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Remove every entry not currently checked out.
    pub fn prune(&self) {
        for shard in &self.shards {
            shard.lock().prune();
        }
    }

    /// Sum of the charges of all entries in the cache.
    pub fn total_charge(&self) -> usize {
        self.shards.iter().map(|s| s.lock().usage()).sum()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
