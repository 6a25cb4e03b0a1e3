use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Cleanup callback run exactly once, when an entry has left the cache and
/// the last handle to it is released.
pub type Deleter<V> = Box<dyn FnOnce(&[u8], &V) + Send + Sync>;

pub(crate) struct LruEntry<V> {
    key: Vec<u8>,
    value: V,
    charge: usize,
    deleter: Option<Deleter<V>>,
}

impl<V> Drop for LruEntry<V> {
    fn drop(&mut self) {
        if let Some(deleter) = self.deleter.take() {
            deleter(&self.key, &self.value);
        }
    }
}

/// A checked-out cache entry.
///
/// While a handle is alive its entry is pinned: it cannot be evicted, and
/// its deleter is deferred even if the entry is erased or replaced. Dropping
/// the handle releases it.
pub struct CacheHandle<V> {
    entry: Arc<LruEntry<V>>,
}

impl<V> CacheHandle<V> {
    pub fn value(&self) -> &V {
        &self.entry.value
    }

    pub fn key(&self) -> &[u8] {
        &self.entry.key
    }

    pub fn charge(&self) -> usize {
        self.entry.charge
    }
}

impl<V> fmt::Debug for CacheHandle<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheHandle")
            .field("key", &self.entry.key)
            .field("charge", &self.entry.charge)
            .finish()
    }
}

struct Slot<V> {
    entry: Arc<LruEntry<V>>,
    /// Position in the recency order; larger is more recent.
    tick: u64,
}

impl<V> Slot<V> {
    /// The cache's own reference is the only one.
    fn is_unreferenced(&self) -> bool {
        Arc::strong_count(&self.entry) == 1
    }
}

/// One shard of the cache. Not synchronized; `LruCache` wraps each shard in
/// a mutex.
pub(crate) struct LruShard<V> {
    capacity: usize,
    usage: usize,
    table: HashMap<Vec<u8>, Slot<V>>,
    /// Recency order: oldest tick first.
    lru: BTreeMap<u64, Vec<u8>>,
    next_tick: u64,
}

impl<V> LruShard<V> {
    pub(crate) fn new(capacity: usize) -> Self {
        LruShard {
            capacity,
            usage: 0,
            table: HashMap::new(),
            lru: BTreeMap::new(),
            next_tick: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    pub(crate) fn insert(
        &mut self,
        key: &[u8],
        value: V,
        charge: usize,
        deleter: Option<Deleter<V>>,
    ) -> CacheHandle<V> {
        let entry = Arc::new(LruEntry {
            key: key.to_vec(),
            value,
            charge,
            deleter,
        });
        let handle = CacheHandle {
            entry: Arc::clone(&entry),
        };

        if self.capacity == 0 {
            // Caching is off: the caller's handle is the only reference.
            return handle;
        }

        self.remove(key);
        let tick = self.tick();
        self.lru.insert(tick, key.to_vec());
        self.table.insert(key.to_vec(), Slot { entry, tick });
        self.usage += charge;
        self.evict();
        handle
    }

    pub(crate) fn lookup(&mut self, key: &[u8]) -> Option<CacheHandle<V>> {
        let tick = self.tick();
        let slot = self.table.get_mut(key)?;
        self.lru.remove(&slot.tick);
        slot.tick = tick;
        self.lru.insert(tick, key.to_vec());
        Some(CacheHandle {
            entry: Arc::clone(&slot.entry),
        })
    }

    /// Drop the mapping now. The deleter waits for outstanding handles.
    pub(crate) fn remove(&mut self, key: &[u8]) -> bool {
        match self.table.remove(key) {
            Some(slot) => {
                self.lru.remove(&slot.tick);
                self.usage -= slot.entry.charge;
                true
            }
            None => false,
        }
    }

    /// Evict unreferenced entries, oldest first, until usage fits.
    /// Pinned entries are skipped, so usage may stay above capacity.
    fn evict(&mut self) {
        while self.usage > self.capacity {
            let victim = self
                .lru
                .values()
                .find(|k| self.table.get(*k).is_some_and(Slot::is_unreferenced))
                .cloned();
            match victim {
                Some(key) => {
                    self.remove(&key);
                }
                None => break,
            }
        }
    }

    /// Remove every unreferenced entry.
    pub(crate) fn prune(&mut self) {
        let victims: Vec<Vec<u8>> = self
            .table
            .iter()
            .filter(|(_, slot)| slot.is_unreferenced())
            .map(|(k, _)| k.clone())
            .collect();
        for key in victims {
            self.remove(&key);
        }
    }

    pub(crate) fn usage(&self) -> usize {
        self.usage
    }

    pub(crate) fn len(&self) -> usize {
        self.table.len()
    }
}
