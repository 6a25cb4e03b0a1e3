pub mod arena;
pub mod skiplist;

use std::sync::Arc;

use parking_lot::RwLock;

use crate::coding::{get_length_prefixed_slice, put_length_prefixed_slice};
use crate::comparator::{Comparator, InternalKeyComparator};
use crate::error::Result;
use crate::iterator::StorageIterator;
use crate::types::{
    parse_internal_key, LookupKey, ParsedInternalKey, SequenceNumber, ValueType,
    append_internal_key,
};
use skiplist::SkipList;

/// Answer of a memtable point lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemTableGet {
    /// The newest visible entry is a value.
    Found(Vec<u8>),
    /// The newest visible entry is a deletion: stop searching older data.
    Deleted,
    /// The memtable holds nothing for this user key.
    NotPresent,
}

/// In-memory sorted buffer for writes. Wraps a SkipList.
///
/// Every write goes here first. When size exceeds the write buffer size,
/// the memtable is frozen (becomes immutable) and flushed to a table.
///
/// Shared through `Arc`: the write path, the flush and every live iterator
/// each hold a reference, and the memtable (with its arena) is freed when
/// the last one drops. The skip list is insert-only, so readers only need
/// the lock long enough to step one node.
///
/// Concurrency is one writer and many readers through a `RwLock` rather
/// than atomic links: a reader may wait for the insert in progress, but
/// never for another reader, and an iterator keeps its node across inserts
/// because node indices never move.
pub struct MemTable {
    table: RwLock<SkipList>,
    comparator: InternalKeyComparator,
}

impl MemTable {
    pub fn new(comparator: InternalKeyComparator) -> Self {
        MemTable {
            table: RwLock::new(SkipList::new(comparator.clone())),
            comparator,
        }
    }

    /// Add an entry mapping `key` to `value` at `sequence` with the given
    /// type. Deletions carry an empty value.
    pub fn add(&self, sequence: SequenceNumber, value_type: ValueType, key: &[u8], value: &[u8]) {
        let mut ikey = Vec::with_capacity(key.len() + 8);
        append_internal_key(&mut ikey, &ParsedInternalKey::new(key, sequence, value_type));
        let mut encoded_value = Vec::with_capacity(value.len() + 5);
        put_length_prefixed_slice(&mut encoded_value, value);
        self.table.write().insert(&ikey, &encoded_value);
    }

    /// Look up the newest entry for `key.user_key()` visible at the lookup
    /// sequence.
    pub fn get(&self, key: &LookupKey) -> MemTableGet {
        let table = self.table.read();
        let Some(node) = table.find_greater_or_equal(key.internal_key(), None) else {
            return MemTableGet::NotPresent;
        };
        let Some(parsed) = parse_internal_key(table.key(node)) else {
            return MemTableGet::NotPresent;
        };
        if self
            .comparator
            .compare_user(parsed.user_key, key.user_key())
            .is_ne()
        {
            return MemTableGet::NotPresent;
        }
        match parsed.value_type {
            ValueType::Value => MemTableGet::Found(decode_value(table.value(node)).to_vec()),
            ValueType::Deletion => MemTableGet::Deleted,
        }
    }

    /// Returns an estimate of the number of bytes of data in use.
    pub fn approximate_memory_usage(&self) -> usize {
        self.table.read().memory_usage()
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    /// Iterator over internal keys and raw values. Keeps the memtable alive.
    pub fn iter(self: &Arc<Self>) -> MemTableIterator {
        MemTableIterator {
            mem: Arc::clone(self),
            node: None,
            key: Vec::new(),
            value: Vec::new(),
        }
    }

    pub fn comparator(&self) -> &InternalKeyComparator {
        &self.comparator
    }
}

fn decode_value(encoded: &[u8]) -> &[u8] {
    get_length_prefixed_slice(encoded)
        .map(|(v, _)| v)
        .unwrap_or_default()
}

/// Iterator over memtable entries in internal-key order.
///
/// Holds a node index rather than a borrow: nodes are never removed, so the
/// position stays meaningful while writers keep inserting. The current
/// entry is copied out so the read lock is held only while stepping.
pub struct MemTableIterator {
    mem: Arc<MemTable>,
    node: Option<usize>,
    key: Vec<u8>,
    value: Vec<u8>,
}

impl MemTableIterator {
    fn load(&mut self, table: &SkipList, node: Option<usize>) {
        self.node = node;
        self.key.clear();
        self.value.clear();
        if let Some(n) = node {
            self.key.extend_from_slice(table.key(n));
            self.value.extend_from_slice(decode_value(table.value(n)));
        }
    }
}

impl StorageIterator for MemTableIterator {
    fn is_valid(&self) -> bool {
        self.node.is_some()
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.is_valid());
        &self.key
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.is_valid());
        &self.value
    }

    fn seek_to_first(&mut self) -> Result<()> {
        let mem = Arc::clone(&self.mem);
        let table = mem.table.read();
        self.load(&table, table.first());
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        let mem = Arc::clone(&self.mem);
        let table = mem.table.read();
        self.load(&table, table.find_last());
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        let mem = Arc::clone(&self.mem);
        let table = mem.table.read();
        self.load(&table, table.find_greater_or_equal(target, None));
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        let mem = Arc::clone(&self.mem);
        let table = mem.table.read();
        let next = self.node.and_then(|n| table.next(n));
        self.load(&table, next);
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        // No back links: search for the last node before the current key.
        let mem = Arc::clone(&self.mem);
        let table = mem.table.read();
        let prev = table.find_less_than(&self.key);
        self.load(&table, prev);
        Ok(())
    }
}
