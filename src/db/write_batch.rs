use crate::coding::{Decoder, decode_fixed32, decode_fixed64, put_length_prefixed_slice};
use crate::error::{Error, Result};
use crate::memtable::MemTable;
use crate::types::{SequenceNumber, ValueType};

/// Sequence number (8 bytes) then entry count (4 bytes).
const HEADER_SIZE: usize = 12;

/// A group of updates applied atomically.
///
/// Encoding, also the payload of a log record:
///
/// ```text
/// sequence: fixed64 | count: fixed32 | record*
/// record := 1 varstring varstring   (put key, value)
///         | 0 varstring             (delete key)
/// ```
///
/// Updates are applied in the order they were added, each with the next
/// sequence number after the batch's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBatch {
    rep: Vec<u8>,
}

/// Receives the updates of a batch in order.
pub trait Handler {
    fn put(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

impl Default for WriteBatch {
    fn default() -> Self {
        WriteBatch {
            rep: vec![0; HEADER_SIZE],
        }
    }
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(ValueType::Value as u8);
        put_length_prefixed_slice(&mut self.rep, key);
        put_length_prefixed_slice(&mut self.rep, value);
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.set_count(self.count() + 1);
        self.rep.push(ValueType::Deletion as u8);
        put_length_prefixed_slice(&mut self.rep, key);
    }

    pub fn clear(&mut self) {
        self.rep.clear();
        self.rep.resize(HEADER_SIZE, 0);
    }

    /// Number of updates in the batch.
    pub fn count(&self) -> u32 {
        decode_fixed32(&self.rep[8..])
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Size of the encoded batch.
    pub fn approximate_size(&self) -> usize {
        self.rep.len()
    }

    /// Append the updates of `source` after this batch's.
    pub fn append(&mut self, source: &WriteBatch) {
        self.set_count(self.count() + source.count());
        self.rep.extend_from_slice(&source.rep[HEADER_SIZE..]);
    }

    /// Replay every update into `handler`, in order.
    pub fn iterate(&self, handler: &mut dyn Handler) -> Result<()> {
        if self.rep.len() < HEADER_SIZE {
            return Err(Error::corruption("malformed WriteBatch (too small)"));
        }
        let mut input = Decoder::new(&self.rep[HEADER_SIZE..]);
        let mut found = 0;
        while let Some(tag) = input.byte() {
            found += 1;
            match ValueType::from_u8(tag) {
                Some(ValueType::Value) => {
                    let (Some(key), Some(value)) = (input.length_prefixed(), input.length_prefixed()) else {
                        return Err(Error::corruption("bad WriteBatch Put"));
                    };
                    handler.put(key, value);
                }
                Some(ValueType::Deletion) => {
                    let Some(key) = input.length_prefixed() else {
                        return Err(Error::corruption("bad WriteBatch Delete"));
                    };
                    handler.delete(key);
                }
                None => return Err(Error::corruption("unknown WriteBatch tag")),
            }
        }
        if found != self.count() {
            return Err(Error::corruption("WriteBatch has wrong count"));
        }
        Ok(())
    }

    pub(crate) fn from_contents(contents: Vec<u8>) -> Result<Self> {
        if contents.len() < HEADER_SIZE {
            return Err(Error::corruption("log record too small"));
        }
        Ok(WriteBatch { rep: contents })
    }

    pub(crate) fn contents(&self) -> &[u8] {
        &self.rep
    }

    pub(crate) fn sequence(&self) -> SequenceNumber {
        decode_fixed64(&self.rep)
    }

    pub(crate) fn set_sequence(&mut self, sequence: SequenceNumber) {
        self.rep[..8].copy_from_slice(&sequence.to_le_bytes());
    }

    fn set_count(&mut self, count: u32) {
        self.rep[8..HEADER_SIZE].copy_from_slice(&count.to_le_bytes());
    }

    /// Apply the batch to `mem`, numbering updates from the batch sequence.
    pub(crate) fn insert_into(&self, mem: &MemTable) -> Result<()> {
        let mut inserter = MemTableInserter {
            sequence: self.sequence(),
            mem,
        };
        self.iterate(&mut inserter)
    }
}

struct MemTableInserter<'a> {
    sequence: SequenceNumber,
    mem: &'a MemTable,
}

impl Handler for MemTableInserter<'_> {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.mem.add(self.sequence, ValueType::Value, key, value);
        self.sequence += 1;
    }

    fn delete(&mut self, key: &[u8]) {
        self.mem.add(self.sequence, ValueType::Deletion, key, b"");
        self.sequence += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::comparator::{BytewiseComparator, InternalKeyComparator};
    use crate::iterator::StorageIterator;
    use crate::types::parse_internal_key;

    fn print_contents(batch: &WriteBatch) -> String {
        let icmp = InternalKeyComparator::new(Arc::new(BytewiseComparator));
        let mem = Arc::new(MemTable::new(icmp));
        let mut state = String::new();
        let result = batch.insert_into(&mem);
        let mut iter = mem.iter();
        iter.seek_to_first().unwrap();
        let mut count = 0;
        while iter.is_valid() {
            let ikey = parse_internal_key(iter.key()).unwrap();
            let key = String::from_utf8_lossy(ikey.user_key);
            match ikey.value_type {
                ValueType::Value => {
                    let value = String::from_utf8_lossy(iter.value());
                    state.push_str(&format!("Put({key}, {value})"));
                }
                ValueType::Deletion => state.push_str(&format!("Delete({key})")),
            }
            state.push_str(&format!("@{}", ikey.sequence));
            count += 1;
            iter.next().unwrap();
        }
        if result.is_err() {
            state.push_str("ParseError()");
        } else if count != batch.count() {
            state.push_str("CountMismatch()");
        }
        state
    }

    #[test]
    fn empty_batch() {
        let batch = WriteBatch::new();
        assert_eq!(print_contents(&batch), "");
        assert_eq!(batch.count(), 0);
        assert!(batch.is_empty());
    }

    #[test]
    fn multiple_updates_get_consecutive_sequences() {
        let mut batch = WriteBatch::new();
        batch.put(b"foo", b"bar");
        batch.delete(b"box");
        batch.put(b"baz", b"boo");
        batch.set_sequence(100);
        assert_eq!(batch.sequence(), 100);
        assert_eq!(batch.count(), 3);
        assert_eq!(
            print_contents(&batch),
            "Put(baz, boo)@102Delete(box)@101Put(foo, bar)@100"
        );
    }

    #[test]
    fn truncated_record_is_reported() {
        let mut batch = WriteBatch::new();
        batch.put(b"foo", b"bar");
        batch.delete(b"box");
        batch.set_sequence(200);
        let contents = batch.contents();
        let truncated = WriteBatch::from_contents(contents[..contents.len() - 1].to_vec()).unwrap();
        assert_eq!(print_contents(&truncated), "Put(foo, bar)@200ParseError()");
    }

    #[test]
    fn append_keeps_order_and_counts() {
        let mut b1 = WriteBatch::new();
        let mut b2 = WriteBatch::new();
        b1.set_sequence(200);
        b2.set_sequence(300);
        b1.append(&b2);
        assert_eq!(print_contents(&b1), "");
        b2.put(b"a", b"va");
        b1.append(&b2);
        assert_eq!(print_contents(&b1), "Put(a, va)@200");
        b2.clear();
        b2.put(b"b", b"vb");
        b1.append(&b2);
        assert_eq!(print_contents(&b1), "Put(a, va)@200Put(b, vb)@201");
        b2.delete(b"foo");
        b1.append(&b2);
        assert_eq!(
            print_contents(&b1),
            "Put(a, va)@200Put(b, vb)@202Put(b, vb)@201Delete(foo)@203"
        );
    }

    #[test]
    fn approximate_size_grows() {
        let mut batch = WriteBatch::new();
        let empty = batch.approximate_size();
        batch.put(b"foo", b"bar");
        let one = batch.approximate_size();
        assert!(empty < one);
        batch.delete(b"foo");
        assert!(one < batch.approximate_size());
    }
}
