//! Internal key format: user key + 8-byte trailer packing the sequence number
//! and the value type.
//!
//! ```text
//! ┌──────────────────────┬───────────────────────────────────┐
//! │ user key (var)       │ fixed64 LE: (sequence << 8) | type │
//! └──────────────────────┴───────────────────────────────────┘
//! ```
//!
//! Ordering: (user_key ASC, sequence DESC, type DESC). The newest version of
//! a key always comes first during merging.

use std::fmt;

use crate::coding::{decode_fixed64, put_fixed64};

/// Monotonically increasing counter assigned to every write.
pub type SequenceNumber = u64;

/// Sequence numbers are packed into 56 bits so the type fits in the low byte.
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1 << 56) - 1;

/// Distinguishes puts from deletes.
/// A Deletion writes a tombstone: older versions may live in deeper tables,
/// so the key cannot simply be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ValueType {
    Deletion = 0x0,
    Value = 0x1,
}

/// The type used when building a seek key. Entries are sorted by type in
/// decreasing order, so seeking with the highest type lands on the first
/// entry for a given `(user_key, sequence)`.
pub const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::Value;

impl ValueType {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(ValueType::Deletion),
            0x1 => Some(ValueType::Value),
            _ => None,
        }
    }
}

pub fn pack_sequence_and_type(sequence: SequenceNumber, value_type: ValueType) -> u64 {
    assert!(sequence <= MAX_SEQUENCE_NUMBER, "sequence {sequence} out of range");
    (sequence << 8) | value_type as u64
}

/// Borrowed, decoded view of an internal key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

impl<'a> ParsedInternalKey<'a> {
    pub fn new(user_key: &'a [u8], sequence: SequenceNumber, value_type: ValueType) -> Self {
        ParsedInternalKey {
            user_key,
            sequence,
            value_type,
        }
    }

    pub fn encoded_len(&self) -> usize {
        self.user_key.len() + 8
    }
}

impl fmt::Display for ParsedInternalKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' @ {} : {}",
            String::from_utf8_lossy(self.user_key),
            self.sequence,
            self.value_type as u8
        )
    }
}

pub fn append_internal_key(dst: &mut Vec<u8>, key: &ParsedInternalKey<'_>) {
    dst.extend_from_slice(key.user_key);
    put_fixed64(dst, pack_sequence_and_type(key.sequence, key.value_type));
}

/// Decode an internal key. Returns `None` if it is too short to hold the
/// trailer or the type byte is unknown.
pub fn parse_internal_key(internal_key: &[u8]) -> Option<ParsedInternalKey<'_>> {
    let n = internal_key.len();
    if n < 8 {
        return None;
    }
    let num = decode_fixed64(&internal_key[n - 8..]);
    let value_type = ValueType::from_u8((num & 0xff) as u8)?;
    Some(ParsedInternalKey {
        user_key: &internal_key[..n - 8],
        sequence: num >> 8,
        value_type,
    })
}

/// User-key portion of an internal key. Caller guarantees `len >= 8`.
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    debug_assert!(internal_key.len() >= 8);
    &internal_key[..internal_key.len() - 8]
}

/// Packed trailer of an internal key. Caller guarantees `len >= 8`.
pub fn extract_trailer(internal_key: &[u8]) -> u64 {
    decode_fixed64(&internal_key[internal_key.len() - 8..])
}

/// Owned internal key, stored in its encoded form so it can be compared with
/// the internal comparator without re-encoding.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct InternalKey {
    rep: Vec<u8>,
}

impl InternalKey {
    pub fn new(user_key: &[u8], sequence: SequenceNumber, value_type: ValueType) -> Self {
        let mut rep = Vec::with_capacity(user_key.len() + 8);
        append_internal_key(&mut rep, &ParsedInternalKey::new(user_key, sequence, value_type));
        InternalKey { rep }
    }

    /// Wrap already-encoded bytes (e.g. read from a manifest).
    pub fn decode_from(encoded: &[u8]) -> Self {
        InternalKey {
            rep: encoded.to_vec(),
        }
    }

    pub fn encode(&self) -> &[u8] {
        &self.rep
    }

    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.rep)
    }

    pub fn is_empty(&self) -> bool {
        self.rep.is_empty()
    }

    pub fn clear(&mut self) {
        self.rep.clear();
    }
}

impl fmt::Debug for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match parse_internal_key(&self.rep) {
            Some(parsed) => write!(f, "{parsed}"),
            None => write!(f, "(bad){:?}", self.rep),
        }
    }
}

const LOOKUP_INLINE: usize = 200;

enum LookupBuf {
    Inline { buf: [u8; LOOKUP_INLINE], len: usize },
    Heap(Vec<u8>),
}

/// A seek key built from `(user_key, sequence)` with the seek type. Short
/// keys live in an inline buffer; long keys fall back to the heap.
pub struct LookupKey {
    buf: LookupBuf,
}

impl LookupKey {
    pub fn new(user_key: &[u8], sequence: SequenceNumber) -> Self {
        let trailer = pack_sequence_and_type(sequence, VALUE_TYPE_FOR_SEEK).to_le_bytes();
        let needed = user_key.len() + 8;
        let buf = if needed <= LOOKUP_INLINE {
            let mut buf = [0u8; LOOKUP_INLINE];
            buf[..user_key.len()].copy_from_slice(user_key);
            buf[user_key.len()..needed].copy_from_slice(&trailer);
            LookupBuf::Inline { buf, len: needed }
        } else {
            let mut v = Vec::with_capacity(needed);
            v.extend_from_slice(user_key);
            v.extend_from_slice(&trailer);
            LookupBuf::Heap(v)
        };
        LookupKey { buf }
    }

    /// The full internal key (user key + seek trailer).
    pub fn internal_key(&self) -> &[u8] {
        match &self.buf {
            LookupBuf::Inline { buf, len } => &buf[..*len],
            LookupBuf::Heap(v) => v,
        }
    }

    pub fn user_key(&self) -> &[u8] {
        extract_user_key(self.internal_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_key_roundtrip() {
        let keys: [&[u8]; 3] = [b"", b"k", b"hello"];
        let seqs = [0, 1, 100, MAX_SEQUENCE_NUMBER - 1, MAX_SEQUENCE_NUMBER];
        for key in keys {
            for seq in seqs {
                for t in [ValueType::Value, ValueType::Deletion] {
                    let ikey = InternalKey::new(key, seq, t);
                    let parsed = parse_internal_key(ikey.encode()).unwrap();
                    assert_eq!(parsed.user_key, key);
                    assert_eq!(parsed.sequence, seq);
                    assert_eq!(parsed.value_type, t);
                }
            }
        }
    }

    #[test]
    fn short_key_fails_to_parse() {
        assert!(parse_internal_key(b"bar").is_none());
        assert!(parse_internal_key(b"").is_none());
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let mut rep = b"foo".to_vec();
        put_fixed64(&mut rep, (5 << 8) | 0x7);
        assert!(parse_internal_key(&rep).is_none());
    }

    #[test]
    #[should_panic]
    fn sequence_overflow_is_a_programming_error() {
        pack_sequence_and_type(MAX_SEQUENCE_NUMBER + 1, ValueType::Value);
    }

    #[test]
    fn lookup_key_inline_and_heap() {
        let short = LookupKey::new(b"abc", 7);
        assert_eq!(short.user_key(), b"abc");
        let parsed = parse_internal_key(short.internal_key()).unwrap();
        assert_eq!(parsed.sequence, 7);
        assert_eq!(parsed.value_type, VALUE_TYPE_FOR_SEEK);

        let long_key = vec![b'x'; 1000];
        let long = LookupKey::new(&long_key, 9);
        assert_eq!(long.user_key(), long_key.as_slice());
        assert_eq!(parse_internal_key(long.internal_key()).unwrap().sequence, 9);
    }
}
