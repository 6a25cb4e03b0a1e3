pub mod builder;

pub use builder::BloomFilterBuilder;

use xxhash_rust::xxh3::xxh3_128;

use crate::coding::Decoder;
use crate::error::{Error, Result};

/// Name of the table meta block holding a serialized `BloomFilter`.
pub const FILTER_META_BLOCK_NAME: &str = "filter.xxh3.bloom";

/// Probabilistic data structure: "is this key in the set?"
///
/// - If any bit is 0 → key is DEFINITELY NOT in the set
/// - If all bits are 1 → key is PROBABLY in the set (false positive possible)
///
/// One filter is stored per table, over the user keys it contains. Point
/// lookups consult it before reading a data block, so a miss usually costs
/// no disk read at all.
///
/// Sizing:
///   bits_per_key = -1.44 * log2(false_positive_rate)
///   num_hashes = bits_per_key * ln(2)
///
///   1% FPR  → ~10 bits/key, 7 hashes
///   0.1% FPR → ~14 bits/key, 10 hashes
///
/// Hash trick: don't need k independent hash functions.
/// Use double hashing: h_i(key) = h1(key) + i * h2(key) (mod m)
/// where h1, h2 come from splitting a 128-bit hash into two 64-bit halves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_hashes: u32,
    num_bits: u32,
}

impl BloomFilter {
    /// Create a new bloom filter sized for expected_items at the given FPR.
    ///
    /// # Panics
    /// Panics if expected_items is 0 or FPR is not in (0, 1).
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        assert!(expected_items > 0, "expected_items must be > 0");
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "FPR must be in (0, 1)"
        );

        let bits_per_key = -1.44 * false_positive_rate.log2();
        let num_bits = ((expected_items as f64) * bits_per_key).ceil() as u32;
        let num_bits = num_bits.max(64);

        let num_hashes = (bits_per_key * 2.0f64.ln()).ceil() as u32;
        // More than 30 probes costs more than it saves.
        let num_hashes = num_hashes.clamp(1, 30);

        let num_u64s = (num_bits as usize).div_ceil(64);
        Self {
            bits: vec![0u64; num_u64s],
            num_hashes,
            num_bits,
        }
    }

    /// Add a key to the bloom filter.
    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = Self::hash_key(key);
        for i in 0..self.num_hashes {
            let pos = self.get_position(h1, h2, i);
            self.set_bit(pos);
        }
    }

    /// Check if a key MIGHT be in the set.
    /// false → definitely not here. true → probably here.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = Self::hash_key(key);
        (0..self.num_hashes).all(|i| self.check_bit(self.get_position(h1, h2, i)))
    }

    /// Encode as the table's filter meta block.
    ///
    /// ```text
    /// ┌──────────────────┬────────────────┬──────────────────────────┐
    /// │ num_hashes (4B)  │ num_bits (4B)  │ bit words (8B LE each)   │
    /// └──────────────────┴────────────────┴──────────────────────────┘
    /// ```
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.bits.len() * 8);
        buf.extend_from_slice(&self.num_hashes.to_le_bytes());
        buf.extend_from_slice(&self.num_bits.to_le_bytes());
        for word in &self.bits {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        buf
    }

    /// Decode a filter written by `serialize`.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let mut decoder = Decoder::new(data);
        let (num_hashes, num_bits) = match (decoder.fixed32(), decoder.fixed32()) {
            (Some(h), Some(b)) => (h, b),
            _ => return Err(Error::corruption("bloom filter header truncated")),
        };
        let words = (num_bits as usize).div_ceil(64);
        let body = decoder.remaining();
        if num_hashes == 0 || num_bits == 0 || body.len() != words * 8 {
            return Err(Error::corruption(format!(
                "bad bloom filter: {num_hashes} hashes, {num_bits} bits, {} body bytes",
                body.len()
            )));
        }
        let bits = body
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect();
        Ok(BloomFilter {
            bits,
            num_hashes,
            num_bits,
        })
    }

    /// Get the number of hash functions used.
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Get the total number of bits in the filter.
    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    fn hash_key(key: &[u8]) -> (u64, u64) {
        let hash128 = xxh3_128(key);
        (hash128 as u64, (hash128 >> 64) as u64)
    }

    fn get_position(&self, h1: u64, h2: u64, i: u32) -> u32 {
        let i = i as u64;
        (h1.wrapping_add(i.wrapping_mul(h2)) % (self.num_bits as u64)) as u32
    }

    fn set_bit(&mut self, pos: u32) {
        self.bits[(pos / 64) as usize] |= 1 << (pos % 64);
    }

    fn check_bit(&self, pos: u32) -> bool {
        (self.bits[(pos / 64) as usize] >> (pos % 64)) & 1 == 1
    }
}
