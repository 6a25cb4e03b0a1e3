use crate::bloom::BloomFilter;

/// Collects the keys of a table while it is being built and sizes the
/// filter once the final key count is known.
///
/// Consecutive duplicates are dropped: a table holds many versions of the
/// same user key, and the filter only needs it once.
pub struct BloomFilterBuilder {
    keys: Vec<Vec<u8>>,
    false_positive_rate: f64,
}

impl BloomFilterBuilder {
    pub fn new(false_positive_rate: f64) -> Self {
        BloomFilterBuilder {
            keys: Vec::new(),
            false_positive_rate,
        }
    }

    /// Add a key to the bloom filter being built.
    pub fn add_key(&mut self, key: &[u8]) {
        if self.keys.last().is_some_and(|last| last.as_slice() == key) {
            return;
        }
        self.keys.push(key.to_vec());
    }

    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }

    /// Finalize and return the bloom filter.
    pub fn build(self) -> BloomFilter {
        let mut filter = BloomFilter::new(self.keys.len().max(1), self.false_positive_rate);
        for key in &self.keys {
            filter.insert(key);
        }
        filter
    }
}
