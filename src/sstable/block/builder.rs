use crate::coding::{put_fixed32, put_varint32};

/// Accumulates sorted key-value pairs and serializes them into a block.
///
/// Keys are prefix-compressed: each entry stores only the suffix that
/// differs from the previous key. Every `restart_interval` entries the
/// compression restarts with a full key, and the offsets of those restart
/// points are listed at the end of the block so a reader can binary search
/// them.
///
/// On-disk layout of a block:
/// ```text
/// ┌──────────────────────────────────────────────────────────────┐
/// │ Entry: [shared(v32)][non_shared(v32)][val_len(v32)]          │
/// │        [key delta (non_shared)][value (val_len)]             │
/// │ ...                                                          │
/// ├──────────────────────────────────────────────────────────────┤
/// │ Restart array: [restart_0(4B)][restart_1(4B)]...             │
/// │ Num restarts (4B)                                            │
/// └──────────────────────────────────────────────────────────────┘
/// ```
pub struct BlockBuilder {
    data: Vec<u8>,
    restarts: Vec<u32>,
    /// Entries emitted since the last restart point.
    counter: usize,
    restart_interval: usize,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize) -> Self {
        assert!(restart_interval >= 1, "restart interval must be at least 1");
        BlockBuilder {
            data: Vec::new(),
            // First restart point is at offset 0.
            restarts: vec![0],
            counter: 0,
            restart_interval,
            last_key: Vec::new(),
        }
    }

    /// Add a key-value pair to the block. Keys MUST be added in increasing
    /// order; the table builder enforces it.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        let mut shared = 0;
        if self.counter < self.restart_interval {
            shared = self
                .last_key
                .iter()
                .zip(key)
                .take_while(|(a, b)| a == b)
                .count();
        } else {
            self.restarts.push(self.data.len() as u32);
            self.counter = 0;
        }
        let non_shared = key.len() - shared;

        put_varint32(&mut self.data, shared as u32);
        put_varint32(&mut self.data, non_shared as u32);
        put_varint32(&mut self.data, value.len() as u32);
        self.data.extend_from_slice(&key[shared..]);
        self.data.extend_from_slice(value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        debug_assert_eq!(self.last_key, key);
        self.counter += 1;
    }

    /// Finalize the block: append the restart array and its length.
    pub fn build(self) -> Vec<u8> {
        let mut block = self.data;
        for restart in &self.restarts {
            put_fixed32(&mut block, *restart);
        }
        put_fixed32(&mut block, self.restarts.len() as u32);
        block
    }

    /// Size of the block `build` would produce now.
    pub fn estimated_size(&self) -> usize {
        self.data.len() + self.restarts.len() * 4 + 4
    }

    /// Whether the block is empty (no entries added).
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
