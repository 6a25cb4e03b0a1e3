/// Bump allocator backing one memtable.
///
/// Memory is handed out from 4 KiB blocks and never freed individually: the
/// whole arena goes away with its memtable. Allocations are addressed by
/// `ArenaSlice` (block index + offset) instead of raw pointers, so the skip
/// list can refer to its keys without borrowing the arena.
///
/// ```text
/// blocks[0]: [entry][entry][entry][....unused....]
/// blocks[1]: [large allocation, own block        ]
/// blocks[2]: [entry][entry][.....remaining.......]  <- current
/// ```
pub struct Arena {
    blocks: Vec<Box<[u8]>>,
    /// Index of the block small allocations are carved from.
    current: Option<usize>,
    alloc_offset: usize,
    remaining: usize,
    memory_usage: usize,
}

/// Location of an allocation inside an `Arena`. Stable for the arena's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaSlice {
    block: u32,
    offset: u32,
    len: u32,
}

impl ArenaSlice {
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

pub const BLOCK_SIZE: usize = 4096;

impl Arena {
    pub fn new() -> Self {
        Arena {
            blocks: Vec::new(),
            current: None,
            alloc_offset: 0,
            remaining: 0,
            memory_usage: 0,
        }
    }

    /// Reserve `bytes` bytes. The region is zeroed; fill it via `get_mut`.
    pub fn allocate(&mut self, bytes: usize) -> ArenaSlice {
        assert!(bytes > 0, "zero-sized arena allocation");
        if bytes <= self.remaining {
            if let Some(block) = self.current {
                let slice = ArenaSlice {
                    block: block as u32,
                    offset: self.alloc_offset as u32,
                    len: bytes as u32,
                };
                self.alloc_offset += bytes;
                self.remaining -= bytes;
                return slice;
            }
        }
        self.allocate_fallback(bytes)
    }

    /// Allocate and copy `data` in.
    pub fn alloc_copy(&mut self, data: &[u8]) -> ArenaSlice {
        let slice = self.allocate(data.len().max(1));
        if !data.is_empty() {
            self.get_mut(slice).copy_from_slice(data);
        }
        ArenaSlice {
            len: data.len() as u32,
            ..slice
        }
    }

    fn allocate_fallback(&mut self, bytes: usize) -> ArenaSlice {
        if bytes > BLOCK_SIZE / 4 {
            // Large objects get their own block so the rest of the current
            // block is not wasted.
            let block = self.new_block(bytes);
            return ArenaSlice {
                block: block as u32,
                offset: 0,
                len: bytes as u32,
            };
        }

        // Waste whatever is left in the current block.
        let block = self.new_block(BLOCK_SIZE);
        self.current = Some(block);
        self.alloc_offset = bytes;
        self.remaining = BLOCK_SIZE - bytes;
        ArenaSlice {
            block: block as u32,
            offset: 0,
            len: bytes as u32,
        }
    }

    fn new_block(&mut self, bytes: usize) -> usize {
        self.blocks.push(vec![0u8; bytes].into_boxed_slice());
        self.memory_usage += bytes + std::mem::size_of::<Box<[u8]>>();
        self.blocks.len() - 1
    }

    pub fn get(&self, slice: ArenaSlice) -> &[u8] {
        if slice.len == 0 {
            return &[];
        }
        let start = slice.offset as usize;
        &self.blocks[slice.block as usize][start..start + slice.len as usize]
    }

    pub fn get_mut(&mut self, slice: ArenaSlice) -> &mut [u8] {
        let start = slice.offset as usize;
        &mut self.blocks[slice.block as usize][start..start + slice.len as usize]
    }

    /// Total bytes reserved by the arena, including unused tails of blocks.
    pub fn memory_usage(&self) -> usize {
        self.memory_usage
    }
}

impl Default for Arena {
    fn default() -> Self {
        Arena::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    #[test]
    fn empty_arena_uses_no_memory() {
        assert_eq!(Arena::new().memory_usage(), 0);
    }

    #[test]
    fn allocations_keep_their_contents() {
        let mut arena = Arena::new();
        let mut rng = StdRng::seed_from_u64(301);
        let mut allocated = Vec::new();
        let mut bytes = 0;
        for i in 0..10_000usize {
            let size = if i % 4000 == 0 {
                6000
            } else if rng.gen_ratio(1, 10) {
                rng.gen_range(1..100)
            } else {
                rng.gen_range(1..20)
            };
            let fill: Vec<u8> = (0..size).map(|j| ((i + j) % 256) as u8).collect();
            let slice = arena.alloc_copy(&fill);
            allocated.push((slice, fill));
            bytes += size;
            assert!(arena.memory_usage() >= bytes);
        }
        for (slice, fill) in &allocated {
            assert_eq!(arena.get(*slice), fill.as_slice());
        }
    }

    #[test]
    fn large_allocation_gets_own_block() {
        let mut arena = Arena::new();
        let small = arena.alloc_copy(b"abc");
        let usage = arena.memory_usage();
        let big = arena.allocate(BLOCK_SIZE);
        assert_eq!(big.len(), BLOCK_SIZE);
        assert!(arena.memory_usage() >= usage + BLOCK_SIZE);
        // The small block is still the current one.
        let small2 = arena.alloc_copy(b"def");
        assert_eq!(small.block, small2.block);
    }
}
