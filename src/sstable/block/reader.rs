use std::cmp::Ordering;
use std::sync::Arc;

use bytes::Bytes;

use crate::coding::{decode_fixed32, get_varint32};
use crate::comparator::Comparator;
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;

/// A parsed, immutable block. Cloning is cheap: the contents are shared.
#[derive(Clone)]
pub struct Block {
    data: Bytes,
    /// Offset of the restart array.
    restart_offset: usize,
    num_restarts: usize,
}

impl Block {
    /// Validate the restart trailer of `data`.
    pub fn new(data: Bytes) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::corruption("block too short"));
        }
        let num_restarts = decode_fixed32(&data[data.len() - 4..]) as usize;
        let max_restarts_allowed = (data.len() - 4) / 4;
        if num_restarts > max_restarts_allowed {
            return Err(Error::corruption(format!(
                "bad block: {num_restarts} restarts in {} bytes",
                data.len()
            )));
        }
        let restart_offset = data.len() - (1 + num_restarts) * 4;
        Ok(Block {
            data,
            restart_offset,
            num_restarts,
        })
    }

    /// Size of the block contents, used as its cache charge.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn iter(&self, comparator: Arc<dyn Comparator>) -> BlockIterator {
        BlockIterator {
            block: self.clone(),
            comparator,
            current: self.restart_offset,
            restart_index: self.num_restarts,
            key: Vec::new(),
            value_offset: 0,
            value_len: 0,
        }
    }

    fn restart_point(&self, index: usize) -> usize {
        debug_assert!(index < self.num_restarts);
        decode_fixed32(&self.data[self.restart_offset + index * 4..]) as usize
    }
}

/// Header of one entry: `(shared, non_shared, value_len, header_len)`.
/// `None` if the header or the bytes it promises run past `data`.
fn decode_entry(data: &[u8]) -> Option<(usize, usize, usize, usize)> {
    let (shared, a) = get_varint32(data)?;
    let (non_shared, b) = get_varint32(&data[a..])?;
    let (value_len, c) = get_varint32(&data[a + b..])?;
    let header_len = a + b + c;
    if header_len + non_shared as usize + value_len as usize > data.len() {
        return None;
    }
    Some((
        shared as usize,
        non_shared as usize,
        value_len as usize,
        header_len,
    ))
}

/// Iterator over the entries of a `Block`.
///
/// Positions past either end are represented by `current == restart_offset`.
pub struct BlockIterator {
    block: Block,
    comparator: Arc<dyn Comparator>,
    /// Offset of the current entry; `restart_offset` when invalid.
    current: usize,
    /// Restart block the current entry falls in.
    restart_index: usize,
    key: Vec<u8>,
    value_offset: usize,
    value_len: usize,
}

impl BlockIterator {
    fn next_entry_offset(&self) -> usize {
        self.value_offset + self.value_len
    }

    fn invalidate(&mut self) {
        self.current = self.block.restart_offset;
        self.restart_index = self.block.num_restarts;
        self.key.clear();
        self.value_offset = 0;
        self.value_len = 0;
    }

    fn corruption(&mut self) -> Error {
        self.invalidate();
        Error::corruption("bad entry in block")
    }

    fn seek_to_restart_point(&mut self, index: usize) {
        self.key.clear();
        self.restart_index = index;
        // `parse_next_key` starts at the end of the current value.
        self.value_offset = self.block.restart_point(index);
        self.value_len = 0;
    }

    /// Step to the entry at `next_entry_offset`. `Ok(false)` at the end.
    fn parse_next_key(&mut self) -> Result<bool> {
        self.current = self.next_entry_offset();
        let limit = self.block.restart_offset;
        if self.current >= limit {
            self.invalidate();
            return Ok(false);
        }

        let data = &self.block.data[self.current..limit];
        let Some((shared, non_shared, value_len, header_len)) = decode_entry(data) else {
            return Err(self.corruption());
        };
        if self.key.len() < shared {
            return Err(self.corruption());
        }
        self.key.truncate(shared);
        self.key
            .extend_from_slice(&data[header_len..header_len + non_shared]);
        self.value_offset = self.current + header_len + non_shared;
        self.value_len = value_len;

        while self.restart_index + 1 < self.block.num_restarts
            && self.block.restart_point(self.restart_index + 1) < self.current
        {
            self.restart_index += 1;
        }
        Ok(true)
    }

    /// Full key stored at restart point `index`.
    fn restart_key(&self, index: usize) -> Result<&[u8]> {
        let offset = self.block.restart_point(index);
        if offset >= self.block.restart_offset {
            return Err(Error::corruption("restart point past end of block entries"));
        }
        let data = &self.block.data[offset..self.block.restart_offset];
        match decode_entry(data) {
            Some((0, non_shared, _, header_len)) => Ok(&data[header_len..header_len + non_shared]),
            _ => Err(Error::corruption("bad restart point in block")),
        }
    }
}

impl StorageIterator for BlockIterator {
    fn is_valid(&self) -> bool {
        self.current < self.block.restart_offset
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.is_valid());
        &self.key
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.is_valid());
        &self.block.data[self.value_offset..self.value_offset + self.value_len]
    }

    fn seek_to_first(&mut self) -> Result<()> {
        if self.block.num_restarts == 0 {
            self.invalidate();
            return Ok(());
        }
        self.seek_to_restart_point(0);
        self.parse_next_key()?;
        Ok(())
    }

    fn seek_to_last(&mut self) -> Result<()> {
        if self.block.num_restarts == 0 {
            self.invalidate();
            return Ok(());
        }
        self.seek_to_restart_point(self.block.num_restarts - 1);
        while self.parse_next_key()? && self.next_entry_offset() < self.block.restart_offset {}
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        if self.block.num_restarts == 0 {
            self.invalidate();
            return Ok(());
        }

        // Binary search for the last restart point with a key < target.
        let mut left = 0;
        let mut right = self.block.num_restarts - 1;
        while left < right {
            let mid = (left + right).div_ceil(2);
            let ordering = match self.restart_key(mid) {
                Ok(mid_key) => self.comparator.compare(mid_key, target),
                Err(e) => {
                    self.invalidate();
                    return Err(e);
                }
            };
            if ordering == Ordering::Less {
                left = mid;
            } else {
                right = mid - 1;
            }
        }

        // Linear search within the restart block for the first key >= target.
        self.seek_to_restart_point(left);
        while self.parse_next_key()? {
            if self.comparator.compare(&self.key, target) != Ordering::Less {
                break;
            }
        }
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        debug_assert!(self.is_valid());
        self.parse_next_key()?;
        Ok(())
    }

    fn prev(&mut self) -> Result<()> {
        debug_assert!(self.is_valid());

        // Back up to a restart point before the current entry, then scan
        // forward to the entry just before it.
        let original = self.current;
        while self.block.restart_point(self.restart_index) >= original {
            if self.restart_index == 0 {
                self.invalidate();
                return Ok(());
            }
            self.restart_index -= 1;
        }

        self.seek_to_restart_point(self.restart_index);
        while self.parse_next_key()? && self.next_entry_offset() < original {}
        Ok(())
    }
}
