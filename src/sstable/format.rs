//! On-disk pieces shared by the table builder and reader.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ data block 0   + trailer     │
//! │ ...                          │
//! │ data block N   + trailer     │
//! │ filter block   + trailer     │  (optional meta block)
//! │ metaindex block + trailer    │  meta block name → BlockHandle
//! │ index block    + trailer     │  separator key → BlockHandle
//! │ footer (48 bytes)            │
//! └──────────────────────────────┘
//! ```
//!
//! Every block is followed by a 5-byte trailer: the compression type (1B)
//! and a masked CRC32C (4B LE) over the block contents and the type byte.

use bytes::Bytes;

use crate::coding::{Decoder, decode_fixed32, put_fixed64, put_varint64};
use crate::crc;
use crate::env::RandomAccessFile;
use crate::error::{Error, Result};

/// Compression type byte plus the 32-bit CRC.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Picked by running `echo http://code.google.com/p/leveldb/ | sha1sum` and
/// taking the leading 64 bits.
pub const TABLE_MAGIC_NUMBER: u64 = 0xdb4775248b80fb57;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionType {
    None = 0,
}

/// Location of a block within a table file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    /// Two varint64s at their widest.
    pub const MAX_ENCODED_LENGTH: usize = 10 + 10;

    pub fn new(offset: u64, size: u64) -> Self {
        BlockHandle { offset, size }
    }

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        put_varint64(dst, self.offset);
        put_varint64(dst, self.size);
    }

    pub fn encoded(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::MAX_ENCODED_LENGTH);
        self.encode_to(&mut buf);
        buf
    }

    pub fn decode_from(decoder: &mut Decoder<'_>) -> Result<Self> {
        match (decoder.varint64(), decoder.varint64()) {
            (Some(offset), Some(size)) => Ok(BlockHandle { offset, size }),
            _ => Err(Error::corruption("bad block handle")),
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Self::decode_from(&mut Decoder::new(data))
    }
}

/// Fixed-size tail of every table: handles to the metaindex and index
/// blocks, zero padding, and the magic number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Footer {
    pub metaindex_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    pub const ENCODED_LENGTH: usize = 2 * BlockHandle::MAX_ENCODED_LENGTH + 8;

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        let start = dst.len();
        self.metaindex_handle.encode_to(dst);
        self.index_handle.encode_to(dst);
        dst.resize(start + 2 * BlockHandle::MAX_ENCODED_LENGTH, 0);
        put_fixed64(dst, TABLE_MAGIC_NUMBER);
        debug_assert_eq!(dst.len(), start + Self::ENCODED_LENGTH);
    }

    pub fn decode(input: &[u8]) -> Result<Self> {
        if input.len() < Self::ENCODED_LENGTH {
            return Err(Error::corruption("footer too short"));
        }
        let magic_offset = Self::ENCODED_LENGTH - 8;
        let magic_lo = decode_fixed32(&input[magic_offset..]) as u64;
        let magic_hi = decode_fixed32(&input[magic_offset + 4..]) as u64;
        let magic = (magic_hi << 32) | magic_lo;
        if magic != TABLE_MAGIC_NUMBER {
            return Err(Error::corruption("not an sstable (bad magic number)"));
        }

        let mut decoder = Decoder::new(&input[..magic_offset]);
        let metaindex_handle = BlockHandle::decode_from(&mut decoder)?;
        let index_handle = BlockHandle::decode_from(&mut decoder)?;
        Ok(Footer {
            metaindex_handle,
            index_handle,
        })
    }
}

/// Fill `buf` from `offset`, stopping early only at end of file.
pub(crate) fn read_fully(file: &dyn RandomAccessFile, offset: u64, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read_at(offset + filled as u64, &mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Read the block at `handle`, check its trailer, and return the contents.
///
/// `file_size` bounds the handle: the footer carries no checksum, so a
/// handle reaching past the end of the file is corruption, not a read.
pub fn read_block(file: &dyn RandomAccessFile, handle: &BlockHandle, file_size: u64) -> Result<Bytes> {
    let end = handle
        .offset
        .checked_add(handle.size)
        .and_then(|e| e.checked_add(BLOCK_TRAILER_SIZE as u64));
    if end.is_none_or(|e| e > file_size) {
        return Err(Error::corruption(format!(
            "block handle {}+{} past end of file ({file_size} bytes)",
            handle.offset, handle.size
        )));
    }
    let n = handle.size as usize;
    let mut buf = vec![0u8; n + BLOCK_TRAILER_SIZE];
    let got = read_fully(file, handle.offset, &mut buf)?;
    if got != buf.len() {
        return Err(Error::corruption("truncated block read"));
    }

    let expected = crc::unmask(decode_fixed32(&buf[n + 1..]));
    let actual = crc::value(&buf[..n + 1]);
    if actual != expected {
        return Err(Error::corruption(format!(
            "block checksum mismatch at offset {}",
            handle.offset
        )));
    }

    match buf[n] {
        t if t == CompressionType::None as u8 => {
            buf.truncate(n);
            Ok(Bytes::from(buf))
        }
        t => Err(Error::corruption(format!("unsupported block compression type {t}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footer_is_fixed_length() {
        let footer = Footer {
            metaindex_handle: BlockHandle::new(4096, 32),
            index_handle: BlockHandle::new(4133, 512),
        };
        let mut buf = Vec::new();
        footer.encode_to(&mut buf);
        assert_eq!(buf.len(), Footer::ENCODED_LENGTH);
        assert_eq!(Footer::decode(&buf).unwrap(), footer);
    }

    #[test]
    fn footer_bad_magic() {
        let mut buf = Vec::new();
        Footer::default().encode_to(&mut buf);
        let last = buf.len() - 1;
        buf[last] ^= 0xff;
        assert!(Footer::decode(&buf).unwrap_err().is_corruption());
    }

    #[test]
    fn footer_too_short() {
        assert!(Footer::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn handle_past_end_of_file_is_corruption() {
        struct NoFile;
        impl RandomAccessFile for NoFile {
            fn read_at(&self, _offset: u64, _buf: &mut [u8]) -> Result<usize> {
                panic!("out-of-range handle must not be read");
            }
        }
        for handle in [
            BlockHandle::new(0, u64::MAX - 2),
            BlockHandle::new(u64::MAX, 1),
            BlockHandle::new(100, 1 << 40),
            BlockHandle::new(60, 36),
        ] {
            let err = read_block(&NoFile, &handle, 100).unwrap_err();
            assert!(err.is_corruption(), "{handle:?}");
        }
    }

    #[test]
    fn truncated_handle_is_corruption() {
        let handle = BlockHandle::new(1 << 40, 300).encoded();
        assert!(BlockHandle::decode(&handle[..handle.len() - 1]).is_err());
    }
}
