//! CRC32C helpers.
//!
//! Stored checksums are masked: computing the CRC of a string that itself
//! contains embedded CRCs is problematic, and a run of zero bytes would
//! otherwise checksum to a plausible value.

const MASK_DELTA: u32 = 0xa282_ead8;

pub fn value(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

/// CRC of `init_crc`'s input concatenated with `data`.
pub fn extend(init_crc: u32, data: &[u8]) -> u32 {
    crc32c::crc32c_append(init_crc, data)
}

pub fn mask(crc: u32) -> u32 {
    crc.rotate_right(15).wrapping_add(MASK_DELTA)
}

pub fn unmask(masked: u32) -> u32 {
    masked.wrapping_sub(MASK_DELTA).rotate_left(15)
}
