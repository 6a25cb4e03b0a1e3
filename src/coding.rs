//! Fixed-width little-endian and varint encodings shared by every on-disk
//! format (log records, write batches, table blocks, manifest edits).

pub fn put_fixed32(dst: &mut Vec<u8>, value: u32) {
    dst.extend_from_slice(&value.to_le_bytes());
}

pub fn put_fixed64(dst: &mut Vec<u8>, value: u64) {
    dst.extend_from_slice(&value.to_le_bytes());
}

/// Caller guarantees `src.len() >= 4`.
pub fn decode_fixed32(src: &[u8]) -> u32 {
    u32::from_le_bytes([src[0], src[1], src[2], src[3]])
}

/// Caller guarantees `src.len() >= 8`.
pub fn decode_fixed64(src: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&src[..8]);
    u64::from_le_bytes(buf)
}

pub fn put_varint32(dst: &mut Vec<u8>, value: u32) {
    put_varint64(dst, value as u64);
}

pub fn put_varint64(dst: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        dst.push((value as u8) | 0x80);
        value >>= 7;
    }
    dst.push(value as u8);
}

pub fn varint_length(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Decode a varint32, returning `(value, bytes_consumed)`.
pub fn get_varint32(src: &[u8]) -> Option<(u32, usize)> {
    let mut result = 0u32;
    for (i, &byte) in src.iter().enumerate().take(5) {
        result |= ((byte & 0x7f) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
    }
    None
}

/// Decode a varint64, returning `(value, bytes_consumed)`.
pub fn get_varint64(src: &[u8]) -> Option<(u64, usize)> {
    let mut result = 0u64;
    for (i, &byte) in src.iter().enumerate().take(10) {
        result |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
    }
    None
}

pub fn put_length_prefixed_slice(dst: &mut Vec<u8>, value: &[u8]) {
    put_varint32(dst, value.len() as u32);
    dst.extend_from_slice(value);
}

/// Decode a varint32-length-prefixed slice, returning `(slice, bytes_consumed)`.
pub fn get_length_prefixed_slice(src: &[u8]) -> Option<(&[u8], usize)> {
    let (len, n) = get_varint32(src)?;
    let end = n.checked_add(len as usize)?;
    if end > src.len() {
        return None;
    }
    Some((&src[n..end], end))
}

/// Cursor-style reader used by decoders that consume a buffer front to back.
pub struct Decoder<'a> {
    data: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Decoder { data }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> &'a [u8] {
        self.data
    }

    pub fn varint32(&mut self) -> Option<u32> {
        let (v, n) = get_varint32(self.data)?;
        self.data = &self.data[n..];
        Some(v)
    }

    pub fn varint64(&mut self) -> Option<u64> {
        let (v, n) = get_varint64(self.data)?;
        self.data = &self.data[n..];
        Some(v)
    }

    pub fn fixed32(&mut self) -> Option<u32> {
        if self.data.len() < 4 {
            return None;
        }
        let v = decode_fixed32(self.data);
        self.data = &self.data[4..];
        Some(v)
    }

    pub fn fixed64(&mut self) -> Option<u64> {
        if self.data.len() < 8 {
            return None;
        }
        let v = decode_fixed64(self.data);
        self.data = &self.data[8..];
        Some(v)
    }

    pub fn length_prefixed(&mut self) -> Option<&'a [u8]> {
        let (v, n) = get_length_prefixed_slice(self.data)?;
        self.data = &self.data[n..];
        Some(v)
    }

    pub fn byte(&mut self) -> Option<u8> {
        let (&b, rest) = self.data.split_first()?;
        self.data = rest;
        Some(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_boundaries() {
        let values = [0u64, 1, 127, 128, 16383, 16384, u32::MAX as u64, u64::MAX];
        let mut buf = Vec::new();
        for &v in &values {
            put_varint64(&mut buf, v);
        }
        let mut dec = Decoder::new(&buf);
        for &v in &values {
            assert_eq!(dec.varint64(), Some(v));
        }
        assert!(dec.is_empty());
    }

    #[test]
    fn varint_length_matches_encoding() {
        for v in [0u64, 127, 128, 1 << 21, 1 << 35, u64::MAX] {
            let mut buf = Vec::new();
            put_varint64(&mut buf, v);
            assert_eq!(buf.len(), varint_length(v));
        }
    }

    #[test]
    fn truncated_varint_is_rejected() {
        let mut buf = Vec::new();
        put_varint32(&mut buf, 1 << 30);
        buf.pop();
        assert!(get_varint32(&buf).is_none());
    }

    #[test]
    fn length_prefixed_overrun_is_rejected() {
        let mut buf = Vec::new();
        put_length_prefixed_slice(&mut buf, b"hello");
        buf.truncate(3);
        assert!(get_length_prefixed_slice(&buf).is_none());
    }
}
