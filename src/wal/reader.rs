use crate::coding::decode_fixed32;
use crate::crc;
use crate::env::SequentialFile;
use crate::wal::{BLOCK_SIZE, HEADER_SIZE, RecordType};

/// Receives notice of bytes dropped during replay.
pub trait Reporter: Send {
    /// `bytes` is an approximate count of bytes dropped; `reason` says why.
    fn corruption(&mut self, bytes: usize, reason: &str);
}

enum Physical {
    Record { record_type: u8, start: usize, len: usize },
    Eof,
    /// Corrupted or skipped physical record. Already reported if it mattered.
    Bad,
}

/// Reads logical records back out of a log file for crash recovery.
///
/// On corruption the bad bytes are reported and skipped: a checksum
/// mismatch drops the rest of its block and reading continues at the next
/// one, so later consistent records are still recovered. A record cut short
/// at end of file is the tail of a write that crashed midway and is dropped
/// silently.
pub struct LogReader {
    file: Box<dyn SequentialFile>,
    reporter: Option<Box<dyn Reporter>>,
    checksum: bool,
    /// Current block contents.
    buffer: Vec<u8>,
    /// Read position inside `buffer`.
    pos: usize,
    /// Last read returned less than a full block.
    eof: bool,
    /// Offset of the first byte past `buffer` in the file.
    end_of_buffer_offset: u64,
    /// Offset of the last record returned by `read_record`.
    last_record_offset: u64,
}

impl LogReader {
    pub fn new(
        file: Box<dyn SequentialFile>,
        reporter: Option<Box<dyn Reporter>>,
        checksum: bool,
    ) -> Self {
        LogReader {
            file,
            reporter,
            checksum,
            buffer: Vec::with_capacity(BLOCK_SIZE),
            pos: 0,
            eof: false,
            end_of_buffer_offset: 0,
            last_record_offset: 0,
        }
    }

    /// Next complete logical record, or `None` at end of input.
    pub fn read_record(&mut self) -> Option<Vec<u8>> {
        let mut scratch = Vec::new();
        let mut in_fragmented_record = false;
        // Offset of the first fragment of the record being assembled.
        let mut prospective_record_offset = 0;

        loop {
            match self.read_physical_record() {
                Physical::Record {
                    record_type,
                    start,
                    len,
                } => {
                    // Taken after the read, which may have refilled the buffer.
                    let physical_record_offset = self.record_offset(start);
                    let fragment = &self.buffer[start..start + len];
                    match RecordType::from_u8(record_type) {
                        Some(RecordType::Full) => {
                            if in_fragmented_record && !scratch.is_empty() {
                                let dropped = scratch.len();
                                self.report(dropped, "partial record without end(1)");
                            }
                            self.last_record_offset = physical_record_offset;
                            return Some(self.buffer[start..start + len].to_vec());
                        }
                        Some(RecordType::First) => {
                            if in_fragmented_record && !scratch.is_empty() {
                                let dropped = scratch.len();
                                self.report(dropped, "partial record without end(2)");
                            }
                            prospective_record_offset = physical_record_offset;
                            scratch.clear();
                            scratch.extend_from_slice(&self.buffer[start..start + len]);
                            in_fragmented_record = true;
                        }
                        Some(RecordType::Middle) => {
                            if in_fragmented_record {
                                scratch.extend_from_slice(fragment);
                            } else {
                                self.report(len, "missing start of fragmented record(1)");
                            }
                        }
                        Some(RecordType::Last) => {
                            if in_fragmented_record {
                                scratch.extend_from_slice(fragment);
                                self.last_record_offset = prospective_record_offset;
                                return Some(scratch);
                            }
                            self.report(len, "missing start of fragmented record(2)");
                        }
                        Some(RecordType::Zero) | None => {
                            let dropped = len + if in_fragmented_record { scratch.len() } else { 0 };
                            self.report(dropped, &format!("unknown record type {record_type}"));
                            in_fragmented_record = false;
                            scratch.clear();
                        }
                    }
                }
                Physical::Eof => {
                    // A fragment without its end means the writer died
                    // mid-record: not corruption, just drop it.
                    return None;
                }
                Physical::Bad => {
                    if in_fragmented_record {
                        let dropped = scratch.len();
                        self.report(dropped, "error in middle of record");
                        in_fragmented_record = false;
                        scratch.clear();
                    }
                }
            }
        }
    }

    /// File offset of the last record returned.
    pub fn last_record_offset(&self) -> u64 {
        self.last_record_offset
    }

    /// File offset of the header of the physical record whose payload
    /// starts at `start` in the current buffer.
    fn record_offset(&self, start: usize) -> u64 {
        self.end_of_buffer_offset - (self.buffer.len() - start + HEADER_SIZE) as u64
    }

    fn report(&mut self, bytes: usize, reason: &str) {
        tracing::warn!(bytes, reason, "log corruption, dropping bytes");
        if let Some(reporter) = self.reporter.as_mut() {
            reporter.corruption(bytes, reason);
        }
    }

    fn clear_buffer(&mut self) {
        self.buffer.clear();
        self.pos = 0;
    }

    fn read_physical_record(&mut self) -> Physical {
        loop {
            let remaining = self.buffer.len() - self.pos;
            if remaining < HEADER_SIZE {
                if self.eof {
                    // A truncated header at end of file: the writer died
                    // while writing it.
                    self.clear_buffer();
                    return Physical::Eof;
                }
                // Last read was a full block, so the leftover is trailer
                // padding. Refill.
                self.clear_buffer();
                self.buffer.resize(BLOCK_SIZE, 0);
                let mut filled = 0;
                let mut read_error = None;
                while filled < BLOCK_SIZE {
                    match self.file.read(&mut self.buffer[filled..]) {
                        Ok(0) => break,
                        Ok(n) => filled += n,
                        Err(e) => {
                            read_error = Some(e);
                            break;
                        }
                    }
                }
                self.buffer.truncate(filled);
                self.end_of_buffer_offset += filled as u64;
                if let Some(e) = read_error {
                    self.clear_buffer();
                    self.report(BLOCK_SIZE, &e.to_string());
                    self.eof = true;
                    return Physical::Eof;
                }
                if filled < BLOCK_SIZE {
                    self.eof = true;
                }
                continue;
            }

            let header = &self.buffer[self.pos..self.pos + HEADER_SIZE];
            let length = header[4] as usize | (header[5] as usize) << 8;
            let record_type = header[6];
            if HEADER_SIZE + length > remaining {
                self.clear_buffer();
                if !self.eof {
                    self.report(remaining, "bad record length");
                    return Physical::Bad;
                }
                // The writer died in the middle of the payload.
                return Physical::Eof;
            }

            if record_type == RecordType::Zero as u8 && length == 0 {
                // Zero-filled region from preallocation; skip without
                // reporting.
                self.clear_buffer();
                return Physical::Bad;
            }

            if self.checksum {
                let expected = crc::unmask(decode_fixed32(header));
                let actual = crc::value(&self.buffer[self.pos + 6..self.pos + HEADER_SIZE + length]);
                if actual != expected {
                    // The length itself may be corrupt; trusting it could
                    // land us on a fragment of a real record that happens
                    // to look valid. Drop the rest of the block.
                    self.clear_buffer();
                    self.report(remaining, "checksum mismatch");
                    return Physical::Bad;
                }
            }

            let start = self.pos + HEADER_SIZE;
            self.pos += HEADER_SIZE + length;
            return Physical::Record {
                record_type,
                start,
                len: length,
            };
        }
    }
}

impl Iterator for LogReader {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record()
    }
}
