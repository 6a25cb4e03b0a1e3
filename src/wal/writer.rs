use crate::crc;
use crate::env::WritableFile;
use crate::error::Result;
use crate::wal::{BLOCK_SIZE, HEADER_SIZE, MAX_RECORD_TYPE, RecordType};

/// Appends logical records to a log file.
///
/// Every write must be durable before it's acknowledged to the client when
/// the caller asks for `sync`. On restart the log is replayed to rebuild the
/// memtable it was backing.
pub struct LogWriter {
    dest: Box<dyn WritableFile>,
    /// Current offset within the current block.
    block_offset: usize,
    /// CRC32C of each record type byte, precomputed so only the payload is
    /// hashed per record.
    type_crc: [u32; MAX_RECORD_TYPE as usize + 1],
}

impl LogWriter {
    /// Create a writer that appends to an empty `dest`.
    pub fn new(dest: Box<dyn WritableFile>) -> Self {
        Self::with_offset(dest, 0)
    }

    /// Create a writer that appends to `dest`, which already holds
    /// `dest_length` bytes.
    pub fn with_offset(dest: Box<dyn WritableFile>, dest_length: u64) -> Self {
        let mut type_crc = [0u32; MAX_RECORD_TYPE as usize + 1];
        for (t, slot) in type_crc.iter_mut().enumerate() {
            *slot = crc::value(&[t as u8]);
        }
        LogWriter {
            dest,
            block_offset: (dest_length % BLOCK_SIZE as u64) as usize,
            type_crc,
        }
    }

    /// Append one logical record, fragmenting it across blocks as needed.
    /// Emits at least one physical record, even for an empty payload.
    pub fn add_record(&mut self, data: &[u8]) -> Result<()> {
        let mut left = data;
        let mut begin = true;
        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                // Switch to a new block, zero-filling the trailer.
                if leftover > 0 {
                    const ZEROES: [u8; HEADER_SIZE - 1] = [0; HEADER_SIZE - 1];
                    self.dest.append(&ZEROES[..leftover])?;
                }
                self.block_offset = 0;
            }

            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_len = left.len().min(avail);
            let end = fragment_len == left.len();
            let record_type = match (begin, end) {
                (true, true) => RecordType::Full,
                (true, false) => RecordType::First,
                (false, true) => RecordType::Last,
                (false, false) => RecordType::Middle,
            };

            self.emit_physical_record(record_type, &left[..fragment_len])?;
            left = &left[fragment_len..];
            begin = false;
            if end {
                return Ok(());
            }
        }
    }

    fn emit_physical_record(&mut self, record_type: RecordType, payload: &[u8]) -> Result<()> {
        debug_assert!(payload.len() <= 0xffff);
        debug_assert!(self.block_offset + HEADER_SIZE + payload.len() <= BLOCK_SIZE);

        let crc = crc::extend(self.type_crc[record_type as usize], payload);
        let mut header = [0u8; HEADER_SIZE];
        header[..4].copy_from_slice(&crc::mask(crc).to_le_bytes());
        header[4] = (payload.len() & 0xff) as u8;
        header[5] = (payload.len() >> 8) as u8;
        header[6] = record_type as u8;

        self.dest.append(&header)?;
        self.dest.append(payload)?;
        self.dest.flush()?;
        self.block_offset += HEADER_SIZE + payload.len();
        Ok(())
    }

    /// Force the log to durable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.dest.sync()
    }

    pub fn close(&mut self) -> Result<()> {
        self.dest.close()
    }
}
