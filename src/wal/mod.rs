//! Write-ahead log framing, shared by the `.log` files and the MANIFEST.
//!
//! The file is a sequence of 32 KiB blocks. Each block holds physical
//! records:
//!
//! ```text
//! ┌──────────────┬────────────┬──────────┬──────────────────┐
//! │ masked CRC32C│ length (2B)│ type (1B)│ payload (length) │
//! │ (4B, LE)     │ (LE)       │          │                  │
//! └──────────────┴────────────┴──────────┴──────────────────┘
//! ```
//!
//! CRC covers the type byte and the payload. A logical record that does not
//! fit in the rest of a block is split into First/Middle/Last fragments; a
//! block tail shorter than a header is zero-filled and skipped by readers.

pub mod reader;
pub mod writer;

pub use reader::{LogReader, Reporter};
pub use writer::LogWriter;

pub const BLOCK_SIZE: usize = 32768;

/// Header is checksum (4 bytes), length (2 bytes), type (1 byte).
pub const HEADER_SIZE: usize = 4 + 2 + 1;

/// Physical record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Reserved for preallocated files.
    Zero = 0,
    Full = 1,
    First = 2,
    Middle = 3,
    Last = 4,
}

pub const MAX_RECORD_TYPE: u8 = RecordType::Last as u8;

impl RecordType {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(RecordType::Zero),
            1 => Some(RecordType::Full),
            2 => Some(RecordType::First),
            3 => Some(RecordType::Middle),
            4 => Some(RecordType::Last),
            _ => None,
        }
    }
}
