use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::coding::{Decoder, put_length_prefixed_slice, put_varint32, put_varint64};
use crate::config::{NUM_LEVELS, allowed_seeks_for_file};
use crate::error::{Error, Result};
use crate::types::{InternalKey, SequenceNumber};

/// One table file as recorded in a version.
pub struct FileMetaData {
    pub number: u64,
    /// File size in bytes.
    pub file_size: u64,
    /// Smallest internal key served by the table.
    pub smallest: InternalKey,
    /// Largest internal key served by the table.
    pub largest: InternalKey,
    /// Seeks allowed until compaction. Shared by every version holding the
    /// file.
    pub allowed_seeks: AtomicI64,
}

impl FileMetaData {
    pub fn new(number: u64, file_size: u64, smallest: InternalKey, largest: InternalKey) -> Self {
        FileMetaData {
            number,
            file_size,
            smallest,
            largest,
            allowed_seeks: AtomicI64::new(allowed_seeks_for_file(file_size)),
        }
    }
}

impl Clone for FileMetaData {
    fn clone(&self) -> Self {
        FileMetaData {
            number: self.number,
            file_size: self.file_size,
            smallest: self.smallest.clone(),
            largest: self.largest.clone(),
            allowed_seeks: AtomicI64::new(self.allowed_seeks.load(Ordering::Relaxed)),
        }
    }
}

/// Seek budgets are runtime state, not part of a file's identity.
impl PartialEq for FileMetaData {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number
            && self.file_size == other.file_size
            && self.smallest == other.smallest
            && self.largest == other.largest
    }
}

impl fmt::Debug for FileMetaData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}[{:?} .. {:?}]",
            self.number, self.file_size, self.smallest, self.largest
        )
    }
}

// Manifest record tags. Tag 8 was used for large value references and is
// retired.
const TAG_COMPARATOR: u32 = 1;
const TAG_LOG_NUMBER: u32 = 2;
const TAG_NEXT_FILE_NUMBER: u32 = 3;
const TAG_LAST_SEQUENCE: u32 = 4;
const TAG_COMPACT_POINTER: u32 = 5;
const TAG_DELETED_FILE: u32 = 6;
const TAG_NEW_FILE: u32 = 7;
const TAG_PREV_LOG_NUMBER: u32 = 9;

/// A delta between two versions: files added and removed plus updated
/// counters. Each edit is one record in the MANIFEST.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionEdit {
    pub comparator_name: Option<String>,
    pub log_number: Option<u64>,
    pub prev_log_number: Option<u64>,
    pub next_file_number: Option<u64>,
    pub last_sequence: Option<SequenceNumber>,
    pub compact_pointers: Vec<(usize, InternalKey)>,
    pub deleted_files: BTreeSet<(usize, u64)>,
    pub new_files: Vec<(usize, FileMetaData)>,
}

impl VersionEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn set_comparator_name(&mut self, name: &str) {
        self.comparator_name = Some(name.to_string());
    }

    pub fn set_log_number(&mut self, number: u64) {
        self.log_number = Some(number);
    }

    pub fn set_prev_log_number(&mut self, number: u64) {
        self.prev_log_number = Some(number);
    }

    pub fn set_next_file(&mut self, number: u64) {
        self.next_file_number = Some(number);
    }

    pub fn set_last_sequence(&mut self, sequence: SequenceNumber) {
        self.last_sequence = Some(sequence);
    }

    pub fn set_compact_pointer(&mut self, level: usize, key: InternalKey) {
        self.compact_pointers.push((level, key));
    }

    /// Add the specified file at the specified level.
    pub fn add_file(&mut self, level: usize, number: u64, file_size: u64, smallest: InternalKey, largest: InternalKey) {
        self.new_files
            .push((level, FileMetaData::new(number, file_size, smallest, largest)));
    }

    /// Delete the specified file from the specified level.
    pub fn delete_file(&mut self, level: usize, number: u64) {
        self.deleted_files.insert((level, number));
    }

    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        if let Some(name) = &self.comparator_name {
            put_varint32(dst, TAG_COMPARATOR);
            put_length_prefixed_slice(dst, name.as_bytes());
        }
        if let Some(n) = self.log_number {
            put_varint32(dst, TAG_LOG_NUMBER);
            put_varint64(dst, n);
        }
        if let Some(n) = self.prev_log_number {
            put_varint32(dst, TAG_PREV_LOG_NUMBER);
            put_varint64(dst, n);
        }
        if let Some(n) = self.next_file_number {
            put_varint32(dst, TAG_NEXT_FILE_NUMBER);
            put_varint64(dst, n);
        }
        if let Some(n) = self.last_sequence {
            put_varint32(dst, TAG_LAST_SEQUENCE);
            put_varint64(dst, n);
        }
        for (level, key) in &self.compact_pointers {
            put_varint32(dst, TAG_COMPACT_POINTER);
            put_varint32(dst, *level as u32);
            put_length_prefixed_slice(dst, key.encode());
        }
        for (level, number) in &self.deleted_files {
            put_varint32(dst, TAG_DELETED_FILE);
            put_varint32(dst, *level as u32);
            put_varint64(dst, *number);
        }
        for (level, f) in &self.new_files {
            put_varint32(dst, TAG_NEW_FILE);
            put_varint32(dst, *level as u32);
            put_varint64(dst, f.number);
            put_varint64(dst, f.file_size);
            put_length_prefixed_slice(dst, f.smallest.encode());
            put_length_prefixed_slice(dst, f.largest.encode());
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_to(&mut buf);
        buf
    }

    pub fn decode(src: &[u8]) -> Result<Self> {
        let mut edit = VersionEdit::new();
        let mut input = Decoder::new(src);

        fn level(input: &mut Decoder<'_>) -> Option<usize> {
            input
                .varint32()
                .map(|l| l as usize)
                .filter(|&l| l < NUM_LEVELS)
        }

        fn internal_key(input: &mut Decoder<'_>) -> Option<InternalKey> {
            input
                .length_prefixed()
                .filter(|k| k.len() >= 8)
                .map(InternalKey::decode_from)
        }

        while !input.is_empty() {
            let Some(tag) = input.varint32() else {
                return Err(bad_edit("tag"));
            };
            match tag {
                TAG_COMPARATOR => {
                    let name = input
                        .length_prefixed()
                        .and_then(|n| std::str::from_utf8(n).ok())
                        .ok_or_else(|| bad_edit("comparator name"))?;
                    edit.comparator_name = Some(name.to_string());
                }
                TAG_LOG_NUMBER => {
                    edit.log_number = Some(input.varint64().ok_or_else(|| bad_edit("log number"))?);
                }
                TAG_PREV_LOG_NUMBER => {
                    edit.prev_log_number =
                        Some(input.varint64().ok_or_else(|| bad_edit("previous log number"))?);
                }
                TAG_NEXT_FILE_NUMBER => {
                    edit.next_file_number =
                        Some(input.varint64().ok_or_else(|| bad_edit("next file number"))?);
                }
                TAG_LAST_SEQUENCE => {
                    edit.last_sequence =
                        Some(input.varint64().ok_or_else(|| bad_edit("last sequence number"))?);
                }
                TAG_COMPACT_POINTER => {
                    let (Some(l), Some(key)) = (level(&mut input), internal_key(&mut input)) else {
                        return Err(bad_edit("compaction pointer"));
                    };
                    edit.compact_pointers.push((l, key));
                }
                TAG_DELETED_FILE => {
                    let (Some(l), Some(number)) = (level(&mut input), input.varint64()) else {
                        return Err(bad_edit("deleted file"));
                    };
                    edit.deleted_files.insert((l, number));
                }
                TAG_NEW_FILE => {
                    let Some(l) = level(&mut input) else {
                        return Err(bad_edit("new-file entry"));
                    };
                    let (Some(number), Some(size)) = (input.varint64(), input.varint64()) else {
                        return Err(bad_edit("new-file entry"));
                    };
                    let (Some(smallest), Some(largest)) = (internal_key(&mut input), internal_key(&mut input))
                    else {
                        return Err(bad_edit("new-file entry"));
                    };
                    edit.new_files
                        .push((l, FileMetaData::new(number, size, smallest, largest)));
                }
                _ => return Err(bad_edit("unknown tag")),
            }
        }
        Ok(edit)
    }
}

fn bad_edit(field: &str) -> Error {
    Error::corruption(format!("VersionEdit: {field}"))
}

impl fmt::Display for VersionEdit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "VersionEdit {{")?;
        if let Some(name) = &self.comparator_name {
            writeln!(f, "  Comparator: {name}")?;
        }
        if let Some(n) = self.log_number {
            writeln!(f, "  LogNumber: {n}")?;
        }
        if let Some(n) = self.prev_log_number {
            writeln!(f, "  PrevLogNumber: {n}")?;
        }
        if let Some(n) = self.next_file_number {
            writeln!(f, "  NextFile: {n}")?;
        }
        if let Some(n) = self.last_sequence {
            writeln!(f, "  LastSeq: {n}")?;
        }
        for (level, key) in &self.compact_pointers {
            writeln!(f, "  CompactPointer: {level} {key:?}")?;
        }
        for (level, number) in &self.deleted_files {
            writeln!(f, "  DeleteFile: {level} {number}")?;
        }
        for (level, file) in &self.new_files {
            writeln!(f, "  AddFile: {level} {file:?}")?;
        }
        write!(f, "}}")
    }
}
