//! Names of the files that make up a database directory.
//!
//! ```text
//! dbname/CURRENT            name of the live MANIFEST
//! dbname/LOCK               held while the database is open
//! dbname/LOG, LOG.old       diagnostic log (recognised, not written)
//! dbname/MANIFEST-NNNNNN    version edits
//! dbname/NNNNNN.log         write-ahead log
//! dbname/NNNNNN.sst         sorted table
//! dbname/NNNNNN.dbtmp       temporary, renamed into place
//! ```

use std::path::{Path, PathBuf};

use crate::env::{Env, write_string_to_file};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Log,
    DbLock,
    Table,
    Descriptor,
    Current,
    Temp,
    InfoLog,
}

fn make_file_name(dbname: &Path, number: u64, suffix: &str) -> PathBuf {
    dbname.join(format!("{number:06}.{suffix}"))
}

pub fn log_file_name(dbname: &Path, number: u64) -> PathBuf {
    debug_assert!(number > 0);
    make_file_name(dbname, number, "log")
}

pub fn table_file_name(dbname: &Path, number: u64) -> PathBuf {
    debug_assert!(number > 0);
    make_file_name(dbname, number, "sst")
}

pub fn descriptor_file_name(dbname: &Path, number: u64) -> PathBuf {
    debug_assert!(number > 0);
    dbname.join(format!("MANIFEST-{number:06}"))
}

pub fn current_file_name(dbname: &Path) -> PathBuf {
    dbname.join("CURRENT")
}

pub fn lock_file_name(dbname: &Path) -> PathBuf {
    dbname.join("LOCK")
}

pub fn temp_file_name(dbname: &Path, number: u64) -> PathBuf {
    debug_assert!(number > 0);
    make_file_name(dbname, number, "dbtmp")
}

pub fn info_log_file_name(dbname: &Path) -> PathBuf {
    dbname.join("LOG")
}

pub fn old_info_log_file_name(dbname: &Path) -> PathBuf {
    dbname.join("LOG.old")
}

/// Classify a directory entry name. Returns the file number (0 for the
/// unnumbered files) and its type, or `None` if the name is not ours.
pub fn parse_file_name(name: &str) -> Option<(u64, FileType)> {
    match name {
        "CURRENT" => return Some((0, FileType::Current)),
        "LOCK" => return Some((0, FileType::DbLock)),
        "LOG" | "LOG.old" => return Some((0, FileType::InfoLog)),
        _ => {}
    }

    if let Some(rest) = name.strip_prefix("MANIFEST-") {
        return parse_decimal(rest).map(|n| (n, FileType::Descriptor));
    }

    let (number, suffix) = name.split_once('.')?;
    let number = parse_decimal(number)?;
    let file_type = match suffix {
        "log" => FileType::Log,
        "sst" => FileType::Table,
        "dbtmp" => FileType::Temp,
        _ => return None,
    };
    Some((number, file_type))
}

/// Digits only: no sign, no whitespace, no overflow.
fn parse_decimal(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Point CURRENT at `MANIFEST-<descriptor_number>`. Written to a temp file
/// first and renamed so readers never see a partial CURRENT.
pub fn set_current_file(env: &dyn Env, dbname: &Path, descriptor_number: u64) -> Result<()> {
    let manifest = descriptor_file_name(dbname, descriptor_number);
    let contents = manifest
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::invalid_argument("bad manifest file name"))?;
    let tmp = temp_file_name(dbname, descriptor_number);
    let result = write_string_to_file(env, format!("{contents}\n").as_bytes(), &tmp, true)
        .and_then(|()| env.rename_file(&tmp, &current_file_name(dbname)));
    if result.is_err() {
        let _ = env.remove_file(&tmp);
    }
    result
}
