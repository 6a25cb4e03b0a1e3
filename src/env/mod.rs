//! Operating-system capabilities consumed by the engine.
//!
//! The engine never touches `std::fs` directly: every file it reads or
//! writes goes through an `Env` passed in `Options`. `DiskEnv` is the real
//! implementation; `MemEnv` keeps everything in memory and can simulate a
//! crash by discarding unsynced bytes.

pub mod disk;
pub mod mem;

pub use disk::DiskEnv;
pub use mem::MemEnv;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;

/// A file read front to back (log and manifest replay).
pub trait SequentialFile: Send {
    /// Read up to `buf.len()` bytes. Returns 0 at end of file.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Skip `n` bytes.
    fn skip(&mut self, n: u64) -> Result<()>;
}

/// A file read at arbitrary offsets (tables). Safe for concurrent use.
pub trait RandomAccessFile: Send + Sync {
    /// Read up to `buf.len()` bytes starting at `offset`. Returns the number
    /// of bytes read, which is short only at end of file.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;
}

/// An append-only file with explicit flush and sync.
pub trait WritableFile: Send {
    fn append(&mut self, data: &[u8]) -> Result<()>;

    /// Push buffered bytes to the operating system.
    fn flush(&mut self) -> Result<()>;

    /// Make everything appended so far durable.
    fn sync(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// Held while a database directory is open. Released through
/// `Env::unlock_file` or on drop.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: Option<std::fs::File>,
}

impl FileLock {
    pub(crate) fn new(path: PathBuf, file: Option<std::fs::File>) -> Self {
        FileLock { path, file }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn take_file(&mut self) -> Option<std::fs::File> {
        self.file.take()
    }
}

pub trait Env: Send + Sync {
    fn new_sequential_file(&self, path: &Path) -> Result<Box<dyn SequentialFile>>;

    fn new_random_access_file(&self, path: &Path) -> Result<Arc<dyn RandomAccessFile>>;

    /// Create a new file, truncating any existing one.
    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>>;

    /// Open a file for appending, creating it if needed.
    fn new_appendable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>>;

    fn file_exists(&self, path: &Path) -> bool;

    /// Names (not paths) of the entries in `dir`.
    fn children(&self, dir: &Path) -> Result<Vec<String>>;

    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Create `dir` (and parents). Succeeds if it already exists.
    fn create_dir(&self, dir: &Path) -> Result<()>;

    fn remove_dir(&self, dir: &Path) -> Result<()>;

    fn file_size(&self, path: &Path) -> Result<u64>;

    fn rename_file(&self, from: &Path, to: &Path) -> Result<()>;

    /// Acquire an exclusive advisory lock. Fails if another holder exists,
    /// including one in this process.
    fn lock_file(&self, path: &Path) -> Result<FileLock>;

    fn unlock_file(&self, lock: FileLock) -> Result<()>;

    fn now_micros(&self) -> u64;
}

/// The default environment: the local filesystem.
pub fn default_env() -> Arc<dyn Env> {
    Arc::new(DiskEnv::new())
}

/// Write `data` to a new file at `path`, optionally syncing it.
pub fn write_string_to_file(env: &dyn Env, data: &[u8], path: &Path, sync: bool) -> Result<()> {
    let result = (|| {
        let mut file = env.new_writable_file(path)?;
        file.append(data)?;
        if sync {
            file.sync()?;
        }
        file.close()
    })();
    if result.is_err() {
        let _ = env.remove_file(path);
    }
    result
}

pub fn read_file_to_vec(env: &dyn Env, path: &Path) -> Result<Vec<u8>> {
    let mut file = env.new_sequential_file(path)?;
    let mut data = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
    }
    Ok(data)
}
