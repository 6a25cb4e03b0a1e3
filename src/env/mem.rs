use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::env::{Env, FileLock, RandomAccessFile, SequentialFile, WritableFile};
use crate::error::{Error, Result};

#[derive(Default)]
struct MemFile {
    data: Vec<u8>,
    /// Length covered by the last `sync`.
    synced: usize,
}

type SharedFile = Arc<Mutex<MemFile>>;

/// In-memory `Env` for tests.
///
/// Files are shared byte buffers keyed by path. `drop_unsynced_data`
/// truncates every file back to its last synced length, which is what a
/// machine crash would leave behind.
#[derive(Default)]
pub struct MemEnv {
    files: Mutex<HashMap<PathBuf, SharedFile>>,
    locks: Mutex<HashSet<PathBuf>>,
    clock: AtomicU64,
}

impl MemEnv {
    pub fn new() -> Self {
        MemEnv::default()
    }

    /// Simulate a crash: forget every byte that was never synced.
    pub fn drop_unsynced_data(&self) {
        for file in self.files.lock().values() {
            let mut f = file.lock();
            let synced = f.synced;
            f.data.truncate(synced);
        }
    }

    /// Overwrite part of a file in place. Used to inject corruption.
    pub fn corrupt(&self, path: &Path, offset: usize, f: impl FnOnce(&mut [u8])) -> Result<()> {
        let file = self.get(path)?;
        let mut file = file.lock();
        let len = file.data.len();
        if offset > len {
            return Err(Error::invalid_argument("corruption offset past end of file"));
        }
        f(&mut file.data[offset..]);
        Ok(())
    }

    /// Shorten a file, as a torn write would.
    pub fn truncate(&self, path: &Path, len: usize) -> Result<()> {
        let file = self.get(path)?;
        let mut file = file.lock();
        file.data.truncate(len);
        file.synced = file.synced.min(len);
        Ok(())
    }

    fn get(&self, path: &Path) -> Result<SharedFile> {
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }
}

fn not_found(path: &Path) -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("{}: no such file", path.display()),
    ))
}

struct MemSequentialFile {
    file: SharedFile,
    pos: usize,
}

impl SequentialFile for MemSequentialFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let file = self.file.lock();
        let available = file.data.len().saturating_sub(self.pos);
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&file.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn skip(&mut self, n: u64) -> Result<()> {
        self.pos += n as usize;
        Ok(())
    }
}

struct MemRandomAccessFile {
    file: SharedFile,
}

impl RandomAccessFile for MemRandomAccessFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let file = self.file.lock();
        let offset = offset as usize;
        if offset >= file.data.len() {
            return Ok(0);
        }
        let n = (file.data.len() - offset).min(buf.len());
        buf[..n].copy_from_slice(&file.data[offset..offset + n]);
        Ok(n)
    }
}

struct MemWritableFile {
    file: SharedFile,
}

impl WritableFile for MemWritableFile {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        self.file.lock().data.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        let mut file = self.file.lock();
        file.synced = file.data.len();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Env for MemEnv {
    fn new_sequential_file(&self, path: &Path) -> Result<Box<dyn SequentialFile>> {
        Ok(Box::new(MemSequentialFile {
            file: self.get(path)?,
            pos: 0,
        }))
    }

    fn new_random_access_file(&self, path: &Path) -> Result<Arc<dyn RandomAccessFile>> {
        Ok(Arc::new(MemRandomAccessFile {
            file: self.get(path)?,
        }))
    }

    fn new_writable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        let file: SharedFile = Arc::default();
        self.files.lock().insert(path.to_path_buf(), Arc::clone(&file));
        Ok(Box::new(MemWritableFile { file }))
    }

    fn new_appendable_file(&self, path: &Path) -> Result<Box<dyn WritableFile>> {
        let file = Arc::clone(self.files.lock().entry(path.to_path_buf()).or_default());
        Ok(Box::new(MemWritableFile { file }))
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path)
    }

    fn children(&self, dir: &Path) -> Result<Vec<String>> {
        Ok(self
            .files
            .lock()
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.files
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| not_found(path))
    }

    fn create_dir(&self, _dir: &Path) -> Result<()> {
        Ok(())
    }

    fn remove_dir(&self, _dir: &Path) -> Result<()> {
        Ok(())
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        Ok(self.get(path)?.lock().data.len() as u64)
    }

    fn rename_file(&self, from: &Path, to: &Path) -> Result<()> {
        let mut files = self.files.lock();
        let file = files.remove(from).ok_or_else(|| not_found(from))?;
        files.insert(to.to_path_buf(), file);
        Ok(())
    }

    fn lock_file(&self, path: &Path) -> Result<FileLock> {
        let mut locks = self.locks.lock();
        if !locks.insert(path.to_path_buf()) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::WouldBlock,
                format!("lock {}: already held", path.display()),
            )));
        }
        self.files.lock().entry(path.to_path_buf()).or_default();
        Ok(FileLock::new(path.to_path_buf(), None))
    }

    fn unlock_file(&self, lock: FileLock) -> Result<()> {
        self.locks.lock().remove(lock.path());
        Ok(())
    }

    fn now_micros(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::read_file_to_vec;

    #[test]
    fn write_read_and_list() {
        let env = MemEnv::new();
        let dir = Path::new("/db");
        let path = dir.join("000001.log");
        let mut f = env.new_writable_file(&path).unwrap();
        f.append(b"hello ").unwrap();
        f.append(b"world").unwrap();
        assert_eq!(read_file_to_vec(&env, &path).unwrap(), b"hello world");
        assert_eq!(env.children(dir).unwrap(), vec!["000001.log".to_string()]);
        assert_eq!(env.file_size(&path).unwrap(), 11);
    }

    #[test]
    fn drop_unsynced_data_keeps_synced_prefix() {
        let env = MemEnv::new();
        let path = Path::new("/db/x");
        let mut f = env.new_writable_file(path).unwrap();
        f.append(b"durable").unwrap();
        f.sync().unwrap();
        f.append(b"-lost").unwrap();
        env.drop_unsynced_data();
        assert_eq!(read_file_to_vec(&env, path).unwrap(), b"durable");
    }

    #[test]
    fn double_lock_fails() {
        let env = MemEnv::new();
        let lock = env.lock_file(Path::new("/db/LOCK")).unwrap();
        assert!(env.lock_file(Path::new("/db/LOCK")).is_err());
        env.unlock_file(lock).unwrap();
        assert!(env.lock_file(Path::new("/db/LOCK")).is_ok());
    }
}
