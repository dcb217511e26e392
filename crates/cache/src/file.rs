//! Cache backend on a local directory.
//!
//! # Layout
//!
//! ```text
//!   <root>/ab/cd/abcd...ef        XXH3-128 of the key, hex, two-level fan-out
//!
//!   file contents:
//!     1700000000\n                expiry as unix seconds, 0 = never
//!     <value>
//! ```
//!
//! Writes go to a temporary file in the target directory and are renamed
//! into place, so readers never see a partial value. Read-modify-write
//! operations (`incr`, `set_nx`, `expire`) hold an in-process mutex; the
//! backend is therefore atomic only among users of the same `FileBackend`.

use crate::backend::CacheBackend;
use crate::error::{CacheError, Result};
use corelib::{Clock, SystemClock};
use parking_lot::Mutex;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::warn;
use xxhash_rust::xxh3::xxh3_128;

#[derive(Debug)]
struct Record {
    expires_at: u64,
    value: String,
}

impl Record {
    fn is_live(&self, now: u64) -> bool {
        self.expires_at == 0 || self.expires_at > now
    }
}

#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl FileBackend {
    /// Use `root` as the cache directory, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_clock(root, Arc::new(SystemClock))
    }

    pub fn with_clock(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            clock,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `key` is stored.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let digest = format!("{:032x}", xxh3_128(key.as_bytes()));
        self.root
            .join(&digest[0..2])
            .join(&digest[2..4])
            .join(digest)
    }

    fn read(&self, path: &Path) -> Result<Option<Record>> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let parsed = raw
            .split_once('\n')
            .and_then(|(head, value)| Some((head.parse::<u64>().ok()?, value)));
        match parsed {
            Some((expires_at, value)) => Ok(Some(Record {
                expires_at,
                value: value.to_string(),
            })),
            None => {
                warn!(path = %path.display(), "discarding malformed cache file");
                Ok(None)
            }
        }
    }

    /// Read a record, treating an expired one as absent.
    fn read_live(&self, path: &Path) -> Result<Option<Record>> {
        let now = self.clock.now();
        Ok(self.read(path)?.filter(|r| r.is_live(now)))
    }

    fn write(&self, path: &Path, value: &str, expires_at: u64) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| CacheError::Config(format!("no parent for {}", path.display())))?;
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        write!(tmp, "{}\n{}", expires_at, value)?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn expiry(&self, ttl: u64) -> u64 {
        if ttl == 0 {
            0
        } else {
            self.clock.now() + ttl
        }
    }
}

impl CacheBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        let now = self.clock.now();
        match self.read(&path)? {
            Some(record) if record.is_live(now) => Ok(Some(record.value)),
            Some(_) => {
                // Re-check under the lock: a writer may have replaced it.
                let _guard = self.write_lock.lock();
                if self.read_live(&path)?.is_none() {
                    self.remove(&path)?;
                }
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: u64) -> Result<()> {
        let path = self.path_for(key);
        let _guard = self.write_lock.lock();
        self.write(&path, value, self.expiry(ttl))
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key);
        let _guard = self.write_lock.lock();
        let live = self.read_live(&path)?.is_some();
        Ok(self.remove(&path)? && live)
    }

    fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let path = self.path_for(key);
        let _guard = self.write_lock.lock();

        let (current, expires_at) = match self.read_live(&path)? {
            Some(record) => {
                let current = record
                    .value
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| CacheError::NotInteger(key.to_string()))?;
                (current, record.expires_at)
            }
            None => (0, 0),
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| CacheError::Overflow(key.to_string()))?;
        self.write(&path, &next.to_string(), expires_at)?;
        Ok(next)
    }

    fn set_nx(&self, key: &str, value: &str, ttl: u64) -> Result<bool> {
        let path = self.path_for(key);
        let _guard = self.write_lock.lock();
        if self.read_live(&path)?.is_some() {
            return Ok(false);
        }
        self.write(&path, value, self.expiry(ttl))?;
        Ok(true)
    }

    fn expire(&self, key: &str, ttl: u64) -> Result<bool> {
        let path = self.path_for(key);
        let _guard = self.write_lock.lock();
        match self.read_live(&path)? {
            Some(record) => {
                self.write(&path, &record.value, self.expiry(ttl))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::ManualClock;

    #[test]
    fn test_layout_and_format() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        backend.set("greeting", "hello\nworld", 0).unwrap();

        let path = backend.path_for("greeting");
        let rel = path.strip_prefix(dir.path()).unwrap();
        let parts: Vec<_> = rel.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].len(), 32);
        assert!(parts[2].starts_with(&format!("{}{}", parts[0], parts[1])));

        assert_eq!(fs::read_to_string(&path).unwrap(), "0\nhello\nworld");
        assert_eq!(backend.get("greeting").unwrap(), Some("hello\nworld".to_string()));
    }

    #[test]
    fn test_expired_file_removed_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(100));
        let backend = FileBackend::with_clock(dir.path(), clock.clone()).unwrap();

        backend.set("k", "v", 10).unwrap();
        assert_eq!(fs::read_to_string(backend.path_for("k")).unwrap(), "110\nv");

        clock.advance(10);
        assert_eq!(backend.get("k").unwrap(), None);
        assert!(!backend.path_for("k").exists());
    }

    #[test]
    fn test_malformed_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        let path = backend.path_for("k");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not-a-header").unwrap();
        assert_eq!(backend.get("k").unwrap(), None);
    }

    #[test]
    fn test_incr_keeps_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(100));
        let backend = FileBackend::with_clock(dir.path(), clock).unwrap();

        assert_eq!(backend.incr("n", 1).unwrap(), 1);
        assert!(backend.expire("n", 30).unwrap());
        assert_eq!(backend.incr("n", 1).unwrap(), 2);
        assert_eq!(fs::read_to_string(backend.path_for("n")).unwrap(), "130\n2");
    }
}
