//! Cache directory for resolved test data
//!
//! Entries live at `<root>/<kind>/<key>/<file name>`. An entry is populated at
//! most once: writers hold a per-key lock inside the process and publish the
//! file with an atomic rename, so readers in this or any other process never
//! see a partially written file.

use crate::error::{FixtureError, FixtureResult, IntoFixtureError};
use crate::fs_utils::{self, ScratchDir};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use tracing::debug;

const CACHE_DIR_PREFIX: &str = "wdl_fixtures_";

/// Kind of cached data; used as the first path component of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Url,
    Contents,
}

impl EntryKind {
    fn dir_name(self) -> &'static str {
        match self {
            EntryKind::Url => "url",
            EntryKind::Contents => "contents",
        }
    }
}

/// Identity of a cache entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: EntryKind,
    /// Short hash of the identity (URL, or name + contents)
    pub digest: String,
    /// File name of the entry, kept so tools see the right extension
    pub file_name: String,
}

impl CacheKey {
    pub fn for_url(url: &str, file_name: &str) -> Self {
        Self {
            kind: EntryKind::Url,
            digest: hash_string(url),
            file_name: file_name.to_string(),
        }
    }

    pub fn for_contents(contents: &str, file_name: &str) -> Self {
        Self {
            kind: EntryKind::Contents,
            digest: hash_string(&format!("{}\0{}", file_name, contents)),
            file_name: file_name.to_string(),
        }
    }

    fn relative_path(&self) -> PathBuf {
        Path::new(self.kind.dir_name())
            .join(&self.digest)
            .join(&self.file_name)
    }
}

/// Compute a short hash of a string
pub fn hash_string(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

/// Directory holding fetched and materialized test files.
pub struct CacheDirectory {
    root: ScratchDir,
    locks: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for CacheDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheDirectory")
            .field("path", &self.path())
            .field("persistent", &self.is_persistent())
            .finish()
    }
}

impl CacheDirectory {
    fn with_root(root: ScratchDir) -> Self {
        debug!(
            path = %root.path().display(),
            persistent = root.is_persistent(),
            "using cache directory"
        );
        Self {
            root,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Use (and create if needed) a directory that is kept after the session
    pub fn persistent<P: AsRef<Path>>(path: P) -> FixtureResult<Self> {
        ScratchDir::open(Some(path.as_ref()), CACHE_DIR_PREFIX).map(Self::with_root)
    }

    /// Create a temporary directory that is deleted when this value is dropped
    pub fn ephemeral() -> FixtureResult<Self> {
        ScratchDir::open(None, CACHE_DIR_PREFIX).map(Self::with_root)
    }

    /// Persistent directory if one is given, ephemeral otherwise
    pub fn open(persistent: Option<&Path>) -> FixtureResult<Self> {
        ScratchDir::open(persistent, CACHE_DIR_PREFIX).map(Self::with_root)
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn is_persistent(&self) -> bool {
        self.root.is_persistent()
    }

    /// Where the entry for `key` lives (whether or not it exists yet)
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.path().join(key.relative_path())
    }

    /// Return the cached entry for `key`, populating it with `populate` first
    /// if it does not exist yet.
    ///
    /// Concurrent callers for the same key wait for the first writer and reuse
    /// its entry. `populate` writes into a temporary file that is only renamed
    /// into place after it returns `Ok`. The per-key lock is dropped once the
    /// entry is settled, so the lock table only holds keys being written.
    /// The boolean is `true` when this call created the entry.
    pub fn get_or_populate<F>(&self, key: &CacheKey, populate: F) -> FixtureResult<(PathBuf, bool)>
    where
        F: FnOnce(&mut File) -> FixtureResult<()>,
    {
        let target = self.entry_path(key);
        if target.is_file() {
            debug!(path = %target.display(), "cache hit");
            return Ok((target, false));
        }

        let lock = self.key_lock(key);
        let guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Another writer may have finished while we waited
        let result = if target.is_file() {
            debug!(path = %target.display(), "cache hit after wait");
            Ok((target, false))
        } else {
            Self::populate_entry(target, populate)
        };
        // Later callers see the published file and never reach the lock
        self.release_lock(key);
        drop(guard);
        result
    }

    fn populate_entry<F>(target: PathBuf, populate: F) -> FixtureResult<(PathBuf, bool)>
    where
        F: FnOnce(&mut File) -> FixtureResult<()>,
    {
        let parent = target
            .parent()
            .ok_or_else(|| FixtureError::config("Cache entry has no parent directory", None))?;
        fs_utils::create_dir_all(parent)?;

        let mut temp = NamedTempFile::new_in(parent)
            .fixture_context_with_path("Failed to create temporary cache file", parent)?;
        populate(temp.as_file_mut())?;
        temp.as_file_mut()
            .sync_all()
            .fixture_context_with_path("Failed to flush cache file", temp.path())?;

        match temp.persist_noclobber(&target) {
            Ok(_) => {
                debug!(path = %target.display(), "cache entry written");
                Ok((target, true))
            }
            // Lost the race against another writer; its copy is identical
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %target.display(), "cache entry written concurrently");
                Ok((target, false))
            }
            Err(e) => Err(FixtureError::io(
                "Failed to publish cache entry",
                Some(&target),
                e.error,
            )),
        }
    }

    fn lock_table(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, Arc<Mutex<()>>>> {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        self.lock_table()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release_lock(&self, key: &CacheKey) {
        self.lock_table().remove(key);
    }

    /// Number of files currently in the cache
    pub fn entry_count(&self) -> FixtureResult<usize> {
        fs_utils::count_files(self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_cache_key_is_deterministic() {
        let a = CacheKey::for_url("https://example.org/a.vcf", "a.vcf");
        let b = CacheKey::for_url("https://example.org/a.vcf", "a.vcf");
        let c = CacheKey::for_url("https://example.org/b.vcf", "a.vcf");
        assert_eq!(a, b);
        assert_ne!(a.digest, c.digest);
        assert_eq!(a.digest.len(), 16);

        let x = CacheKey::for_contents("hello", "greeting.txt");
        let y = CacheKey::for_contents("hello", "other.txt");
        assert_ne!(x.digest, y.digest);
    }

    #[test]
    fn test_ephemeral_cache_removed_on_drop() {
        let cache = CacheDirectory::ephemeral().unwrap();
        let path = cache.path().to_path_buf();
        assert!(path.is_dir());
        assert!(!cache.is_persistent());
        drop(cache);
        assert!(!path.exists());
    }

    #[test]
    fn test_persistent_cache_survives_drop() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().join("cache");
        let cache = CacheDirectory::persistent(&root).unwrap();
        let key = CacheKey::for_contents("data", "data.txt");
        let (path, created) = cache
            .get_or_populate(&key, |file| {
                file.write_all(b"data").fixture_context("write")
            })
            .unwrap();
        assert!(created);
        drop(cache);
        assert_eq!(std::fs::read_to_string(path).unwrap(), "data");
    }

    #[test]
    fn test_failed_population_leaves_no_entry() {
        let cache = CacheDirectory::ephemeral().unwrap();
        let key = CacheKey::for_url("https://example.org/x", "x");
        let result = cache.get_or_populate(&key, |file| {
            file.write_all(b"partial").fixture_context("write")?;
            Err(FixtureError::fetch("https://example.org/x", "connection reset", None))
        });
        assert!(result.is_err());
        assert!(!cache.entry_path(&key).exists());
        assert_eq!(cache.entry_count().unwrap(), 0);
        assert!(cache.lock_table().is_empty());
    }

    #[test]
    fn test_concurrent_population_runs_once() {
        let cache = Arc::new(CacheDirectory::ephemeral().unwrap());
        let key = CacheKey::for_url("https://example.org/big.bin", "big.bin");
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let key = key.clone();
                let calls = Arc::clone(&calls);
                thread::spawn(move || {
                    cache
                        .get_or_populate(&key, |file| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            file.write_all(b"payload").fixture_context("write")
                        })
                        .unwrap()
                        .0
                })
            })
            .collect();

        let paths: Vec<PathBuf> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(paths.windows(2).all(|w| w[0] == w[1]));
        assert!(cache.lock_table().is_empty());
        assert_eq!(std::fs::read(&paths[0]).unwrap(), b"payload");
    }
}
