//! Data Resolver
//!
//! Turns a [`DataDescriptor`] into a local file:
//!
//! * `path`: must exist; returned as-is (relative paths join the base dir)
//! * `contents`: materialized once into the cache
//! * `url`: downloaded once into the cache
//!
//! When a descriptor sets more than one source, path wins over contents and
//! contents over url.

use crate::cache::{CacheDirectory, CacheKey};
use crate::descriptor::{DataDescriptor, DataSource, DataValue, Manifest};
use crate::error::{FixtureError, FixtureResult, IntoFixtureError};
use crate::fetch::Fetcher;
use crate::fs_utils;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

const DEFAULT_CONTENTS_NAME: &str = "contents";
const DEFAULT_DOWNLOAD_NAME: &str = "download";

/// How a resolved file came to be on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// An existing local file
    Local,
    /// Written from inline contents
    Contents,
    /// Downloaded from a URL
    Downloaded,
}

/// A local file produced by resolving a descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub path: PathBuf,
    pub origin: Origin,
}

impl ResolvedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsRef<Path> for ResolvedFile {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// Resolves descriptors against a cache directory.
#[derive(Clone)]
pub struct DataResolver {
    cache: Arc<CacheDirectory>,
    fetcher: Arc<dyn Fetcher>,
    base_dir: PathBuf,
}

impl DataResolver {
    pub fn new(cache: Arc<CacheDirectory>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            cache,
            fetcher,
            base_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Directory that relative `path` descriptors are resolved against
    pub fn with_base_dir<P: Into<PathBuf>>(mut self, base_dir: P) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn cache(&self) -> &CacheDirectory {
        &self.cache
    }

    /// Resolve a descriptor to a local file
    pub fn resolve(&self, descriptor: &DataDescriptor) -> FixtureResult<ResolvedFile> {
        match descriptor.source()? {
            DataSource::Path(path) => self.resolve_path(path),
            DataSource::Contents(contents) => {
                self.resolve_contents(contents, descriptor.name.as_deref())
            }
            DataSource::Url(url) => self.resolve_url(url, descriptor.name.as_deref()),
        }
    }

    fn resolve_path(&self, path: &Path) -> FixtureResult<ResolvedFile> {
        let path = fs_utils::absolutize(path, &self.base_dir);
        if !path.is_file() {
            return Err(FixtureError::NotFound { path });
        }
        debug!(path = %path.display(), "using local test data");
        Ok(ResolvedFile {
            path,
            origin: Origin::Local,
        })
    }

    fn resolve_contents(&self, contents: &str, name: Option<&str>) -> FixtureResult<ResolvedFile> {
        let file_name = name.unwrap_or(DEFAULT_CONTENTS_NAME);
        let key = CacheKey::for_contents(contents, file_name);
        let (path, created) = self.cache.get_or_populate(&key, |file| {
            file.write_all(contents.as_bytes())
                .fixture_context("Failed to write test data contents")
        })?;
        if created {
            debug!(path = %path.display(), "materialized test data contents");
        }
        Ok(ResolvedFile {
            path,
            origin: Origin::Contents,
        })
    }

    fn resolve_url(&self, url: &str, name: Option<&str>) -> FixtureResult<ResolvedFile> {
        let file_name = name
            .map(str::to_string)
            .or_else(|| fs_utils::url_file_name(url))
            .unwrap_or_else(|| DEFAULT_DOWNLOAD_NAME.to_string());
        let key = CacheKey::for_url(url, &file_name);
        let (path, _) = self.cache.get_or_populate(&key, |file| {
            self.fetcher.fetch(url, file).map(|_| ())
        })?;
        Ok(ResolvedFile {
            path,
            origin: Origin::Downloaded,
        })
    }
}

/// Test data from a manifest, resolved lazily and memoized per name.
pub struct TestData {
    manifest: Manifest,
    resolver: DataResolver,
    resolved: Mutex<HashMap<String, ResolvedFile>>,
}

impl TestData {
    pub fn new(manifest: Manifest, resolver: DataResolver) -> Self {
        let resolver = match manifest.base_dir() {
            Some(base) => resolver.with_base_dir(base),
            None => resolver,
        };
        Self {
            manifest,
            resolver,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Resolve a named file entry to a local file
    pub fn file(&self, name: &str) -> FixtureResult<ResolvedFile> {
        if let Some(resolved) = self.lock_resolved().get(name) {
            return Ok(resolved.clone());
        }

        let descriptor = match self.manifest.get(name)? {
            DataValue::File(descriptor) => descriptor,
            DataValue::Literal(_) => {
                return Err(FixtureError::invalid_descriptor(format!(
                    "test data '{}' is a literal value, not a file",
                    name
                )))
            }
        };
        let resolved = self.resolver.resolve(descriptor)?;
        self.lock_resolved()
            .insert(name.to_string(), resolved.clone());
        Ok(resolved)
    }

    /// Engine-ready input value: files become path strings, literals pass through
    pub fn input(&self, name: &str) -> FixtureResult<serde_json::Value> {
        match self.manifest.get(name)? {
            DataValue::Literal(value) => Ok(value.clone()),
            DataValue::File(_) => {
                let resolved = self.file(name)?;
                Ok(serde_json::Value::String(
                    resolved.path.to_string_lossy().into_owned(),
                ))
            }
        }
    }

    /// Expected value for an output check
    pub fn expected(&self, name: &str) -> FixtureResult<DataValue> {
        self.manifest.get(name).cloned()
    }

    /// Resolve every file entry, returning name and path in manifest order
    pub fn resolve_all(&self) -> FixtureResult<Vec<(String, ResolvedFile)>> {
        let names: Vec<String> = self
            .manifest
            .iter()
            .filter(|(_, value)| value.as_descriptor().is_some())
            .map(|(name, _)| name.to_string())
            .collect();
        names
            .into_iter()
            .map(|name| {
                let resolved = self.file(&name)?;
                Ok((name, resolved))
            })
            .collect()
    }

    fn lock_resolved(&self) -> std::sync::MutexGuard<'_, HashMap<String, ResolvedFile>> {
        self.resolved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
