//! File system utilities
//!
//! Thin wrappers over `std::fs` that attach the offending path to errors,
//! plus the few path helpers the resolver and comparator share.

use crate::error::{FixtureResult, IntoFixtureError};
use flate2::read::MultiGzDecoder;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use url::Url;

/// A working directory that is either supplied by the user and kept, or
/// created for the caller and removed on drop
#[derive(Debug)]
pub enum ScratchDir {
    Persistent(PathBuf),
    Temporary(TempDir),
}

impl ScratchDir {
    /// Use (and create if needed) `persistent`, or make a temporary
    /// directory named with `prefix`
    pub fn open(persistent: Option<&Path>, prefix: &str) -> FixtureResult<Self> {
        match persistent {
            Some(path) => {
                create_dir_all(path)?;
                Ok(ScratchDir::Persistent(path.to_path_buf()))
            }
            None => {
                let dir = tempfile::Builder::new()
                    .prefix(prefix)
                    .tempdir()
                    .fixture_context("Failed to create temporary directory")?;
                Ok(ScratchDir::Temporary(dir))
            }
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            ScratchDir::Persistent(path) => path,
            ScratchDir::Temporary(dir) => dir.path(),
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, ScratchDir::Persistent(_))
    }
}

/// Create a directory and all parent directories if they don't exist
pub fn create_dir_all<P: AsRef<Path>>(path: P) -> FixtureResult<()> {
    let path = path.as_ref();
    fs::create_dir_all(path).fixture_context_with_path("Failed to create directory", path)
}

/// Read file contents as string
pub fn read_file_to_string<P: AsRef<Path>>(path: P) -> FixtureResult<String> {
    let path = path.as_ref();
    fs::read_to_string(path).fixture_context_with_path("Failed to read file", path)
}

/// Read file contents as bytes
pub fn read_file_to_bytes<P: AsRef<Path>>(path: P) -> FixtureResult<Vec<u8>> {
    let path = path.as_ref();
    fs::read(path).fixture_context_with_path("Failed to read file", path)
}

/// Read file contents, decompressing `.gz` files
pub fn read_file_decompressed<P: AsRef<Path>>(path: P) -> FixtureResult<Vec<u8>> {
    let path = path.as_ref();
    if !is_gzipped(path) {
        return read_file_to_bytes(path);
    }
    let file = fs::File::open(path).fixture_context_with_path("Failed to open file", path)?;
    let mut contents = Vec::new();
    MultiGzDecoder::new(file)
        .read_to_end(&mut contents)
        .fixture_context_with_path("Failed to decompress file", path)?;
    Ok(contents)
}

pub fn is_gzipped(path: &Path) -> bool {
    path.extension().map(|ext| ext == "gz").unwrap_or(false)
}

/// Get file size in bytes
pub fn file_size<P: AsRef<Path>>(path: P) -> FixtureResult<u64> {
    let path = path.as_ref();
    let metadata =
        fs::metadata(path).fixture_context_with_path("Failed to get file metadata", path)?;
    Ok(metadata.len())
}

/// Join `path` onto `base` unless it is already absolute
pub fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Interpret an engine-reported file location: a plain path or a `file://` URL
pub fn local_path_from_output(value: &str) -> Option<PathBuf> {
    if value.starts_with("file://") {
        Url::parse(value).ok()?.to_file_path().ok()
    } else if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

/// Last non-empty path segment of a URL, usable as a file name
pub fn url_file_name(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}

/// Count regular files below a directory
pub fn count_files<P: AsRef<Path>>(dir: P) -> FixtureResult<usize> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Ok(0);
    }

    let mut count = 0;
    for entry in fs::read_dir(dir).fixture_context_with_path("Failed to list directory", dir)? {
        let entry = entry.fixture_context_with_path("Failed to read directory entry", dir)?;
        let path = entry.path();
        if path.is_dir() {
            count += count_files(&path)?;
        } else if path.is_file() {
            count += 1;
        }
    }
    Ok(count)
}

/// Walk up from `start` to the first directory containing any of `markers`
pub fn find_upwards(start: &Path, markers: &[&str]) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| markers.iter().any(|marker| dir.join(marker).exists()))
        .map(Path::to_path_buf)
}
