//! Error types for fixture resolution and output checking.
//!
//! Every failure a test can hit surfaces as a [`FixtureError`]. Resolution
//! errors propagate as-is; the output comparator folds all mismatches of one
//! check into a single [`FixtureError::Mismatch`].

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main error type for the fixture library.
#[derive(Error, Debug)]
pub enum FixtureError {
    /// A descriptor names a local path that does not exist
    #[error("Test data file {} does not exist", .path.display())]
    NotFound { path: PathBuf },

    /// Network or transport failure while downloading test data
    #[error("Failed to fetch {url}: {message}{}", http_suffix(.status))]
    Fetch {
        url: String,
        message: String,
        status: Option<u16>,
    },

    /// The server rejected the configured credentials
    #[error("Credentials rejected while fetching {url} (HTTP {status}); check the configured HTTP header variables")]
    Auth { url: String, status: u16 },

    /// The engine did not produce one or more expected outputs
    #[error("Workflow did not generate output(s): {}", .names.join(", "))]
    MissingOutput { names: Vec<String> },

    /// One or more outputs differ from their expected values
    #[error("{0}")]
    Mismatch(MismatchReport),

    /// A descriptor is malformed (e.g. none of url/path/contents)
    #[error("Invalid data descriptor: {message}")]
    InvalidDescriptor { message: String },

    /// A manifest lookup used a name the manifest does not define
    #[error("Unrecognized test data name '{name}'")]
    UnknownData { name: String },

    /// A descriptor requested a comparison type nobody registered
    #[error("No comparator registered for data type '{name}'")]
    UnknownDataType { name: String },

    /// The test data manifest could not be read or parsed
    #[error("Invalid test data manifest {}: {message}", .path.display())]
    Manifest { path: PathBuf, message: String },

    /// File system operation failed
    #[error("{message}{}: {source}", path_suffix(.path))]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: io::Error,
    },

    /// Configuration error
    #[error("Configuration error{}: {message}", key_suffix(.key))]
    Config { message: String, key: Option<String> },

    /// The workflow engine failed to run or produced unreadable output
    #[error("Engine error: {message}{}", stderr_suffix(.stderr))]
    Engine {
        message: String,
        stdout: String,
        stderr: String,
    },
}

fn http_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" at {}", p.display()))
        .unwrap_or_default()
}

fn key_suffix(key: &Option<String>) -> String {
    key.as_ref().map(|k| format!(" ({})", k)).unwrap_or_default()
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!("\nStderr: {}", stderr)
    }
}

impl FixtureError {
    /// Create a file system error
    pub fn io(message: impl Into<String>, path: Option<&Path>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            path: path.map(Path::to_path_buf),
            source,
        }
    }

    /// Create a fetch error
    pub fn fetch(url: impl Into<String>, message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.into(),
            status,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>, key: Option<&str>) -> Self {
        Self::Config {
            message: message.into(),
            key: key.map(str::to_string),
        }
    }

    /// Create an engine error
    pub fn engine(message: impl Into<String>, stdout: String, stderr: String) -> Self {
        Self::Engine {
            message: message.into(),
            stdout,
            stderr,
        }
    }

    /// Create an invalid descriptor error
    pub fn invalid_descriptor(message: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            message: message.into(),
        }
    }

    /// True for errors raised while downloading test data
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, Self::Fetch { .. } | Self::Auth { .. })
    }
}

/// A single output whose value did not match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputMismatch {
    /// Output name as listed in the expected outputs
    pub name: String,
    /// Human-readable description of the difference
    pub detail: String,
}

/// Every mismatch found in one comparison pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MismatchReport {
    pub mismatches: Vec<OutputMismatch>,
}

impl MismatchReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, detail: impl Into<String>) {
        self.mismatches.push(OutputMismatch {
            name: name.into(),
            detail: detail.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.mismatches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mismatches.len()
    }

    /// Names of the mismatched outputs, in the order they were checked
    pub fn names(&self) -> Vec<&str> {
        self.mismatches.iter().map(|m| m.name.as_str()).collect()
    }

    /// Return `Ok` when nothing mismatched, otherwise the report as an error
    pub fn into_result(self) -> FixtureResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(FixtureError::Mismatch(self))
        }
    }
}

impl fmt::Display for MismatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} output(s) did not match: {}",
            self.mismatches.len(),
            self.names().join(", ")
        )?;
        for mismatch in &self.mismatches {
            write!(f, "\n--- {} ---\n{}", mismatch.name, mismatch.detail)?;
        }
        Ok(())
    }
}

/// Result type for fixture operations
pub type FixtureResult<T> = Result<T, FixtureError>;

/// Extension trait for converting IO errors to fixture errors
pub trait IntoFixtureError<T> {
    fn fixture_context(self, message: &str) -> FixtureResult<T>;
    fn fixture_context_with_path(self, message: &str, path: &Path) -> FixtureResult<T>;
}

impl<T> IntoFixtureError<T> for Result<T, io::Error> {
    fn fixture_context(self, message: &str) -> FixtureResult<T> {
        self.map_err(|e| FixtureError::io(message, None, e))
    }

    fn fixture_context_with_path(self, message: &str, path: &Path) -> FixtureResult<T> {
        self.map_err(|e| FixtureError::io(message, Some(path), e))
    }
}
