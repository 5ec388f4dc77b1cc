//! Test data descriptors and manifests
//!
//! A manifest is a JSON object mapping logical data names to either a plain
//! value or a file descriptor:
//!
//! ```json
//! {
//!   "sample_name": "NA12878",
//!   "reads": {"url": "https://example.org/data/reads.bam"},
//!   "intervals": {"path": "data/intervals.bed"},
//!   "expected_vcf": {"path": "data/expected.vcf", "type": "vcf"}
//! }
//! ```

use crate::error::{FixtureError, FixtureResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Keys whose presence marks a JSON object as a file descriptor
const DESCRIPTOR_KEYS: [&str; 3] = ["url", "path", "contents"];

/// One test file, located by path, inline contents, or URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    /// Comparison strategy name (e.g. "vcf"); absent means byte equality
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    /// File name for cached copies of contents/URL data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Number of differing lines tolerated when comparing
    #[serde(default, skip_serializing_if = "is_zero")]
    pub allowed_diff_lines: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// Where a descriptor's data actually comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource<'a> {
    Path(&'a Path),
    Contents(&'a str),
    Url(&'a str),
}

impl DataDescriptor {
    pub fn from_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn from_contents<S: Into<String>>(contents: S) -> Self {
        Self {
            contents: Some(contents.into()),
            ..Self::default()
        }
    }

    pub fn from_url<S: Into<String>>(url: S) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Set the comparison type
    pub fn with_type<S: Into<String>>(mut self, data_type: S) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_allowed_diff_lines(mut self, lines: usize) -> Self {
        self.allowed_diff_lines = lines;
        self
    }

    /// Pick the data source. When several are given, path wins over
    /// contents, and contents over url.
    pub fn source(&self) -> FixtureResult<DataSource<'_>> {
        if let Some(name) = &self.name {
            check_file_name(name)?;
        }
        if let Some(path) = &self.path {
            Ok(DataSource::Path(path))
        } else if let Some(contents) = &self.contents {
            Ok(DataSource::Contents(contents))
        } else if let Some(url) = &self.url {
            Ok(DataSource::Url(url))
        } else {
            Err(FixtureError::invalid_descriptor(
                "one of 'url', 'path' or 'contents' is required",
            ))
        }
    }

    /// Comparison type, with absent mapped to "default"
    pub fn comparison_type(&self) -> &str {
        self.data_type.as_deref().unwrap_or(crate::compare::DEFAULT_TYPE)
    }

    /// Make a relative `path` absolute against `base`
    pub fn rebase(mut self, base: &Path) -> Self {
        if let Some(path) = &self.path {
            if path.is_relative() {
                self.path = Some(base.join(path));
            }
        }
        self
    }
}

/// `name` becomes the last component of a cache path, so it must be a plain
/// file name
fn check_file_name(name: &str) -> FixtureResult<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(single)), None) if single == name => Ok(()),
        _ => Err(FixtureError::invalid_descriptor(format!(
            "'name' must be a plain file name, got {:?}",
            name
        ))),
    }
}

/// A manifest or expected-output value: either a literal or a file.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Literal(serde_json::Value),
    File(DataDescriptor),
}

impl DataValue {
    /// Classify a JSON value. Objects carrying any of `url`, `path` or
    /// `contents` are descriptors; everything else is a literal.
    pub fn from_json(value: serde_json::Value) -> FixtureResult<Self> {
        let is_descriptor = value
            .as_object()
            .map(|obj| DESCRIPTOR_KEYS.iter().any(|key| obj.contains_key(*key)))
            .unwrap_or(false);

        if is_descriptor {
            let descriptor: DataDescriptor = serde_json::from_value(value)
                .map_err(|e| FixtureError::invalid_descriptor(e.to_string()))?;
            Ok(DataValue::File(descriptor))
        } else {
            Ok(DataValue::Literal(value))
        }
    }

    pub fn literal<V: Into<serde_json::Value>>(value: V) -> Self {
        DataValue::Literal(value.into())
    }

    pub fn as_descriptor(&self) -> Option<&DataDescriptor> {
        match self {
            DataValue::File(descriptor) => Some(descriptor),
            DataValue::Literal(_) => None,
        }
    }
}

impl From<DataDescriptor> for DataValue {
    fn from(descriptor: DataDescriptor) -> Self {
        DataValue::File(descriptor)
    }
}

impl TryFrom<serde_json::Value> for DataValue {
    type Error = FixtureError;

    fn try_from(value: serde_json::Value) -> FixtureResult<Self> {
        DataValue::from_json(value)
    }
}

/// Named test data loaded from a JSON manifest file.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: IndexMap<String, DataValue>,
    base_dir: Option<PathBuf>,
}

impl Manifest {
    /// Load a manifest; relative descriptor paths resolve against its directory
    pub fn load<P: AsRef<Path>>(path: P) -> FixtureResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| FixtureError::Manifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_json_str(&text, Some(base_dir)).map_err(|e| FixtureError::Manifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn from_json_str(text: &str, base_dir: Option<PathBuf>) -> FixtureResult<Self> {
        let raw: IndexMap<String, serde_json::Value> = serde_json::from_str(text)
            .map_err(|e| FixtureError::invalid_descriptor(format!("manifest is not a JSON object: {}", e)))?;

        let mut entries = IndexMap::with_capacity(raw.len());
        for (name, value) in raw {
            let value = match DataValue::from_json(value)? {
                DataValue::File(descriptor) => match &base_dir {
                    Some(base) => DataValue::File(descriptor.rebase(base)),
                    None => DataValue::File(descriptor),
                },
                literal => literal,
            };
            entries.insert(name, value);
        }

        Ok(Self { entries, base_dir })
    }

    pub fn get(&self, name: &str) -> FixtureResult<&DataValue> {
        self.entries.get(name).ok_or_else(|| FixtureError::UnknownData {
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }
}

/// Expected workflow outputs, keyed by output name.
///
/// Only listed outputs are checked; anything else the engine produces is
/// ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpectedOutputs {
    entries: IndexMap<String, DataValue>,
}

impl ExpectedOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the expectation for one output
    pub fn insert<K: Into<String>, V: Into<DataValue>>(&mut self, name: K, value: V) {
        self.entries.insert(name.into(), value.into());
    }

    pub fn with<K: Into<String>, V: Into<DataValue>>(mut self, name: K, value: V) -> Self {
        self.insert(name, value);
        self
    }

    /// Parse a JSON object of expected values
    pub fn from_json(value: serde_json::Value) -> FixtureResult<Self> {
        let serde_json::Value::Object(obj) = value else {
            return Err(FixtureError::invalid_descriptor(
                "expected outputs must be a JSON object",
            ));
        };
        let mut entries = IndexMap::with_capacity(obj.len());
        for (name, value) in obj {
            entries.insert(name, DataValue::from_json(value)?);
        }
        Ok(Self { entries })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
