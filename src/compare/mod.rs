//! Output Comparator
//!
//! Checks engine outputs against [`ExpectedOutputs`]. Literal expectations are
//! compared as JSON values; file expectations are resolved through the
//! [`DataResolver`] and compared with the [`Comparator`] registered for the
//! descriptor's `type`.

mod exact;
mod vcf;

pub use exact::ExactComparator;
pub use vcf::VcfComparator;

use crate::descriptor::{DataDescriptor, DataValue, ExpectedOutputs};
use crate::error::{FixtureError, FixtureResult, MismatchReport};
use crate::fs_utils;
use crate::resolver::DataResolver;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Registry name of the byte-equality comparator
pub const DEFAULT_TYPE: &str = "default";
/// Registry name of the variant-call-format comparator
pub const VCF_TYPE: &str = "vcf";

/// Maximum number of diff lines included in a mismatch description
pub(crate) const MAX_DIFF_LINES: usize = 20;

/// Per-comparison options taken from the expected descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompareOptions {
    /// Differing lines tolerated before the files count as different
    pub allowed_diff_lines: usize,
}

impl CompareOptions {
    pub fn from_descriptor(descriptor: &DataDescriptor) -> Self {
        Self {
            allowed_diff_lines: descriptor.allowed_diff_lines,
        }
    }
}

/// Outcome of comparing two files
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Comparison {
    Match,
    /// Files differ; carries a human-readable description
    Mismatch(String),
}

impl Comparison {
    pub fn is_match(&self) -> bool {
        matches!(self, Comparison::Match)
    }
}

/// A file comparison strategy.
///
/// I/O problems are reported as errors; a difference in content is a
/// [`Comparison::Mismatch`].
pub trait Comparator: Send + Sync {
    fn compare(
        &self,
        expected: &Path,
        actual: &Path,
        options: &CompareOptions,
    ) -> FixtureResult<Comparison>;
}

/// Named comparison strategies
#[derive(Clone)]
pub struct ComparatorRegistry {
    comparators: HashMap<String, Arc<dyn Comparator>>,
}

impl ComparatorRegistry {
    /// Registry with no strategies at all
    pub fn empty() -> Self {
        Self {
            comparators: HashMap::new(),
        }
    }

    /// Register (or replace) the strategy for a data type
    pub fn register<S, C>(&mut self, name: S, comparator: C)
    where
        S: Into<String>,
        C: Comparator + 'static,
    {
        self.comparators.insert(name.into(), Arc::new(comparator));
    }

    pub fn with<S, C>(mut self, name: S, comparator: C) -> Self
    where
        S: Into<String>,
        C: Comparator + 'static,
    {
        self.register(name, comparator);
        self
    }

    pub fn get(&self, name: &str) -> FixtureResult<&dyn Comparator> {
        self.comparators
            .get(name)
            .map(|c| c.as_ref())
            .ok_or_else(|| FixtureError::UnknownDataType {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.comparators.contains_key(name)
    }
}

impl Default for ComparatorRegistry {
    fn default() -> Self {
        Self::empty()
            .with(DEFAULT_TYPE, ExactComparator)
            .with(VCF_TYPE, VcfComparator::new())
    }
}

/// Checks produced outputs against expectations
pub struct OutputComparator<'a> {
    resolver: &'a DataResolver,
    registry: &'a ComparatorRegistry,
}

impl<'a> OutputComparator<'a> {
    pub fn new(resolver: &'a DataResolver, registry: &'a ComparatorRegistry) -> Self {
        Self { resolver, registry }
    }

    /// Check every expected output.
    ///
    /// Missing outputs are reported first, all together, before anything is
    /// resolved. Otherwise every expected output is compared and all
    /// mismatches are returned in one [`FixtureError::Mismatch`]. Produced
    /// outputs without an expectation are ignored.
    pub fn check(
        &self,
        produced: &serde_json::Map<String, serde_json::Value>,
        expected: &ExpectedOutputs,
    ) -> FixtureResult<()> {
        let missing: Vec<String> = expected
            .iter()
            .filter(|(name, _)| !produced.contains_key(*name))
            .map(|(name, _)| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(FixtureError::MissingOutput { names: missing });
        }

        let mut report = MismatchReport::new();
        for (name, expected_value) in expected.iter() {
            let actual = &produced[name];
            let outcome = match expected_value {
                DataValue::Literal(value) => compare_literal(value, actual),
                DataValue::File(descriptor) => self.compare_file(descriptor, actual)?,
            };
            match outcome {
                Comparison::Match => debug!(output = name, "output matches"),
                Comparison::Mismatch(detail) => {
                    debug!(output = name, "output mismatch");
                    report.push(name, detail);
                }
            }
        }
        report.into_result()
    }

    fn compare_file(
        &self,
        descriptor: &DataDescriptor,
        actual: &serde_json::Value,
    ) -> FixtureResult<Comparison> {
        let comparator = self.registry.get(descriptor.comparison_type())?;

        let actual_path = match actual.as_str().and_then(fs_utils::local_path_from_output) {
            Some(path) => path,
            None => {
                return Ok(Comparison::Mismatch(format!(
                    "expected a file, got {}",
                    actual
                )))
            }
        };
        if !actual_path.is_file() {
            return Ok(Comparison::Mismatch(format!(
                "output file {} does not exist",
                actual_path.display()
            )));
        }

        let expected_file = self.resolver.resolve(descriptor)?;
        comparator.compare(
            expected_file.path(),
            &actual_path,
            &CompareOptions::from_descriptor(descriptor),
        )
    }
}

fn compare_literal(expected: &serde_json::Value, actual: &serde_json::Value) -> Comparison {
    if expected == actual {
        Comparison::Match
    } else {
        Comparison::Mismatch(format!("expected {}, got {}", expected, actual))
    }
}

/// Count differing lines between two texts. Each run of changes counts as
/// many lines as its longer side, like a side-by-side diff.
pub(crate) fn count_changed_lines(diffs: &[difference::Difference]) -> usize {
    use difference::Difference;

    let mut total = 0;
    let (mut removed, mut added) = (0, 0);
    for diff in diffs {
        match diff {
            Difference::Same(_) => {
                total += removed.max(added);
                removed = 0;
                added = 0;
            }
            Difference::Rem(text) => removed += text.split('\n').count(),
            Difference::Add(text) => added += text.split('\n').count(),
        }
    }
    total + removed.max(added)
}

/// Render a bounded line diff (`-` expected, `+` actual)
pub(crate) fn render_diff(diffs: &[difference::Difference]) -> String {
    use difference::Difference;

    let mut lines = Vec::new();
    let mut truncated = false;
    'outer: for diff in diffs {
        let (prefix, text) = match diff {
            Difference::Same(_) => continue,
            Difference::Rem(text) => ('-', text),
            Difference::Add(text) => ('+', text),
        };
        for line in text.lines() {
            if lines.len() == MAX_DIFF_LINES {
                truncated = true;
                break 'outer;
            }
            lines.push(format!("{}{}", prefix, line));
        }
    }
    if truncated {
        lines.push("...".to_string());
    }
    lines.join("\n")
}
