use super::{count_changed_lines, render_diff, CompareOptions, Comparator, Comparison};
use crate::error::FixtureResult;
use crate::fs_utils;
use difference::Changeset;
use std::path::Path;

/// Byte-for-byte comparison of the (decompressed, for `.gz`) contents.
///
/// With `allowed_diff_lines > 0`, text files may differ in up to that many
/// lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactComparator;

impl Comparator for ExactComparator {
    fn compare(
        &self,
        expected: &Path,
        actual: &Path,
        options: &CompareOptions,
    ) -> FixtureResult<Comparison> {
        let expected_bytes = fs_utils::read_file_decompressed(expected)?;
        let actual_bytes = fs_utils::read_file_decompressed(actual)?;
        if expected_bytes == actual_bytes {
            return Ok(Comparison::Match);
        }

        let (expected_text, actual_text) = match (
            std::str::from_utf8(&expected_bytes),
            std::str::from_utf8(&actual_bytes),
        ) {
            (Ok(e), Ok(a)) => (e, a),
            _ => return Ok(Comparison::Mismatch(describe_binary(&expected_bytes, &actual_bytes))),
        };

        let changes = Changeset::new(expected_text, actual_text, "\n");
        let changed = count_changed_lines(&changes.diffs);
        if options.allowed_diff_lines > 0 && changed <= options.allowed_diff_lines {
            return Ok(Comparison::Match);
        }

        let summary = if options.allowed_diff_lines > 0 {
            format!(
                "{} line(s) differ ({} allowed) between {} and {}",
                changed,
                options.allowed_diff_lines,
                expected.display(),
                actual.display()
            )
        } else {
            format!(
                "{} line(s) differ between {} and {}",
                changed,
                expected.display(),
                actual.display()
            )
        };
        Ok(Comparison::Mismatch(format!(
            "{}\n{}",
            summary,
            render_diff(&changes.diffs)
        )))
    }
}

fn describe_binary(expected: &[u8], actual: &[u8]) -> String {
    let offset = expected
        .iter()
        .zip(actual.iter())
        .position(|(a, b)| a != b)
        .unwrap_or_else(|| expected.len().min(actual.len()));
    format!(
        "binary contents differ at byte {} (expected {} bytes, got {} bytes)",
        offset,
        expected.len(),
        actual.len()
    )
}
