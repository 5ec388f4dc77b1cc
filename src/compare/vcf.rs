use super::{CompareOptions, Comparator, Comparison, MAX_DIFF_LINES};
use crate::error::FixtureResult;
use crate::fs_utils;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

/// Meta-information keys that change from run to run
static VOLATILE_META_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(filedate|source|.*commandline.*)$").expect("valid regex")
});

const STANDARD_COLUMNS: [&str; 8] = ["CHROM", "POS", "ID", "REF", "ALT", "QUAL", "FILTER", "INFO"];

/// Variant-call-format comparison.
///
/// Meta lines carrying run-specific metadata (`##fileDate`, `##source`, and
/// any `*CommandLine*` key) are skipped. Everything else - remaining meta
/// lines, the `#CHROM` header and the data records - must match in order.
#[derive(Debug, Clone, Default)]
pub struct VcfComparator {
    columns: Option<usize>,
    extra_ignored_keys: Vec<String>,
}

impl VcfComparator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only compare the first `n` columns of each record
    pub fn with_columns(mut self, n: usize) -> Self {
        self.columns = Some(n);
        self
    }

    /// Also skip meta lines with this key (case-insensitive)
    pub fn ignoring_meta_key<S: Into<String>>(mut self, key: S) -> Self {
        self.extra_ignored_keys.push(key.into().to_lowercase());
        self
    }

    fn is_ignored_meta(&self, key: &str) -> bool {
        VOLATILE_META_KEY.is_match(key)
            || self
                .extra_ignored_keys
                .iter()
                .any(|ignored| ignored == &key.to_lowercase())
    }

    fn parse(&self, text: &str) -> VcfDocument {
        let mut doc = VcfDocument::default();
        for line in text.lines().map(|l| l.trim_end_matches('\r')) {
            if line.is_empty() {
                continue;
            }
            if let Some(meta) = line.strip_prefix("##") {
                let key = meta.split('=').next().unwrap_or(meta);
                if !self.is_ignored_meta(key) {
                    doc.meta.push(line.to_string());
                }
            } else if let Some(header) = line.strip_prefix('#') {
                doc.columns = self.truncate(header.split('\t').map(str::to_string).collect());
            } else {
                doc.records
                    .push(self.truncate(line.split('\t').map(str::to_string).collect()));
            }
        }
        doc
    }

    fn truncate(&self, mut fields: Vec<String>) -> Vec<String> {
        if let Some(n) = self.columns {
            fields.truncate(n);
        }
        fields
    }
}

#[derive(Debug, Default)]
struct VcfDocument {
    meta: Vec<String>,
    columns: Vec<String>,
    records: Vec<Vec<String>>,
}

impl VcfDocument {
    fn column_name(&self, index: usize) -> String {
        self.columns
            .get(index)
            .cloned()
            .or_else(|| STANDARD_COLUMNS.get(index).map(|s| s.to_string()))
            .unwrap_or_else(|| format!("column {}", index + 1))
    }
}

fn locus(record: &[String]) -> String {
    match (record.first(), record.get(1)) {
        (Some(chrom), Some(pos)) => format!("{}:{}", chrom, pos),
        (Some(chrom), None) => chrom.clone(),
        _ => "?".to_string(),
    }
}

fn describe_record(index: usize, expected: &[String], actual: &[String], doc: &VcfDocument) -> String {
    let differing: Vec<String> = (0..expected.len().max(actual.len()))
        .filter(|&i| expected.get(i) != actual.get(i))
        .map(|i| {
            format!(
                "{} expected `{}`, got `{}`",
                doc.column_name(i),
                expected.get(i).map(String::as_str).unwrap_or(""),
                actual.get(i).map(String::as_str).unwrap_or("")
            )
        })
        .collect();
    format!(
        "record {} ({}): {}",
        index + 1,
        locus(expected),
        differing.join("; ")
    )
}

/// Meta lines present more often in one file than the other, then an order
/// note if the counts agree but the sequence does not
fn meta_differences(expected: &[String], actual: &[String]) -> Vec<String> {
    if expected == actual {
        return Vec::new();
    }

    let mut balance: HashMap<&str, i64> = HashMap::new();
    for line in expected {
        *balance.entry(line.as_str()).or_default() += 1;
    }
    for line in actual {
        *balance.entry(line.as_str()).or_default() -= 1;
    }

    let mut differences = Vec::new();
    for line in expected {
        if let Some(count) = balance.get_mut(line.as_str()) {
            if *count > 0 {
                *count -= 1;
                differences.push(format!("meta line missing: {}", line));
            }
        }
    }
    for line in actual {
        if let Some(count) = balance.get_mut(line.as_str()) {
            if *count < 0 {
                *count += 1;
                differences.push(format!("unexpected meta line: {}", line));
            }
        }
    }
    if differences.is_empty() {
        differences.push("meta lines are in a different order".to_string());
    }
    differences
}

impl Comparator for VcfComparator {
    fn compare(
        &self,
        expected: &Path,
        actual: &Path,
        options: &CompareOptions,
    ) -> FixtureResult<Comparison> {
        let expected_bytes = fs_utils::read_file_decompressed(expected)?;
        let actual_bytes = fs_utils::read_file_decompressed(actual)?;
        let expected_doc = self.parse(&String::from_utf8_lossy(&expected_bytes));
        let actual_doc = self.parse(&String::from_utf8_lossy(&actual_bytes));

        let mut differences = Vec::new();

        differences.extend(meta_differences(&expected_doc.meta, &actual_doc.meta));

        if expected_doc.columns != actual_doc.columns {
            differences.push(format!(
                "header differs: expected `#{}`, got `#{}`",
                expected_doc.columns.join("\t"),
                actual_doc.columns.join("\t")
            ));
        }

        for (index, (e, a)) in expected_doc
            .records
            .iter()
            .zip(actual_doc.records.iter())
            .enumerate()
        {
            if e != a {
                differences.push(describe_record(index, e, a, &expected_doc));
            }
        }

        let (expected_count, actual_count) =
            (expected_doc.records.len(), actual_doc.records.len());
        if expected_count != actual_count {
            let shared = expected_count.min(actual_count);
            let (longer, label) = if expected_count > actual_count {
                (&expected_doc.records, "missing")
            } else {
                (&actual_doc.records, "unexpected")
            };
            for (offset, record) in longer[shared..].iter().enumerate() {
                differences.push(format!(
                    "{} record {} ({})",
                    label,
                    shared + offset + 1,
                    locus(record)
                ));
            }
        }

        if differences.is_empty()
            || (options.allowed_diff_lines > 0 && differences.len() <= options.allowed_diff_lines)
        {
            return Ok(Comparison::Match);
        }

        let total = differences.len();
        let mut detail = format!(
            "{} VCF difference(s) between {} and {} (expected {} records, got {})",
            total,
            expected.display(),
            actual.display(),
            expected_count,
            actual_count
        );
        for difference in differences.iter().take(MAX_DIFF_LINES) {
            detail.push('\n');
            detail.push_str(difference);
        }
        if total > MAX_DIFF_LINES {
            detail.push_str(&format!("\n... and {} more", total - MAX_DIFF_LINES));
        }
        Ok(Comparison::Mismatch(detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const VCF: &str = "##fileformat=VCFv4.2\n\
##fileDate=20240101\n\
##source=HaplotypeCaller\n\
##GATKCommandLine=<ID=HaplotypeCaller,CommandLine=\"run --input a.bam\">\n\
##contig=<ID=chr1,length=248956422>\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
chr1\t100\t.\tA\tG\t50\tPASS\tDP=10\n\
chr1\t200\trs1\tC\tT\t60\tPASS\tDP=12\n";

    fn compare_with(comparator: &VcfComparator, expected: &str, actual: &str, allowed: usize) -> Comparison {
        let dir = TempDir::new().unwrap();
        let expected_path = dir.path().join("expected.vcf");
        let actual_path = dir.path().join("actual.vcf");
        fs::write(&expected_path, expected).unwrap();
        fs::write(&actual_path, actual).unwrap();
        comparator
            .compare(
                &expected_path,
                &actual_path,
                &CompareOptions {
                    allowed_diff_lines: allowed,
                },
            )
            .unwrap()
    }

    fn compare(expected: &str, actual: &str) -> Comparison {
        compare_with(&VcfComparator::new(), expected, actual, 0)
    }

    #[test]
    fn test_volatile_meta_lines_are_ignored() {
        let actual = VCF
            .replace("20240101", "20261017")
            .replace("##source=HaplotypeCaller", "##source=HaplotypeCaller 4.5")
            .replace("run --input a.bam", "run --input /tmp/x/a.bam");
        assert!(compare(VCF, &actual).is_match());
    }

    #[test]
    fn test_other_meta_lines_are_compared() {
        let actual = VCF.replace("length=248956422", "length=1");
        match compare(VCF, &actual) {
            Comparison::Mismatch(detail) => {
                assert!(detail.contains("meta line missing: ##contig=<ID=chr1,length=248956422>"));
                assert!(detail.contains("unexpected meta line: ##contig=<ID=chr1,length=1>"));
            }
            Comparison::Match => panic!("Expected mismatch"),
        }
    }

    #[test]
    fn test_duplicated_meta_line_is_named() {
        let contig = "##contig=<ID=chr1,length=248956422>\n";
        let actual = VCF.replace(contig, &format!("{}{}", contig, contig));
        match compare(VCF, &actual) {
            Comparison::Mismatch(detail) => {
                assert!(
                    detail.contains("unexpected meta line: ##contig=<ID=chr1,length=248956422>"),
                    "{}",
                    detail
                );
                assert!(!detail.contains("different order"), "{}", detail);
            }
            Comparison::Match => panic!("Expected mismatch"),
        }

        let mut lines: Vec<&str> = VCF.lines().collect();
        lines.swap(0, 4);
        let reordered = lines.join("\n");
        match compare(VCF, &reordered) {
            Comparison::Mismatch(detail) => {
                assert!(detail.contains("meta lines are in a different order"), "{}", detail)
            }
            Comparison::Match => panic!("Expected mismatch"),
        }
    }

    #[test]
    fn test_record_difference_names_field() {
        let actual = VCF.replace("rs1\tC\tT\t60", "rs1\tC\tT\t61");
        match compare(VCF, &actual) {
            Comparison::Mismatch(detail) => {
                assert!(
                    detail.contains("record 2 (chr1:200): QUAL expected `60`, got `61`"),
                    "{}",
                    detail
                );
            }
            Comparison::Match => panic!("Expected mismatch"),
        }
    }

    #[test]
    fn test_record_order_matters() {
        let mut lines: Vec<&str> = VCF.lines().collect();
        let len = lines.len();
        lines.swap(len - 1, len - 2);
        let swapped = lines.join("\n");
        assert!(!compare(VCF, &swapped).is_match());
    }

    #[test]
    fn test_missing_records_are_reported() {
        let truncated: String = VCF.lines().take(7).map(|l| format!("{}\n", l)).collect();
        match compare(VCF, &truncated) {
            Comparison::Mismatch(detail) => {
                assert!(detail.contains("missing record 2 (chr1:200)"), "{}", detail);
                assert!(detail.contains("expected 2 records, got 1"));
            }
            Comparison::Match => panic!("Expected mismatch"),
        }
    }

    #[test]
    fn test_column_limit() {
        let actual = VCF.replace("DP=12", "DP=99").replace("\t60\t", "\t1\t");
        let comparator = VcfComparator::new().with_columns(5);
        assert!(compare_with(&comparator, VCF, &actual, 0).is_match());
        assert!(!compare(VCF, &actual).is_match());
    }

    #[test]
    fn test_allowed_diff_lines_and_extra_ignored_keys() {
        let actual = VCF
            .replace("##contig=<ID=chr1,length=248956422>", "##contig=<ID=chr1,length=7>")
            .replace("DP=10", "DP=11");
        let comparator = VcfComparator::new().ignoring_meta_key("CONTIG");
        assert!(!compare_with(&comparator, VCF, &actual, 0).is_match());
        assert!(compare_with(&comparator, VCF, &actual, 1).is_match());
    }

    #[test]
    fn test_gzipped_vcf_ignores_file_date() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let dir = TempDir::new().unwrap();
        let gzip = |name: &str, text: &str| {
            let path = dir.path().join(name);
            let mut encoder = GzEncoder::new(fs::File::create(&path).unwrap(), Compression::default());
            encoder.write_all(text.as_bytes()).unwrap();
            encoder.finish().unwrap();
            path
        };
        let expected = gzip("expected.vcf.gz", VCF);
        let actual = gzip("actual.vcf.gz", &VCF.replace("20240101", "20261017"));
        let plain_actual = dir.path().join("actual.vcf");
        fs::write(&plain_actual, VCF.replace("20240101", "20261017")).unwrap();

        let options = CompareOptions::default();
        let comparator = VcfComparator::new();
        assert!(comparator.compare(&expected, &actual, &options).unwrap().is_match());
        assert!(comparator.compare(&expected, &plain_actual, &options).unwrap().is_match());
    }

    #[test]
    fn test_crlf_line_endings() {
        let actual = VCF.replace('\n', "\r\n");
        assert!(compare(VCF, &actual).is_match());
    }
}
