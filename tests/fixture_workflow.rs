//! End-to-end checks: manifest -> inputs -> engine -> output comparison

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use wdl_fixtures::{
    DataDescriptor, DataValue, Engine, ExpectedOutputs, Fetcher, FixtureConfig, FixtureError,
    FixtureResult, FixtureSession,
};

const REFERENCE_URL: &str = "https://data.example.org/ref/expected.vcf";

const EXPECTED_VCF: &str = "##fileformat=VCFv4.2\n\
##fileDate=20240101\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
chr1\t100\t.\tA\tG\t50\tPASS\tDP=10\n";

/// Serves fixed bodies and counts requests
struct MapFetcher {
    bodies: HashMap<String, String>,
    calls: AtomicUsize,
}

impl MapFetcher {
    fn new() -> Self {
        let mut bodies = HashMap::new();
        bodies.insert(REFERENCE_URL.to_string(), EXPECTED_VCF.to_string());
        Self {
            bodies,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Fetcher for MapFetcher {
    fn fetch(&self, url: &str, dest: &mut dyn Write) -> FixtureResult<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let body = self
            .bodies
            .get(url)
            .ok_or_else(|| FixtureError::fetch(url, "404 Not Found", Some(404)))?;
        dest.write_all(body.as_bytes())
            .map_err(|e| FixtureError::io("write failed", None, e))?;
        Ok(body.len() as u64)
    }
}

/// Uppercases its `in_txt` input and writes a VCF with today's date
struct FakeEngine {
    qual: &'static str,
}

impl Engine for FakeEngine {
    fn run(
        &self,
        _wdl: &Path,
        workflow_name: &str,
        inputs: &Map<String, Value>,
        execution_dir: &Path,
    ) -> FixtureResult<Map<String, Value>> {
        let input = inputs["in_txt"].as_str().unwrap_or_default();
        let text = fs::read_to_string(input).unwrap_or_default();

        let out_txt = execution_dir.join("out.txt");
        fs::write(&out_txt, text.to_uppercase()).unwrap();
        let out_vcf = execution_dir.join("out.vcf");
        let vcf = EXPECTED_VCF
            .replace("20240101", "20261017")
            .replace("\t50\t", &format!("\t{}\t", self.qual));
        fs::write(&out_vcf, vcf).unwrap();

        let mut outputs = Map::new();
        outputs.insert(
            format!("{}.out_txt", workflow_name),
            json!(out_txt.to_string_lossy()),
        );
        outputs.insert(
            format!("{}.out_vcf", workflow_name),
            json!(format!("file://{}", out_vcf.display())),
        );
        outputs.insert(format!("{}.count", workflow_name), json!(2));
        Ok(outputs)
    }
}

struct Project {
    root: TempDir,
    session: FixtureSession,
    fetcher: Arc<MapFetcher>,
}

fn project() -> Project {
    let root = TempDir::new().unwrap();
    fs::create_dir_all(root.path().join("tests/data")).unwrap();
    fs::write(root.path().join("tests/data/in.txt"), "hello\nworld\n").unwrap();
    fs::write(
        root.path().join("tests/test_data.json"),
        json!({
            "in_txt": {"path": "data/in.txt"},
            "greeting": {"contents": "HELLO\nWORLD\n", "name": "expected.txt"},
            "calls": {"url": REFERENCE_URL, "type": "vcf"},
            "count": 2
        })
        .to_string(),
    )
    .unwrap();

    let fetcher = Arc::new(MapFetcher::new());
    let config = FixtureConfig::default().with_cache_dir(root.path().join("cache"));
    let session = FixtureSession::with_fetcher(config, root.path(), fetcher.clone()).unwrap();
    Project {
        root,
        session,
        fetcher,
    }
}

fn expectations(project: &Project) -> ExpectedOutputs {
    let data = project.session.default_test_data().unwrap();
    ExpectedOutputs::new()
        .with("out_txt", data.expected("greeting").unwrap())
        .with("out_vcf", data.expected("calls").unwrap())
        .with("count", data.expected("count").unwrap())
}

fn inputs(project: &Project) -> Map<String, Value> {
    let data = project.session.default_test_data().unwrap();
    let mut inputs = Map::new();
    inputs.insert("in_txt".to_string(), data.input("in_txt").unwrap());
    inputs
}

#[test]
fn test_workflow_outputs_match() {
    let project = project();
    let engine = FakeEngine { qual: "50" };

    let run = project
        .session
        .runner(&engine)
        .run(
            "wf.wdl",
            "cat_file",
            &inputs(&project),
            &expectations(&project),
        )
        .unwrap();

    assert!(run.outputs.contains_key("out_txt"));
    assert!(run.execution_dir().join("out.vcf").is_file());
    assert_eq!(project.fetcher.calls.load(Ordering::SeqCst), 1);
    assert!(project.root.path().join("cache/url").is_dir());
    assert!(project.root.path().join("cache/contents").is_dir());
}

#[test]
fn test_persistent_cache_reused_across_sessions() {
    let first = project();
    let data = first.session.default_test_data().unwrap();
    let downloaded = data.file("calls").unwrap();

    let fetcher = Arc::new(MapFetcher::new());
    let config = FixtureConfig::default().with_cache_dir(first.root.path().join("cache"));
    let second =
        FixtureSession::with_fetcher(config, first.root.path(), fetcher.clone()).unwrap();
    let again = second.default_test_data().unwrap().file("calls").unwrap();

    assert_eq!(downloaded.path, again.path);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_all_mismatches_reported() {
    let project = project();
    let engine = FakeEngine { qual: "51" };
    let expected = expectations(&project).with("count", DataValue::literal(3));

    let err = project
        .session
        .runner(&engine)
        .run("wf.wdl", "cat_file", &inputs(&project), &expected)
        .unwrap_err();

    match err {
        FixtureError::Mismatch(report) => {
            assert_eq!(report.names(), vec!["out_vcf", "count"]);
            let message = report.to_string();
            assert!(message.contains("QUAL expected `50`, got `51`"), "{}", message);
            assert!(message.contains("expected 3, got 2"), "{}", message);
        }
        other => panic!("Expected mismatch, got {:?}", other),
    }
}

#[test]
fn test_missing_output_reported_before_comparison() {
    let project = project();
    let engine = FakeEngine { qual: "51" };
    let expected = expectations(&project)
        .with("summary", DataDescriptor::from_contents("x"))
        .with("log", DataValue::literal("ok"));

    let err = project
        .session
        .runner(&engine)
        .run("wf.wdl", "cat_file", &inputs(&project), &expected)
        .unwrap_err();

    match err {
        FixtureError::MissingOutput { names } => assert_eq!(names, vec!["summary", "log"]),
        other => panic!("Expected missing output, got {:?}", other),
    }
    assert_eq!(project.fetcher.calls.load(Ordering::SeqCst), 0);
}
