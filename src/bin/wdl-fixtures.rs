//! wdl-fixtures command line
//!
//! `fetch` pre-populates the cache with every file in a manifest.
//! `check` compares a workflow's outputs JSON against expected values.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::process;
use wdl_fixtures::{
    fs_utils, DataValue, ExpectedOutputs, FixtureError, FixtureResult, FixtureSession,
};

enum Command {
    Fetch {
        manifest: PathBuf,
    },
    Check {
        manifest: PathBuf,
        outputs: PathBuf,
        expected: PathBuf,
        workflow: Option<String>,
    },
}

fn print_help(program: &str) {
    eprintln!("Usage: {} <command> [options]", program);
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  fetch <manifest>                          Resolve every file entry into the cache");
    eprintln!("  check <manifest> <outputs> <expected>     Compare outputs JSON against expected JSON");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --workflow <name>    Strip `<name>.` from output keys (check only)");
    eprintln!("  -h, --help           Show this help message");
    eprintln!();
    eprintln!("Expected values may be literals, file descriptors, or \"@name\" references");
    eprintln!("to manifest entries. Set TEST_DATA_DIR to keep downloads between runs.");
}

fn parse_args() -> Command {
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("wdl-fixtures");

    let mut positional = Vec::new();
    let mut workflow = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help(program);
                process::exit(0);
            }
            "--workflow" => {
                i += 1;
                if i < args.len() {
                    workflow = Some(args[i].clone());
                } else {
                    eprintln!("Error: --workflow requires a value");
                    process::exit(1);
                }
            }
            arg if arg.starts_with('-') => {
                eprintln!("Error: Unknown option: {}", arg);
                process::exit(1);
            }
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    match positional.as_slice() {
        [cmd, manifest] if cmd == "fetch" => Command::Fetch {
            manifest: PathBuf::from(manifest),
        },
        [cmd, manifest, outputs, expected] if cmd == "check" => Command::Check {
            manifest: PathBuf::from(manifest),
            outputs: PathBuf::from(outputs),
            expected: PathBuf::from(expected),
            workflow,
        },
        _ => {
            print_help(program);
            process::exit(1);
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let command = parse_args();
    let result = FixtureSession::from_env().and_then(|session| match command {
        Command::Fetch { manifest } => fetch(&session, &manifest),
        Command::Check {
            manifest,
            outputs,
            expected,
            workflow,
        } => check(&session, &manifest, &outputs, &expected, workflow.as_deref()),
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn fetch(session: &FixtureSession, manifest: &Path) -> FixtureResult<()> {
    let data = session.test_data(manifest)?;
    for (name, resolved) in data.resolve_all()? {
        println!("{}\t{}", name, resolved.path.display());
    }
    eprintln!("Cache: {}", session.cache_dir().display());
    Ok(())
}

fn check(
    session: &FixtureSession,
    manifest: &Path,
    outputs: &Path,
    expected: &Path,
    workflow: Option<&str>,
) -> FixtureResult<()> {
    let data = session.test_data(manifest)?;
    let mut produced = read_object(outputs)?;
    if let Some(workflow) = workflow {
        produced = wdl_fixtures::engine::strip_namespace(workflow, produced);
    }

    let mut expectations = ExpectedOutputs::new();
    for (name, value) in read_object(expected)? {
        let value = match value.as_str().and_then(|s| s.strip_prefix('@')) {
            Some(reference) => data.expected(reference)?,
            None => DataValue::from_json(value)?,
        };
        expectations.insert(name, value);
    }

    session.check_outputs(&produced, &expectations)?;
    println!("{} output(s) matched", expectations.len());
    Ok(())
}

fn read_object(path: &Path) -> FixtureResult<Map<String, Value>> {
    let text = fs_utils::read_file_to_string(path)?;
    let manifest_error = |message: String| FixtureError::Manifest {
        path: path.to_path_buf(),
        message,
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(manifest_error("expected a JSON object".to_string())),
        Err(e) => Err(manifest_error(e.to_string())),
    }
}
