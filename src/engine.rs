//! Workflow engine boundary
//!
//! The fixture library never executes WDL itself. An [`Engine`] takes a
//! workflow file, the workflow name, JSON inputs and a directory to run in,
//! and returns the JSON outputs. [`CromwellEngine`] drives a Cromwell JAR in
//! `run` mode.

use crate::config::EngineConfig;
use crate::error::{FixtureError, FixtureResult, IntoFixtureError};
use crate::fs_utils;
use crate::imports::{self, ImportsZip};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Runs a workflow and reports its outputs.
pub trait Engine {
    /// Execute `workflow_name` from `wdl` with the given inputs.
    ///
    /// Input keys are unqualified (`"in_txt"`); output keys may be qualified
    /// with the workflow name (`"cat_file.out_txt"`). Anything the engine
    /// writes goes under `execution_dir`.
    fn run(
        &self,
        wdl: &Path,
        workflow_name: &str,
        inputs: &Map<String, Value>,
        execution_dir: &Path,
    ) -> FixtureResult<Map<String, Value>>;
}

/// Engine that shells out to `java -jar cromwell.jar run`.
#[derive(Debug, Clone)]
pub struct CromwellEngine {
    config: EngineConfig,
    project_root: PathBuf,
    import_dirs: Vec<PathBuf>,
}

impl CromwellEngine {
    pub fn new(config: EngineConfig, project_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            project_root: project_root.into(),
            import_dirs: Vec::new(),
        }
    }

    /// Engine for a project, with imports from `tests/import_paths.txt` when
    /// that file exists
    pub fn for_project(config: EngineConfig, project_root: &Path) -> FixtureResult<Self> {
        let engine = Self::new(config, project_root);
        match imports::find_import_paths_file(project_root) {
            Some(list) => {
                let dirs = imports::read_import_dirs(&list, project_root)?;
                Ok(engine.with_import_dirs(dirs))
            }
            None => Ok(engine),
        }
    }

    /// Directories whose `*.wdl` files are zipped and passed with `-p`
    pub fn with_import_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.import_dirs = dirs;
        self
    }

    pub fn import_dirs(&self) -> &[PathBuf] {
        &self.import_dirs
    }

    fn build_command(
        &self,
        wdl: &Path,
        inputs_file: &Path,
        imports_zip: Option<&Path>,
        execution_dir: &Path,
    ) -> Command {
        let mut cmd = Command::new(&self.config.java_bin);
        cmd.arg("-Ddocker.hash-lookup.enabled=false")
            .args(&self.config.java_args)
            .arg("-jar")
            .arg(&self.config.jar)
            .arg("run")
            .args(&self.config.engine_args)
            .arg("-i")
            .arg(inputs_file);
        if let Some(imports) = imports_zip {
            cmd.arg("-p").arg(imports);
        }
        cmd.arg(wdl).current_dir(execution_dir);
        cmd
    }
}

impl Engine for CromwellEngine {
    fn run(
        &self,
        wdl: &Path,
        workflow_name: &str,
        inputs: &Map<String, Value>,
        execution_dir: &Path,
    ) -> FixtureResult<Map<String, Value>> {
        let wdl_path = fs_utils::absolutize(wdl, &self.project_root);
        if !wdl_path.is_file() {
            return Err(FixtureError::NotFound { path: wdl_path });
        }
        let imports_zip = ImportsZip::build(&self.import_dirs)?;

        let namespaced = namespace_inputs(workflow_name, inputs);
        let mut inputs_file = tempfile::Builder::new()
            .prefix("inputs_")
            .suffix(".json")
            .tempfile_in(execution_dir)
            .fixture_context_with_path("Failed to create inputs file", execution_dir)?;
        let serialized = serde_json::to_vec_pretty(&Value::Object(namespaced))
            .map_err(|e| FixtureError::invalid_descriptor(format!("Unserializable inputs: {}", e)))?;
        inputs_file
            .write_all(&serialized)
            .fixture_context_with_path("Failed to write inputs file", inputs_file.path())?;

        let mut cmd = self.build_command(
            &wdl_path,
            inputs_file.path(),
            imports_zip.as_ref().map(ImportsZip::path),
            execution_dir,
        );
        info!(
            workflow = workflow_name,
            wdl = %wdl_path.display(),
            execution_dir = %execution_dir.display(),
            "running workflow engine"
        );
        debug!(command = ?cmd, "engine command");

        let output = cmd.output().map_err(|e| {
            FixtureError::engine(
                format!(
                    "Failed to launch {}: {}",
                    self.config.java_bin.display(),
                    e
                ),
                String::new(),
                String::new(),
            )
        })?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(FixtureError::engine(
                format!("Cromwell command failed ({})", output.status),
                stdout,
                stderr,
            ));
        }

        parse_cromwell_outputs(&stdout).ok_or_else(|| {
            FixtureError::engine("No outputs JSON found in Cromwell stdout", stdout.clone(), stderr)
        })
    }
}

/// Qualify input keys with the workflow name, leaving qualified keys alone
pub fn namespace_inputs(workflow_name: &str, inputs: &Map<String, Value>) -> Map<String, Value> {
    let prefix = format!("{}.", workflow_name);
    inputs
        .iter()
        .map(|(key, value)| {
            let key = if key.starts_with(&prefix) {
                key.clone()
            } else {
                format!("{}{}", prefix, key)
            };
            (key, value.clone())
        })
        .collect()
}

/// Strip the `workflow.` prefix from output keys
pub fn strip_namespace(workflow_name: &str, outputs: Map<String, Value>) -> Map<String, Value> {
    let prefix = format!("{}.", workflow_name);
    outputs
        .into_iter()
        .map(|(key, value)| match key.strip_prefix(&prefix) {
            Some(stripped) => (stripped.to_string(), value),
            None => (key, value),
        })
        .collect()
}

/// Extract the `"outputs"` object from Cromwell's `run` stdout.
///
/// Cromwell prints the final result as a pretty-printed JSON object starting
/// with a bare `{` line followed by an `"outputs":` line.
pub fn parse_cromwell_outputs(stdout: &str) -> Option<Map<String, Value>> {
    let lines: Vec<&str> = stdout.lines().collect();
    let start = lines.iter().enumerate().position(|(i, line)| {
        *line == "{"
            && lines
                .get(i + 1)
                .map(|next| next.trim_start().starts_with("\"outputs\":"))
                .unwrap_or(false)
    })?;
    let end = start + lines[start..].iter().position(|line| *line == "}")?;

    let block = lines[start..=end].join("\n");
    let parsed: Value = serde_json::from_str(&block).ok()?;
    match parsed.get("outputs")? {
        Value::Object(outputs) => Some(outputs.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_cromwell_outputs() {
        let stdout = r#"[2024-01-01 00:00:00,00] [info] SingleWorkflowRunnerActor workflow finished with status 'Succeeded'.
{
  "outputs": {
    "cat_file.out_txt": "/cromwell-executions/cat_file/abc/call-cat/execution/out.txt",
    "cat_file.count": 3
  },
  "id": "0c5c3d7c-8b8c-4a5b-9f4f-6f0b3b9c2a11"
}
[2024-01-01 00:00:01,00] [info] Shutting down"#;

        let outputs = parse_cromwell_outputs(stdout).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs["cat_file.count"], json!(3));
    }

    #[test]
    fn test_parse_cromwell_outputs_without_block() {
        assert!(parse_cromwell_outputs("[info] nothing to see\n{\n  \"id\": 1\n}").is_none());
        assert!(parse_cromwell_outputs("").is_none());
    }

    #[test]
    fn test_namespace_round_trip() {
        let inputs = json!({"in_txt": "/data/in.txt", "wf.n": 2});
        let namespaced = namespace_inputs("wf", inputs.as_object().unwrap());
        assert!(namespaced.contains_key("wf.in_txt"));
        assert!(namespaced.contains_key("wf.n"));

        let stripped = strip_namespace("wf", namespaced);
        assert!(stripped.contains_key("in_txt"));
        assert!(stripped.contains_key("n"));

        let other = json!({"other.x": 1});
        let kept = strip_namespace("wf", other.as_object().unwrap().clone());
        assert!(kept.contains_key("other.x"));
    }

    #[test]
    fn test_for_project_reads_import_paths() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("tests")).unwrap();
        std::fs::create_dir_all(dir.path().join("tasks")).unwrap();
        std::fs::write(dir.path().join("tests/import_paths.txt"), "tasks\n").unwrap();

        let engine = CromwellEngine::for_project(EngineConfig::default(), dir.path()).unwrap();
        assert_eq!(engine.import_dirs(), &[dir.path().join("tasks")]);

        let bare = tempfile::TempDir::new().unwrap();
        let engine = CromwellEngine::for_project(EngineConfig::default(), bare.path()).unwrap();
        assert!(engine.import_dirs().is_empty());
    }

    #[test]
    fn test_missing_wdl_is_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = CromwellEngine::new(EngineConfig::default(), dir.path());
        let result = engine.run(Path::new("missing.wdl"), "wf", &Map::new(), dir.path());
        assert!(matches!(result, Err(FixtureError::NotFound { .. })));
    }

    #[test]
    fn test_command_line() {
        let config = EngineConfig {
            java_bin: PathBuf::from("/opt/java/bin/java"),
            jar: PathBuf::from("/opt/cromwell.jar"),
            java_args: vec!["-Xmx1g".to_string()],
            engine_args: vec!["--type".to_string(), "WDL".to_string()],
        };
        let engine = CromwellEngine::new(config, "/project");
        let cmd = engine.build_command(
            Path::new("/project/wf.wdl"),
            Path::new("/tmp/in.json"),
            Some(Path::new("/tmp/imports.zip")),
            Path::new("/scratch/run1"),
        );

        assert_eq!(cmd.get_program(), "/opt/java/bin/java");
        assert_eq!(cmd.get_current_dir(), Some(Path::new("/scratch/run1")));
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "-Ddocker.hash-lookup.enabled=false",
                "-Xmx1g",
                "-jar",
                "/opt/cromwell.jar",
                "run",
                "--type",
                "WDL",
                "-i",
                "/tmp/in.json",
                "-p",
                "/tmp/imports.zip",
                "/project/wf.wdl",
            ]
        );
    }
}
