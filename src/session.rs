//! Test session wiring
//!
//! A [`FixtureSession`] is created once per test binary. It owns the
//! configuration, the cache directory and the comparator registry, and hands
//! out resolvers, manifests and output checks that share them.

use crate::cache::CacheDirectory;
use crate::compare::{ComparatorRegistry, OutputComparator};
use crate::config::FixtureConfig;
use crate::descriptor::{ExpectedOutputs, Manifest};
use crate::engine::{strip_namespace, CromwellEngine, Engine};
use crate::error::{FixtureError, FixtureResult};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::fs_utils::{self, ScratchDir};
use crate::resolver::{DataResolver, TestData};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Files whose presence marks a project root
pub const PROJECT_ROOT_MARKERS: [&str; 4] = [".git", "Cargo.toml", "setup.py", "pyproject.toml"];

/// Location of the test data manifest relative to the project root
pub const DEFAULT_MANIFEST_PATH: &str = "tests/test_data.json";

const EXECUTION_DIR_PREFIX: &str = "wdl_run_";

/// Find the project root at or above `start`
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    fs_utils::find_upwards(start, &PROJECT_ROOT_MARKERS)
}

/// Find `tests/test_data.json` under the project root
pub fn find_manifest(project_root: &Path) -> FixtureResult<PathBuf> {
    let path = project_root.join(DEFAULT_MANIFEST_PATH);
    if path.is_file() {
        Ok(path)
    } else {
        Err(FixtureError::NotFound { path })
    }
}

/// Shared state for one test session
pub struct FixtureSession {
    config: FixtureConfig,
    project_root: PathBuf,
    resolver: DataResolver,
    registry: ComparatorRegistry,
}

impl FixtureSession {
    /// Session configured from the process environment, rooted at the
    /// project containing the current directory
    pub fn from_env() -> FixtureResult<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| FixtureError::io("Failed to get current directory", None, e))?;
        let project_root = find_project_root(&cwd).unwrap_or(cwd);
        let config = FixtureConfig::from_process_env(&project_root)?;
        Self::new(config, project_root)
    }

    /// Session using the HTTP fetcher
    pub fn new(config: FixtureConfig, project_root: impl Into<PathBuf>) -> FixtureResult<Self> {
        let fetcher = Arc::new(HttpFetcher::new(&config)?);
        Self::with_fetcher(config, project_root, fetcher)
    }

    /// Session with a caller-supplied fetcher
    pub fn with_fetcher(
        config: FixtureConfig,
        project_root: impl Into<PathBuf>,
        fetcher: Arc<dyn Fetcher>,
    ) -> FixtureResult<Self> {
        let project_root = project_root.into();
        let cache = Arc::new(CacheDirectory::open(config.cache_dir.as_deref())?);
        info!(
            cache = %cache.path().display(),
            persistent = cache.is_persistent(),
            "fixture session started"
        );
        let resolver = DataResolver::new(cache, fetcher).with_base_dir(&project_root);
        Ok(Self {
            config,
            project_root,
            resolver,
            registry: ComparatorRegistry::default(),
        })
    }

    pub fn config(&self) -> &FixtureConfig {
        &self.config
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn resolver(&self) -> &DataResolver {
        &self.resolver
    }

    pub fn cache_dir(&self) -> &Path {
        self.resolver.cache().path()
    }

    pub fn registry(&self) -> &ComparatorRegistry {
        &self.registry
    }

    /// Mutable access for registering extra comparison types
    pub fn registry_mut(&mut self) -> &mut ComparatorRegistry {
        &mut self.registry
    }

    /// Load a manifest; relative paths are taken from the project root
    pub fn test_data(&self, manifest_path: impl AsRef<Path>) -> FixtureResult<TestData> {
        let path = fs_utils::absolutize(manifest_path.as_ref(), &self.project_root);
        let manifest = Manifest::load(path)?;
        Ok(TestData::new(manifest, self.resolver.clone()))
    }

    /// Load the project's default manifest (`tests/test_data.json`)
    pub fn default_test_data(&self) -> FixtureResult<TestData> {
        self.test_data(find_manifest(&self.project_root)?)
    }

    pub fn comparator(&self) -> OutputComparator<'_> {
        OutputComparator::new(&self.resolver, &self.registry)
    }

    /// Check produced outputs against expectations
    pub fn check_outputs(
        &self,
        produced: &Map<String, Value>,
        expected: &ExpectedOutputs,
    ) -> FixtureResult<()> {
        self.comparator().check(produced, expected)
    }

    /// Cromwell configured from the session, with project imports
    pub fn cromwell(&self) -> FixtureResult<CromwellEngine> {
        CromwellEngine::for_project(self.config.engine.clone(), &self.project_root)
    }

    pub fn runner<'a>(&'a self, engine: &'a dyn Engine) -> WorkflowRunner<'a> {
        WorkflowRunner {
            session: self,
            engine,
        }
    }
}

/// Runs a workflow through an engine and checks its outputs
pub struct WorkflowRunner<'a> {
    session: &'a FixtureSession,
    engine: &'a dyn Engine,
}

impl<'a> WorkflowRunner<'a> {
    /// Run `workflow_name` from `wdl` and check the expected outputs.
    ///
    /// The engine runs in the configured execution directory, or in a
    /// temporary one that lives as long as the returned [`WorkflowRun`].
    pub fn run(
        &self,
        wdl: impl AsRef<Path>,
        workflow_name: &str,
        inputs: &Map<String, Value>,
        expected: &ExpectedOutputs,
    ) -> FixtureResult<WorkflowRun> {
        let wdl = fs_utils::absolutize(wdl.as_ref(), self.session.project_root());
        let execution_dir = ScratchDir::open(
            self.session.config.execution_dir.as_deref(),
            EXECUTION_DIR_PREFIX,
        )?;
        let produced = self
            .engine
            .run(&wdl, workflow_name, inputs, execution_dir.path())?;
        let outputs = strip_namespace(workflow_name, produced);
        self.session.check_outputs(&outputs, expected)?;
        Ok(WorkflowRun {
            outputs,
            execution_dir,
        })
    }
}

/// Outputs of a checked run. A temporary execution directory is removed when
/// this is dropped.
#[derive(Debug)]
pub struct WorkflowRun {
    /// Produced outputs without the workflow prefix
    pub outputs: Map<String, Value>,
    execution_dir: ScratchDir,
}

impl WorkflowRun {
    pub fn execution_dir(&self) -> &Path {
        self.execution_dir.path()
    }
}
