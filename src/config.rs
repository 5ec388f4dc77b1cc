//! Session configuration
//!
//! All environment-driven settings (cache directory override, HTTP header and
//! proxy variables, engine location) are gathered once into a [`FixtureConfig`]
//! and passed by reference to the resolver and comparator.

use crate::error::{FixtureError, FixtureResult};
use crate::fs_utils;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Variable naming the config file
pub const CONFIG_FILE_VAR: &str = "WDL_FIXTURES_CONFIG";
/// Variable naming a persistent cache directory
pub const CACHE_DIR_VAR: &str = "TEST_DATA_DIR";
/// Variable naming a persistent directory to run workflows in
pub const EXECUTION_DIR_VAR: &str = "TEST_EXECUTION_DIR";
/// Config file looked up in the home directory when no variable is set
pub const DEFAULT_CONFIG_FILE_NAME: &str = ".wdl_fixtures.toml";

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;

/// A frozen copy of environment variables.
///
/// Built from the process environment once per session, or from an explicit
/// map in tests so nothing has to mutate the real environment.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    /// Capture the current process environment
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Look up a variable; empty values count as unset
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Map each key to the value of the variable it names, skipping unset ones
    pub fn resolve_map(&self, key_to_var: &IndexMap<String, String>) -> IndexMap<String, String> {
        key_to_var
            .iter()
            .filter_map(|(key, var)| self.get(var).map(|value| (key.clone(), value.to_string())))
            .collect()
    }
}

/// Settings for launching the workflow engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Java executable
    pub java_bin: PathBuf,
    /// Engine JAR file
    pub jar: PathBuf,
    /// Extra arguments for the Java runtime
    pub java_args: Vec<String>,
    /// Extra arguments for the engine's `run` command
    pub engine_args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            java_bin: PathBuf::from("/usr/bin/java"),
            jar: PathBuf::from("cromwell.jar"),
            java_args: Vec::new(),
            engine_args: Vec::new(),
        }
    }
}

/// On-disk form of the configuration file (TOML)
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_headers: Option<IndexMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxies: Option<IndexMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineConfig>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> FixtureResult<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str::<ConfigFile>(&contents).map_err(|e| {
                FixtureError::config(
                    format!("Failed to parse {} as TOML: {}", path.display(), e),
                    None,
                )
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(FixtureError::config(
                format!("Config file {} does not exist", path.display()),
                Some(CONFIG_FILE_VAR),
            )),
            Err(err) => Err(FixtureError::io("Failed to read config file", Some(path), err)),
        }
    }
}

/// Configuration for one test session
#[derive(Debug, Clone)]
pub struct FixtureConfig {
    /// Persistent cache directory; `None` means an ephemeral one per session
    pub cache_dir: Option<PathBuf>,
    /// Directory workflows run in; `None` means a temporary one per run
    pub execution_dir: Option<PathBuf>,
    /// HTTP header name -> environment variable holding its value
    pub http_headers: IndexMap<String, String>,
    /// Proxy scheme -> environment variable holding the proxy URL
    pub proxies: IndexMap<String, String>,
    /// Timeout for a single download
    pub http_timeout: Duration,
    /// Engine launch settings
    pub engine: EngineConfig,
    /// Environment the header/proxy variables are read from
    pub env: EnvSnapshot,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            execution_dir: None,
            http_headers: default_http_headers(),
            proxies: default_proxies(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            engine: EngineConfig::default(),
            env: EnvSnapshot::default(),
        }
    }
}

/// Default header mapping: artifact repository API key from `TOKEN`
pub fn default_http_headers() -> IndexMap<String, String> {
    let mut headers = IndexMap::new();
    headers.insert("X-JFrog-Art-Api".to_string(), "TOKEN".to_string());
    headers
}

pub fn default_proxies() -> IndexMap<String, String> {
    let mut proxies = IndexMap::new();
    proxies.insert("http".to_string(), "HTTP_PROXY".to_string());
    proxies.insert("https".to_string(), "HTTPS_PROXY".to_string());
    proxies
}

impl FixtureConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the configuration from the current process environment
    pub fn from_process_env(project_root: &Path) -> FixtureResult<Self> {
        Self::from_env(EnvSnapshot::capture(), project_root)
    }

    /// Build the configuration from an environment snapshot.
    ///
    /// The config file named by `WDL_FIXTURES_CONFIG` (or
    /// `$HOME/.wdl_fixtures.toml` when present) is applied first, then the
    /// environment overrides. Relative cache directories are taken relative
    /// to `project_root`.
    pub fn from_env(env: EnvSnapshot, project_root: &Path) -> FixtureResult<Self> {
        let file = match config_file_path(&env) {
            Some(path) => Some(ConfigFile::load(&path)?),
            None => None,
        };

        let mut config = Self::default();
        if let Some(file) = file {
            config.apply_file(file);
        }

        if let Some(dir) = env.get(CACHE_DIR_VAR) {
            config.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = env.get(EXECUTION_DIR_VAR) {
            config.execution_dir = Some(PathBuf::from(dir));
        }
        if let Some(java_home) = env.get("JAVA_HOME") {
            config.engine.java_bin = Path::new(java_home).join("bin").join("java");
        }
        if let Some(jar) = env.get("CROMWELL_JAR") {
            config.engine.jar = PathBuf::from(jar);
        }

        config.cache_dir = config.cache_dir.map(|dir| fs_utils::absolutize(&dir, project_root));
        config.execution_dir = config
            .execution_dir
            .map(|dir| fs_utils::absolutize(&dir, project_root));
        config.env = env;
        Ok(config)
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(dir) = file.cache_dir {
            self.cache_dir = Some(dir);
        }
        if let Some(dir) = file.execution_dir {
            self.execution_dir = Some(dir);
        }
        if let Some(secs) = file.http_timeout_secs {
            self.http_timeout = Duration::from_secs(secs);
        }
        if let Some(headers) = file.http_headers {
            self.http_headers = headers;
        }
        if let Some(proxies) = file.proxies {
            self.proxies = proxies;
        }
        if let Some(engine) = file.engine {
            self.engine = engine;
        }
    }

    /// Use a persistent cache directory
    pub fn with_cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Run workflows in a kept directory instead of a temporary one
    pub fn with_execution_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.execution_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, env: EnvSnapshot) -> Self {
        self.env = env;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Header values to send, resolved from the environment snapshot
    pub fn resolved_http_headers(&self) -> IndexMap<String, String> {
        self.env.resolve_map(&self.http_headers)
    }

    /// Proxy URLs to use, resolved from the environment snapshot
    pub fn resolved_proxies(&self) -> IndexMap<String, String> {
        self.env.resolve_map(&self.proxies)
    }
}

fn config_file_path(env: &EnvSnapshot) -> Option<PathBuf> {
    if let Some(path) = env.get(CONFIG_FILE_VAR) {
        return Some(PathBuf::from(path));
    }
    let home = env.get("HOME").or_else(|| env.get("USERPROFILE"))?;
    let default_path = Path::new(home).join(DEFAULT_CONFIG_FILE_NAME);
    default_path.exists().then_some(default_path)
}
