//! # wdl-fixtures
//!
//! Test fixtures for WDL workflow repositories.
//!
//! Test data is declared in a JSON manifest of named entries. Each entry is a
//! literal value or a file descriptor with a local `path`, inline `contents`
//! or a remote `url`. The [`resolver`] turns descriptors into local files,
//! caching downloads and inline contents under a persistent or per-session
//! directory. The [`compare`] module checks workflow outputs against expected
//! values with a pluggable set of comparison strategies.

pub mod cache;
pub mod compare;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod fs_utils;
pub mod imports;
pub mod resolver;
pub mod session;

pub use cache::{CacheDirectory, CacheKey};
pub use compare::{
    CompareOptions, Comparator, ComparatorRegistry, Comparison, ExactComparator,
    OutputComparator, VcfComparator,
};
pub use config::{EngineConfig, EnvSnapshot, FixtureConfig};
pub use descriptor::{DataDescriptor, DataValue, ExpectedOutputs, Manifest};
pub use engine::{CromwellEngine, Engine};
pub use error::{FixtureError, FixtureResult, MismatchReport, OutputMismatch};
pub use fetch::{Fetcher, HttpFetcher};
pub use fs_utils::ScratchDir;
pub use imports::ImportsZip;
pub use resolver::{DataResolver, Origin, ResolvedFile, TestData};
pub use session::{find_manifest, find_project_root, FixtureSession, WorkflowRun, WorkflowRunner};
