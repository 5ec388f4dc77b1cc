//! WDL import bundles
//!
//! Cromwell resolves `import` statements against a zip passed with `-p`. The
//! directories listed in `tests/import_paths.txt` have their `*.wdl` files
//! bundled into such a zip under bare file names.

use crate::error::{FixtureError, FixtureResult, IntoFixtureError};
use crate::fs_utils;
use glob::Pattern;
use std::collections::HashMap;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Location of the import list relative to the project root
pub const DEFAULT_IMPORT_PATHS_FILE: &str = "tests/import_paths.txt";

/// `tests/import_paths.txt` under the project root, if present
pub fn find_import_paths_file(project_root: &Path) -> Option<PathBuf> {
    let path = project_root.join(DEFAULT_IMPORT_PATHS_FILE);
    path.is_file().then_some(path)
}

/// Read one directory per line. Blank lines and `#` comments are skipped;
/// relative entries resolve against `project_root`.
pub fn read_import_dirs(file: &Path, project_root: &Path) -> FixtureResult<Vec<PathBuf>> {
    let text = fs_utils::read_file_to_string(file)?;
    let mut dirs = Vec::new();
    for line in text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
    {
        let dir = fs_utils::absolutize(Path::new(line), project_root);
        if !dir.is_dir() {
            return Err(FixtureError::NotFound { path: dir });
        }
        dirs.push(dir);
    }
    Ok(dirs)
}

/// `*.wdl` files directly inside each directory, directory by directory
pub fn collect_wdl_files(dirs: &[PathBuf]) -> FixtureResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for dir in dirs {
        let pattern = format!("{}/*.wdl", Pattern::escape(&dir.to_string_lossy()));
        let entries = glob::glob(&pattern).map_err(|e| {
            FixtureError::config(
                format!("Invalid import directory {}: {}", dir.display(), e),
                None,
            )
        })?;
        for entry in entries {
            let path = entry.map_err(|e| {
                let path = e.path().to_path_buf();
                FixtureError::io("Failed to list import directory", Some(&path), e.into_error())
            })?;
            if path.is_file() {
                files.push(path);
            }
        }
    }
    Ok(files)
}

/// Write `files` into a zip stored under their bare file names.
///
/// Two files with the same name would shadow each other, so that is an
/// error.
pub fn write_imports_zip<W: Write + Seek>(files: &[PathBuf], dest: W) -> FixtureResult<W> {
    let zip_error = |e: zip::result::ZipError| {
        FixtureError::io("Failed to write imports zip", None, e.into())
    };

    let mut seen: HashMap<String, &Path> = HashMap::new();
    let mut zip = ZipWriter::new(dest);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for file in files {
        let name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| FixtureError::NotFound { path: file.clone() })?;
        if let Some(previous) = seen.insert(name.clone(), file) {
            return Err(FixtureError::config(
                format!(
                    "Import {} is provided by both {} and {}",
                    name,
                    previous.display(),
                    file.display()
                ),
                Some(DEFAULT_IMPORT_PATHS_FILE),
            ));
        }
        zip.start_file(name, options).map_err(zip_error)?;
        zip.write_all(&fs_utils::read_file_to_bytes(file)?)
            .fixture_context_with_path("Failed to add import to zip", file)?;
    }
    zip.finish().map_err(zip_error)
}

/// A temporary imports zip, removed on drop
pub struct ImportsZip {
    file: NamedTempFile,
    entries: usize,
}

impl ImportsZip {
    /// Bundle the WDL files of `dirs`; `None` when there are none
    pub fn build(dirs: &[PathBuf]) -> FixtureResult<Option<Self>> {
        let files = collect_wdl_files(dirs)?;
        if files.is_empty() {
            return Ok(None);
        }

        let mut file = tempfile::Builder::new()
            .prefix("imports_")
            .suffix(".zip")
            .tempfile()
            .fixture_context("Failed to create imports zip")?;
        write_imports_zip(&files, file.as_file_mut())?;
        info!(
            imports = files.len(),
            path = %file.path().display(),
            "wrote WDL imports zip"
        );
        Ok(Some(Self {
            file,
            entries: files.len(),
        }))
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}
