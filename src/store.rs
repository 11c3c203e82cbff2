use std::fs;
use std::io::Write;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::{ProjectAccession, RunAccession};
use crate::error::EnaError;

pub const MANIFEST_FILE_NAME: &str = "download_info_table.tsv";
pub const RAW_READS_DIR: &str = "raw_reads";

/// On-disk layout of one project:
///
/// ```text
/// <root>/<project>.tsv                    metadata table
/// <root>/download_info_table.tsv          manifest
/// <root>/raw_reads/<run>/<file name>      downloaded files
/// ```
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    /// Project store under `dir`, or `./<project>` when no directory is given.
    pub fn for_project(project: &ProjectAccession, dir: Option<&Path>) -> Result<Self, EnaError> {
        let cwd = std::env::current_dir().map_err(|err| EnaError::Filesystem(err.to_string()))?;
        let root = match dir {
            Some(dir) if dir.is_absolute() => dir.to_path_buf(),
            Some(dir) => cwd.join(dir),
            None => cwd.join(project.as_str()),
        };
        let root = Utf8PathBuf::from_path_buf(root)
            .map_err(|_| EnaError::Filesystem("invalid project path".to_string()))?;
        Ok(Self { root })
    }

    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn raw_reads_dir(&self) -> Utf8PathBuf {
        self.root.join(RAW_READS_DIR)
    }

    pub fn run_dir(&self, run: &RunAccession) -> Utf8PathBuf {
        self.raw_reads_dir().join(run.as_str())
    }

    pub fn manifest_path(&self) -> Utf8PathBuf {
        self.root.join(MANIFEST_FILE_NAME)
    }

    pub fn metadata_path(&self, project: &ProjectAccession) -> Utf8PathBuf {
        self.root.join(format!("{}.tsv", project.as_str()))
    }

    pub fn ensure_root(&self) -> Result<(), EnaError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| EnaError::Filesystem(err.to_string()))
    }

    /// Writes `content` to a temp file next to `path` and renames it into
    /// place, so readers never observe a half-written file.
    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), EnaError> {
        let parent = path
            .parent()
            .ok_or_else(|| EnaError::Filesystem(format!("invalid destination path {path}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| EnaError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".enatool")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| EnaError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| EnaError::Filesystem(format!("write {path}: {err}")))?;
        temp.as_file()
            .sync_all()
            .map_err(|err| EnaError::Filesystem(format!("sync {path}: {err}")))?;
        temp.persist(path.as_std_path())
            .map_err(|err| EnaError::Filesystem(format!("persist {path}: {}", err.error)))?;
        Ok(())
    }
}

/// Last path segment of a remote location, used as the local file name.
pub fn location_basename(location: &str) -> Option<&str> {
    let without_query = location.trim().split(['?', '#']).next()?;
    let name = without_query.rsplit('/').next()?;
    if name.is_empty() || name == "." || name == ".." || name.contains('\\') {
        return None;
    }
    Some(name)
}
