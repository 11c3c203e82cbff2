use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EnaError {
    #[error("invalid project accession: {0}")]
    InvalidProjectAccession(String),

    #[error("invalid run accession: {0}")]
    InvalidRunAccession(String),

    #[error("metadata table is missing required columns: {}", .0.join(", "))]
    #[diagnostic(help("the file report must carry sample, run and file location columns"))]
    MissingColumns(Vec<String>),

    #[error("run {run}: {locations} file locations but {checksums} checksums")]
    LocationChecksumMismatch {
        run: String,
        locations: usize,
        checksums: usize,
    },

    #[error("run {run}: manifest lists {declared} files but {found} paths")]
    FileCountMismatch {
        run: String,
        declared: usize,
        found: usize,
    },

    #[error("run {0} appears more than once in the manifest")]
    DuplicateRun(String),

    #[error("file {path} is listed by more than one run or target")]
    DuplicatePath { path: String },

    #[error("either a metadata table or a prebuilt manifest must be provided")]
    MissingManifestSource,

    #[error("unknown download status: {0}")]
    InvalidStatus(String),

    #[error("invalid manifest row {row}: {message}")]
    ManifestParse { row: usize, message: String },

    #[error("invalid metadata table: {0}")]
    MetadataParse(String),

    #[error("metadata table not found: {0}")]
    MetadataNotFound(PathBuf),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("ENA request failed: {0}")]
    EnaHttp(String),

    #[error("ENA returned status {status}: {message}")]
    EnaStatus { status: u16, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("download cancelled")]
    Cancelled,
}

impl EnaError {
    /// Errors raised before any download starts because the input cannot be
    /// resolved into a manifest.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EnaError::MissingColumns(_)
                | EnaError::LocationChecksumMismatch { .. }
                | EnaError::FileCountMismatch { .. }
                | EnaError::DuplicateRun(_)
                | EnaError::DuplicatePath { .. }
                | EnaError::InvalidRunAccession(_)
                | EnaError::ManifestParse { .. }
                | EnaError::MetadataParse(_)
        )
    }
}

/// Failure of a single transfer attempt. Never escapes a batch run.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transient network failure: {0}")]
    Transient(String),

    #[error("{0}")]
    Unexpected(String),
}
