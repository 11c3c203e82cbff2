use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::EnaError;

static PROJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(PRJ[EDN][A-Z]\d+|[EDS]RP\d+)$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectAccession(String);

impl ProjectAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProjectAccession {
    type Err = EnaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if !PROJECT_RE.is_match(&normalized) {
            return Err(EnaError::InvalidProjectAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// Run accession as reported by the archive. It names the per-run
/// subdirectory, so it must be a single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunAccession(String);

impl RunAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunAccession {
    type Err = EnaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed != "."
            && trimmed != ".."
            && !trimmed
                .chars()
                .any(|ch| ch == '/' || ch == '\\' || ch.is_whitespace());
        if !is_valid {
            return Err(EnaError::InvalidRunAccession(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Outcome of one fetch of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileStatus {
    Exists,
    #[serde(rename = "OK")]
    Ok,
    Error,
}

impl FileStatus {
    pub fn token(self) -> &'static str {
        match self {
            FileStatus::Exists => "Exists",
            FileStatus::Ok => "OK",
            FileStatus::Error => "Error",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, FileStatus::Exists | FileStatus::Ok)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for FileStatus {
    type Err = EnaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "Exists" => Ok(FileStatus::Exists),
            "OK" => Ok(FileStatus::Ok),
            "Error" => Ok(FileStatus::Error),
            other => Err(EnaError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NotAttempted,
    PartiallyComplete,
    Complete,
    Failed,
}

impl TaskStatus {
    /// Rolls per-target outcomes up into the task status. An empty outcome
    /// list means nothing was attempted.
    pub fn from_outcomes(outcomes: &[FileStatus]) -> Self {
        if outcomes.is_empty() {
            return TaskStatus::NotAttempted;
        }
        let successes = outcomes.iter().filter(|status| status.is_success()).count();
        if successes == outcomes.len() {
            TaskStatus::Complete
        } else if successes == 0 {
            TaskStatus::Failed
        } else {
            TaskStatus::PartiallyComplete
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::NotAttempted => write!(f, "not attempted"),
            TaskStatus::PartiallyComplete => write!(f, "partially complete"),
            TaskStatus::Complete => write!(f, "complete"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileTarget {
    pub remote_location: String,
    pub local_path: PathBuf,
    pub expected_checksum: Option<String>,
}

/// One manifest row: every file belonging to a single sequencing run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadTask {
    pub logical_name: String,
    pub run_id: RunAccession,
    pub targets: Vec<FileTarget>,
    pub expected_file_count: usize,
    /// Per-target outcomes of the latest attempt, aligned with `targets`.
    pub outcomes: Vec<FileStatus>,
}

impl DownloadTask {
    pub fn new(logical_name: String, run_id: RunAccession, targets: Vec<FileTarget>) -> Self {
        let expected_file_count = targets.len();
        Self {
            logical_name,
            run_id,
            targets,
            expected_file_count,
            outcomes: Vec::new(),
        }
    }

    pub fn status(&self) -> TaskStatus {
        if self.targets.is_empty() {
            return TaskStatus::NotAttempted;
        }
        TaskStatus::from_outcomes(&self.outcomes)
    }

    /// Clears outcomes so the task reads as not attempted until the next
    /// fetch records fresh ones.
    pub fn reset(&mut self) {
        self.outcomes.clear();
    }
}
