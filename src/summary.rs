use serde::Serialize;

use crate::domain::FileStatus;
use crate::manifest::Manifest;

/// File-level counters derived from a manifest. A partially downloaded run
/// contributes to both `successful` and `failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total_files: usize,
    pub successful: usize,
    pub already_existed: usize,
    pub failed: usize,
    /// Files whose run has not been processed in the latest attempt.
    pub not_attempted: usize,
    /// Runs listed without any downloadable file.
    pub runs_without_files: usize,
}

impl RunSummary {
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let mut summary = RunSummary::default();
        for task in manifest.tasks() {
            summary.total_files += task.expected_file_count;
            if task.targets.is_empty() {
                summary.runs_without_files += 1;
                continue;
            }
            if task.outcomes.is_empty() {
                summary.not_attempted += task.targets.len();
                continue;
            }
            for status in &task.outcomes {
                match status {
                    FileStatus::Ok => summary.successful += 1,
                    FileStatus::Exists => summary.already_existed += 1,
                    FileStatus::Error => summary.failed += 1,
                }
            }
        }
        summary
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.not_attempted == 0
    }
}
