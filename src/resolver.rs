use std::path::PathBuf;

use camino::Utf8PathBuf;

use crate::domain::{DownloadTask, FileStatus, FileTarget, RunAccession};
use crate::error::EnaError;
use crate::store::location_basename;

pub const LIST_DELIMITER: char = ';';

/// One row of either a metadata table or a persisted manifest, before it is
/// resolved into targets. Multi-part values are `;`-joined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestRow {
    pub sample_id: String,
    pub run_id: String,
    pub file_locations: Option<String>,
    pub checksums: Option<String>,
    /// Explicit destinations from a prebuilt manifest.
    pub file_paths: Option<String>,
    /// File count declared by a prebuilt manifest.
    pub file_count: Option<usize>,
    pub statuses: Vec<FileStatus>,
}

/// Expands rows into download tasks with destinations under
/// `<raw_reads>/<run>/<file name>`.
#[derive(Debug, Clone)]
pub struct TaskResolver {
    raw_reads_dir: Utf8PathBuf,
}

impl TaskResolver {
    pub fn new(raw_reads_dir: Utf8PathBuf) -> Self {
        Self { raw_reads_dir }
    }

    pub fn resolve(&self, row: &ManifestRow) -> Result<DownloadTask, EnaError> {
        let run_id: RunAccession = row.run_id.parse()?;
        let locations = split_list(row.file_locations.as_deref())
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect::<Vec<_>>();

        if locations.is_empty() {
            if let Some(declared) = row.file_count.filter(|count| *count > 0) {
                return Err(EnaError::FileCountMismatch {
                    run: run_id.to_string(),
                    declared,
                    found: 0,
                });
            }
            return Ok(DownloadTask::new(row.sample_id.clone(), run_id, Vec::new()));
        }

        let checksums = match blank_to_none(row.checksums.as_deref()) {
            None => vec![None; locations.len()],
            Some(joined) => split_list(Some(joined))
                .into_iter()
                .map(|value| (!value.is_empty()).then(|| value.to_string()))
                .collect(),
        };
        if checksums.len() != locations.len() {
            return Err(EnaError::LocationChecksumMismatch {
                run: run_id.to_string(),
                locations: locations.len(),
                checksums: checksums.len(),
            });
        }

        let paths = match blank_to_none(row.file_paths.as_deref()) {
            Some(joined) => split_list(Some(joined))
                .into_iter()
                .map(PathBuf::from)
                .collect::<Vec<_>>(),
            None => locations
                .iter()
                .map(|location| self.destination(&run_id, location))
                .collect::<Result<Vec<_>, _>>()?,
        };
        if paths.len() != locations.len() {
            return Err(EnaError::FileCountMismatch {
                run: run_id.to_string(),
                declared: locations.len(),
                found: paths.len(),
            });
        }
        if let Some(declared) = row.file_count {
            if declared != locations.len() {
                return Err(EnaError::FileCountMismatch {
                    run: run_id.to_string(),
                    declared,
                    found: locations.len(),
                });
            }
        }

        let targets = locations
            .into_iter()
            .zip(checksums)
            .zip(paths)
            .map(|((location, expected_checksum), local_path)| FileTarget {
                remote_location: location.to_string(),
                local_path,
                expected_checksum,
            })
            .collect::<Vec<_>>();

        let mut task = DownloadTask::new(row.sample_id.clone(), run_id, targets);
        if row.statuses.len() == task.targets.len() {
            task.outcomes = row.statuses.clone();
        }
        Ok(task)
    }

    /// True when every target sits at the destination this resolver would
    /// derive for it, so the paths need not be persisted.
    pub fn has_derived_paths(&self, task: &DownloadTask) -> bool {
        task.targets.iter().all(|target| {
            self.destination(&task.run_id, &target.remote_location)
                .is_ok_and(|path| path == target.local_path)
        })
    }

    fn destination(&self, run: &RunAccession, location: &str) -> Result<PathBuf, EnaError> {
        let name = location_basename(location).ok_or_else(|| {
            EnaError::MetadataParse(format!(
                "run {run}: cannot derive a file name from {location:?}"
            ))
        })?;
        Ok(self
            .raw_reads_dir
            .join(run.as_str())
            .join(name)
            .into_std_path_buf())
    }
}

pub fn split_list(value: Option<&str>) -> Vec<&str> {
    match blank_to_none(value) {
        Some(joined) => joined.split(LIST_DELIMITER).map(str::trim).collect(),
        None => Vec::new(),
    }
}

fn blank_to_none(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn resolver() -> TaskResolver {
        TaskResolver::new(Utf8PathBuf::from("/data/raw_reads"))
    }

    fn row(locations: Option<&str>, checksums: Option<&str>) -> ManifestRow {
        ManifestRow {
            sample_id: "SAMN05412345".to_string(),
            run_id: "SRR001".to_string(),
            file_locations: locations.map(str::to_string),
            checksums: checksums.map(str::to_string),
            ..ManifestRow::default()
        }
    }

    #[test]
    fn single_file_row() {
        let task = resolver()
            .resolve(&row(Some("ftp.sra.ebi.ac.uk/vol1/SRR001.fastq.gz"), Some("abc")))
            .unwrap();
        assert_eq!(task.expected_file_count, 1);
        assert_eq!(
            task.targets[0].local_path,
            PathBuf::from("/data/raw_reads/SRR001/SRR001.fastq.gz")
        );
        assert_eq!(task.targets[0].expected_checksum.as_deref(), Some("abc"));
    }

    #[test]
    fn paired_row_zips_positionally() {
        let task = resolver()
            .resolve(&row(
                Some("host/SRR001_1.fastq.gz;host/SRR001_2.fastq.gz"),
                Some("aaa;bbb"),
            ))
            .unwrap();
        assert_eq!(task.expected_file_count, 2);
        let names = task
            .targets
            .iter()
            .map(|t| t.local_path.file_name().unwrap().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["SRR001_1.fastq.gz", "SRR001_2.fastq.gz"]);
        assert_eq!(task.targets[1].expected_checksum.as_deref(), Some("bbb"));
    }

    #[test]
    fn missing_checksums_skip_verification() {
        let task = resolver()
            .resolve(&row(Some("host/a.fq;host/b.fq"), None))
            .unwrap();
        assert!(task.targets.iter().all(|t| t.expected_checksum.is_none()));

        let partial = resolver()
            .resolve(&row(Some("host/a.fq;host/b.fq"), Some("aaa;")))
            .unwrap();
        assert_eq!(partial.targets[0].expected_checksum.as_deref(), Some("aaa"));
        assert_eq!(partial.targets[1].expected_checksum, None);
    }

    #[test]
    fn mismatched_lists_are_structural_errors() {
        let err = resolver()
            .resolve(&row(Some("host/a.fq;host/b.fq"), Some("aaa")))
            .unwrap_err();
        assert_matches!(
            err,
            EnaError::LocationChecksumMismatch {
                locations: 2,
                checksums: 1,
                ..
            }
        );
        assert!(err.is_structural());
    }

    #[test]
    fn row_without_locations_has_no_targets() {
        let task = resolver().resolve(&row(None, None)).unwrap();
        assert!(task.targets.is_empty());
        assert_eq!(task.expected_file_count, 0);

        let blank = resolver().resolve(&row(Some("  "), Some("abc"))).unwrap();
        assert!(blank.targets.is_empty());
    }

    #[test]
    fn prebuilt_paths_and_counts_are_checked() {
        let mut prebuilt = row(Some("host/a.fq;host/b.fq"), None);
        prebuilt.file_paths = Some("/elsewhere/a.fq;/elsewhere/b.fq".to_string());
        prebuilt.file_count = Some(2);
        prebuilt.statuses = vec![FileStatus::Ok, FileStatus::Error];
        let task = resolver().resolve(&prebuilt).unwrap();
        assert_eq!(task.targets[0].local_path, PathBuf::from("/elsewhere/a.fq"));
        assert_eq!(task.outcomes, vec![FileStatus::Ok, FileStatus::Error]);

        prebuilt.file_count = Some(3);
        let err = resolver().resolve(&prebuilt).unwrap_err();
        assert_matches!(err, EnaError::FileCountMismatch { declared: 3, found: 2, .. });
    }

    #[test]
    fn invalid_run_id_is_rejected() {
        let mut bad = row(Some("host/a.fq"), None);
        bad.run_id = "../escape".to_string();
        assert_matches!(
            resolver().resolve(&bad).unwrap_err(),
            EnaError::InvalidRunAccession(_)
        );
    }

    #[test]
    fn location_without_file_name_is_rejected() {
        let err = resolver().resolve(&row(Some("host/dir/"), None)).unwrap_err();
        assert_matches!(err, EnaError::MetadataParse(_));
    }
}
