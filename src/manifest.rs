use std::collections::HashSet;
use std::io::Read;

use camino::Utf8Path;
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};

use crate::domain::{DownloadTask, FileStatus};
use crate::error::EnaError;
use crate::metadata::{ColumnMapping, MetadataTable};
use crate::resolver::{LIST_DELIMITER, ManifestRow, TaskResolver, split_list};
use crate::store::Store;
use crate::summary::RunSummary;

/// Ordered download tasks, one per run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    tasks: Vec<DownloadTask>,
}

impl Manifest {
    /// Run ids and destinations must be unique across the whole manifest,
    /// so no file is ever fetched by two workers at once.
    pub fn new(tasks: Vec<DownloadTask>) -> Result<Self, EnaError> {
        let mut runs = HashSet::new();
        let mut paths = HashSet::new();
        for task in &tasks {
            if !runs.insert(task.run_id.as_str()) {
                return Err(EnaError::DuplicateRun(task.run_id.to_string()));
            }
            for target in &task.targets {
                if !paths.insert(target.local_path.as_path()) {
                    return Err(EnaError::DuplicatePath {
                        path: target.local_path.display().to_string(),
                    });
                }
            }
        }
        Ok(Self { tasks })
    }

    pub fn tasks(&self) -> &[DownloadTask] {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut [DownloadTask] {
        &mut self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::from_manifest(self)
    }

    /// Serializes the manifest. `filepath` is left blank for runs whose
    /// files sit where `resolver` would put them anyway.
    pub fn to_tsv(&self, resolver: &TaskResolver) -> Result<Vec<u8>, EnaError> {
        let mut writer = WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(Vec::new());
        for task in &self.tasks {
            writer
                .serialize(ManifestRecord::new(task, resolver))
                .map_err(|err| EnaError::Filesystem(err.to_string()))?;
        }
        writer
            .into_inner()
            .map_err(|err| EnaError::Filesystem(err.to_string()))
    }

    /// Parses a persisted manifest. Rows without explicit file paths get
    /// destinations from `resolver`.
    pub fn from_tsv_reader<R: Read>(reader: R, resolver: &TaskResolver) -> Result<Self, EnaError> {
        let mut reader = ReaderBuilder::new().delimiter(b'\t').from_reader(reader);
        let mut tasks = Vec::new();
        for (index, record) in reader.deserialize::<ManifestRecord>().enumerate() {
            let row = index + 1;
            let record = record.map_err(|err| EnaError::ManifestParse {
                row,
                message: err.to_string(),
            })?;
            let manifest_row = record.into_row(row)?;
            tasks.push(resolver.resolve(&manifest_row)?);
        }
        Self::new(tasks)
    }

    pub fn save(&self, path: &Utf8Path, resolver: &TaskResolver) -> Result<(), EnaError> {
        Store::write_bytes_atomic(path, &self.to_tsv(resolver)?)?;
        tracing::debug!(path = %path, tasks = self.tasks.len(), "manifest persisted");
        Ok(())
    }

    pub fn load(path: &Utf8Path, resolver: &TaskResolver) -> Result<Self, EnaError> {
        let file = std::fs::File::open(path.as_std_path())
            .map_err(|err| EnaError::Filesystem(format!("open {path}: {err}")))?;
        Self::from_tsv_reader(file, resolver)
    }
}

/// Persisted column layout of a manifest row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestRecord {
    sample_name: String,
    accession: String,
    #[serde(default)]
    filepath: String,
    #[serde(default)]
    ftp_urls: String,
    #[serde(default)]
    md5sums: String,
    #[serde(default)]
    n: Option<usize>,
    #[serde(default)]
    download_status: String,
}

impl ManifestRecord {
    fn new(task: &DownloadTask, resolver: &TaskResolver) -> Self {
        let delimiter = LIST_DELIMITER.to_string();
        let join = |values: Vec<String>| values.join(delimiter.as_str());
        let has_checksums = task
            .targets
            .iter()
            .any(|target| target.expected_checksum.is_some());
        Self {
            sample_name: task.logical_name.clone(),
            accession: task.run_id.to_string(),
            filepath: if resolver.has_derived_paths(task) {
                String::new()
            } else {
                join(
                    task.targets
                        .iter()
                        .map(|target| target.local_path.display().to_string())
                        .collect(),
                )
            },
            ftp_urls: join(
                task.targets
                    .iter()
                    .map(|target| target.remote_location.clone())
                    .collect(),
            ),
            md5sums: if has_checksums {
                join(
                    task.targets
                        .iter()
                        .map(|target| target.expected_checksum.clone().unwrap_or_default())
                        .collect(),
                )
            } else {
                String::new()
            },
            n: Some(task.expected_file_count),
            download_status: join(
                task.outcomes
                    .iter()
                    .map(|status| status.token().to_string())
                    .collect(),
            ),
        }
    }

    fn into_row(self, row: usize) -> Result<ManifestRow, EnaError> {
        let statuses = split_list(Some(&self.download_status))
            .into_iter()
            .map(str::parse::<FileStatus>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| EnaError::ManifestParse {
                row,
                message: err.to_string(),
            })?;
        let locations = split_list(Some(&self.ftp_urls))
            .into_iter()
            .filter(|value| !value.is_empty())
            .count();
        if !statuses.is_empty() && statuses.len() != locations {
            return Err(EnaError::ManifestParse {
                row,
                message: format!(
                    "{} download statuses for {locations} files",
                    statuses.len()
                ),
            });
        }
        let optional = |value: String| (!value.trim().is_empty()).then_some(value);
        Ok(ManifestRow {
            sample_id: self.sample_name,
            run_id: self.accession,
            file_locations: optional(self.ftp_urls),
            checksums: optional(self.md5sums),
            file_paths: optional(self.filepath),
            file_count: self.n,
            statuses,
        })
    }
}

/// Input to [`ManifestBuilder::build`].
#[derive(Debug, Clone)]
pub enum ManifestSource {
    MetadataTable(MetadataTable),
    PrebuiltManifest(Manifest),
}

impl ManifestSource {
    /// Picks the source from optional inputs. A prebuilt manifest takes
    /// precedence over a metadata table when both are given.
    pub fn from_parts(
        metadata: Option<MetadataTable>,
        manifest: Option<Manifest>,
    ) -> Result<Self, EnaError> {
        match (metadata, manifest) {
            (metadata, Some(manifest)) => {
                if metadata.is_some() {
                    tracing::warn!("both inputs given, using prebuilt manifest over metadata table");
                }
                Ok(ManifestSource::PrebuiltManifest(manifest))
            }
            (Some(metadata), None) => Ok(ManifestSource::MetadataTable(metadata)),
            (None, None) => Err(EnaError::MissingManifestSource),
        }
    }
}

pub struct ManifestBuilder<'a> {
    store: &'a Store,
    mapping: ColumnMapping,
}

impl<'a> ManifestBuilder<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self {
            store,
            mapping: ColumnMapping::default(),
        }
    }

    pub fn with_mapping(mut self, mapping: ColumnMapping) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn resolver(&self) -> TaskResolver {
        TaskResolver::new(self.store.raw_reads_dir())
    }

    /// Resolves the source into a manifest and persists it before returning.
    pub fn build(&self, source: ManifestSource) -> Result<Manifest, EnaError> {
        let manifest = match source {
            ManifestSource::PrebuiltManifest(manifest) => manifest,
            ManifestSource::MetadataTable(table) => {
                let rows = table.manifest_rows(&self.mapping)?;
                let resolver = self.resolver();
                let tasks = rows
                    .iter()
                    .map(|row| resolver.resolve(row))
                    .collect::<Result<Vec<_>, _>>()?;
                Manifest::new(tasks)?
            }
        };
        self.store.ensure_root()?;
        manifest.save(&self.store.manifest_path(), &self.resolver())?;
        tracing::info!(
            tasks = manifest.len(),
            path = %self.store.manifest_path(),
            "manifest built"
        );
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;

    use super::*;
    use crate::domain::TaskStatus;

    fn table(rows: &[[&str; 4]]) -> MetadataTable {
        MetadataTable::new(
            ["sample_accession", "run_accession", "fastq_ftp", "fastq_md5"]
                .iter()
                .map(|value| value.to_string())
                .collect(),
            rows.iter()
                .map(|row| row.iter().map(|value| value.to_string()).collect())
                .collect(),
        )
        .unwrap()
    }

    fn temp_store() -> (tempfile::TempDir, Store) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("PRJNA1")).unwrap();
        (temp, Store::new_with_root(root))
    }

    #[test]
    fn source_requires_one_input() {
        let err = ManifestSource::from_parts(None, None).unwrap_err();
        assert_matches!(err, EnaError::MissingManifestSource);
    }

    #[test]
    fn prebuilt_manifest_takes_precedence() {
        let source = ManifestSource::from_parts(
            Some(table(&[["SAMN1", "SRR1", "host/a.fq", ""]])),
            Some(Manifest::default()),
        )
        .unwrap();
        assert_matches!(source, ManifestSource::PrebuiltManifest(_));
    }

    #[test]
    fn build_persists_before_returning() {
        let (_temp, store) = temp_store();
        let manifest = ManifestBuilder::new(&store)
            .build(ManifestSource::MetadataTable(table(&[
                ["SAMN1", "SRR1", "host/a_1.fq;host/a_2.fq", "aaa;bbb"],
                ["SAMN2", "SRR2", "", ""],
            ])))
            .unwrap();
        assert_eq!(manifest.len(), 2);
        assert!(store.manifest_path().as_std_path().exists());

        let reloaded =
            Manifest::load(&store.manifest_path(), &ManifestBuilder::new(&store).resolver())
                .unwrap();
        assert_eq!(reloaded, manifest);
    }

    #[test]
    fn duplicate_runs_are_rejected() {
        let (_temp, store) = temp_store();
        let err = ManifestBuilder::new(&store)
            .build(ManifestSource::MetadataTable(table(&[
                ["SAMN1", "SRR1", "host/a.fq", ""],
                ["SAMN2", "SRR1", "host/b.fq", ""],
            ])))
            .unwrap_err();
        assert_matches!(err, EnaError::DuplicateRun(ref run) if run == "SRR1");
        assert!(!store.manifest_path().as_std_path().exists());
    }

    #[test]
    fn structural_errors_surface_before_persisting() {
        let (_temp, store) = temp_store();
        let err = ManifestBuilder::new(&store)
            .build(ManifestSource::MetadataTable(table(&[[
                "SAMN1",
                "SRR1",
                "host/a.fq;host/b.fq",
                "aaa",
            ]])))
            .unwrap_err();
        assert!(err.is_structural());
        assert!(!store.manifest_path().as_std_path().exists());
    }

    #[test]
    fn persisted_columns_and_statuses() {
        let (_temp, store) = temp_store();
        let mut manifest = ManifestBuilder::new(&store)
            .build(ManifestSource::MetadataTable(table(&[
                ["SAMN1", "SRR1", "host/a_1.fq;host/a_2.fq", "aaa;bbb"],
                ["SAMN2", "SRR2", "", ""],
            ])))
            .unwrap();
        manifest.tasks_mut()[0].outcomes = vec![FileStatus::Ok, FileStatus::Error];

        let resolver = ManifestBuilder::new(&store).resolver();
        let text = String::from_utf8(manifest.to_tsv(&resolver).unwrap()).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("sample_name\taccession\tfilepath\tftp_urls\tmd5sums\tn\tdownload_status")
        );
        let first = lines.next().unwrap().split('\t').collect::<Vec<_>>();
        assert_eq!(first[3], "host/a_1.fq;host/a_2.fq");
        assert_eq!(first[5], "2");
        assert_eq!(first[6], "OK;Error");
        let second = lines.next().unwrap().split('\t').collect::<Vec<_>>();
        assert_eq!(second[5], "0");
        assert_eq!(second[6], "");

        let reloaded =
            Manifest::from_tsv_reader(text.as_bytes(), &ManifestBuilder::new(&store).resolver())
                .unwrap();
        assert_eq!(
            reloaded.tasks()[0].status(),
            TaskStatus::PartiallyComplete
        );
        assert_eq!(reloaded.tasks()[1].status(), TaskStatus::NotAttempted);
    }

    #[test]
    fn unknown_status_token_names_the_row() {
        let (_temp, store) = temp_store();
        let text = "sample_name\taccession\tfilepath\tftp_urls\tmd5sums\tn\tdownload_status\n\
SAMN1\tSRR1\t\thost/a.fq\t\t1\tDone\n";
        let err =
            Manifest::from_tsv_reader(text.as_bytes(), &ManifestBuilder::new(&store).resolver())
                .unwrap_err();
        assert_matches!(err, EnaError::ManifestParse { row: 1, .. });
    }

    #[test]
    fn prebuilt_rows_without_paths_get_default_destinations() {
        let (_temp, store) = temp_store();
        let text = "sample_name\taccession\tfilepath\tftp_urls\tmd5sums\tn\tdownload_status\n\
SAMN1\tSRR1\t\thost/a.fq\t\t\t\n";
        let manifest =
            Manifest::from_tsv_reader(text.as_bytes(), &ManifestBuilder::new(&store).resolver())
                .unwrap();
        assert_eq!(
            manifest.tasks()[0].targets[0].local_path,
            store.raw_reads_dir().join("SRR1").join("a.fq").into_std_path_buf()
        );
    }

    #[test]
    fn derived_paths_round_trip_under_a_semicolon_root() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("runs;2024")).unwrap();
        let store = Store::new_with_root(root);
        let manifest = ManifestBuilder::new(&store)
            .build(ManifestSource::MetadataTable(table(&[[
                "SAMN1",
                "SRR1",
                "host/a.fq",
                "aaa",
            ]])))
            .unwrap();

        let text = std::fs::read_to_string(store.manifest_path().as_std_path()).unwrap();
        let row = text.lines().nth(1).unwrap().split('\t').collect::<Vec<_>>();
        assert_eq!(row[2], "");

        let reloaded =
            Manifest::load(&store.manifest_path(), &ManifestBuilder::new(&store).resolver())
                .unwrap();
        assert_eq!(reloaded, manifest);
    }

    #[test]
    fn explicit_paths_are_persisted() {
        let (_temp, store) = temp_store();
        let text = "sample_name\taccession\tfilepath\tftp_urls\tmd5sums\tn\tdownload_status\n\
SAMN1\tSRR1\t/data/reads/a.fq\thost/a.fq\t\t1\t\n";
        let resolver = ManifestBuilder::new(&store).resolver();
        let manifest = Manifest::from_tsv_reader(text.as_bytes(), &resolver).unwrap();
        let written = String::from_utf8(manifest.to_tsv(&resolver).unwrap()).unwrap();
        let row = written.lines().nth(1).unwrap().split('\t').collect::<Vec<_>>();
        assert_eq!(row[2], "/data/reads/a.fq");
    }

    #[test]
    fn shared_destination_is_rejected() {
        let (_temp, store) = temp_store();
        let text = "sample_name\taccession\tfilepath\tftp_urls\tmd5sums\tn\tdownload_status\n\
SAMN1\tSRR1\t/data/shared.fq\thost/a.fq\t\t1\t\n\
SAMN2\tSRR2\t/data/shared.fq\thost/b.fq\t\t1\t\n";
        let err =
            Manifest::from_tsv_reader(text.as_bytes(), &ManifestBuilder::new(&store).resolver())
                .unwrap_err();
        assert_matches!(err, EnaError::DuplicatePath { ref path } if path == "/data/shared.fq");
        assert!(err.is_structural());
    }

    #[test]
    fn files_with_the_same_name_in_one_run_are_rejected() {
        let (_temp, store) = temp_store();
        let err = ManifestBuilder::new(&store)
            .build(ManifestSource::MetadataTable(table(&[[
                "SAMN1",
                "SRR1",
                "host1/a.fq;host2/a.fq",
                "",
            ]])))
            .unwrap_err();
        assert_matches!(err, EnaError::DuplicatePath { .. });
        assert!(!store.manifest_path().as_std_path().exists());
    }
}
