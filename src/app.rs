use std::path::PathBuf;

use camino::Utf8Path;
use serde::Serialize;

use crate::coordinator::{BatchCoordinator, ProgressEvent, ProgressSink, RunOptions};
use crate::domain::{ProjectAccession, TaskStatus};
use crate::ena::MetadataClient;
use crate::error::EnaError;
use crate::fetcher::{FileFetcher, Transport};
use crate::manifest::{Manifest, ManifestBuilder, ManifestSource};
use crate::metadata::{ColumnMapping, MetadataTable};
use crate::store::Store;
use crate::summary::RunSummary;

#[derive(Debug, Clone, Serialize)]
pub struct MetadataResult {
    pub project: String,
    pub path: String,
    pub runs: usize,
    pub columns: usize,
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Query the archive again instead of reading the saved metadata table.
    pub refresh_metadata: bool,
    /// Prebuilt manifest to download from.
    pub manifest_path: Option<PathBuf>,
    pub options: RunOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct IncompleteRun {
    pub run: String,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub project: String,
    pub manifest_path: String,
    pub summary: RunSummary,
    pub incomplete: Vec<IncompleteRun>,
    pub finished_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoResult {
    pub project: String,
    pub runs: usize,
    pub samples: usize,
    pub scientific_names: Vec<ValueCount>,
    pub platforms: Vec<ValueCount>,
    pub library_strategies: Vec<ValueCount>,
    pub library_layouts: Vec<ValueCount>,
    pub manifest: Option<RunSummary>,
}

pub struct App<M: MetadataClient, T: Transport> {
    store: Store,
    project: ProjectAccession,
    metadata: M,
    fetcher: FileFetcher<T>,
    columns: ColumnMapping,
}

impl<M: MetadataClient, T: Transport> App<M, T> {
    pub fn new(store: Store, project: ProjectAccession, metadata: M, fetcher: FileFetcher<T>) -> Self {
        Self {
            store,
            project,
            metadata,
            fetcher,
            columns: ColumnMapping::default(),
        }
    }

    pub fn with_columns(mut self, columns: ColumnMapping) -> Self {
        self.columns = columns;
        self
    }

    pub fn fetch_metadata(&self, sink: &dyn ProgressSink) -> Result<MetadataResult, EnaError> {
        let table = self.refresh_table(sink)?;
        let path = self.store.metadata_path(&self.project);
        Ok(MetadataResult {
            project: self.project.to_string(),
            path: path.to_string(),
            runs: table.len(),
            columns: table.columns().len(),
        })
    }

    pub fn download(
        &self,
        request: DownloadRequest,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadResult, EnaError> {
        let builder = ManifestBuilder::new(&self.store).with_mapping(self.columns.clone());

        let prebuilt = match &request.manifest_path {
            Some(path) => {
                let path = Utf8Path::from_path(path).ok_or_else(|| {
                    EnaError::Filesystem(format!("non UTF-8 path: {}", path.display()))
                })?;
                sink.event(stage_event(format!("phase=Resolve; reading manifest {path}")));
                Some(Manifest::load(path, &builder.resolver())?)
            }
            None => None,
        };
        let table = if request.refresh_metadata {
            Some(self.refresh_table(sink)?)
        } else if prebuilt.is_none() {
            Some(self.saved_table()?)
        } else {
            None
        };

        let manifest = builder.build(ManifestSource::from_parts(table, prebuilt)?)?;
        sink.event(stage_event(format!(
            "phase=Fetch; {} runs to process",
            manifest.len()
        )));

        let coordinator = BatchCoordinator::new(&self.fetcher, &self.store);
        let (manifest, summary) = coordinator.run(manifest, &request.options, sink)?;

        let incomplete = manifest
            .tasks()
            .iter()
            .filter(|task| !task.targets.is_empty() && task.status() != TaskStatus::Complete)
            .map(|task| IncompleteRun {
                run: task.run_id.to_string(),
                status: task.status(),
            })
            .collect();

        Ok(DownloadResult {
            project: self.project.to_string(),
            manifest_path: self.store.manifest_path().to_string(),
            summary,
            incomplete,
            finished_at: iso_timestamp(),
        })
    }

    pub fn info(&self, sink: &dyn ProgressSink) -> Result<InfoResult, EnaError> {
        sink.event(stage_event(format!(
            "phase=Resolve; reading {}",
            self.store.root()
        )));
        let table = self.saved_table()?;

        let manifest_path = self.store.manifest_path();
        let manifest = if manifest_path.as_std_path().exists() {
            let resolver = ManifestBuilder::new(&self.store).resolver();
            Some(Manifest::load(&manifest_path, &resolver)?.summary())
        } else {
            None
        };

        let counts = |column: &str| {
            table
                .value_counts(column)
                .into_iter()
                .map(|(value, count)| ValueCount { value, count })
                .collect::<Vec<_>>()
        };

        Ok(InfoResult {
            project: self.project.to_string(),
            runs: table.len(),
            samples: table.distinct_count(&self.columns.sample_id),
            scientific_names: counts("scientific_name"),
            platforms: counts("instrument_platform"),
            library_strategies: counts("library_strategy"),
            library_layouts: counts("library_layout"),
            manifest,
        })
    }

    fn refresh_table(&self, sink: &dyn ProgressSink) -> Result<MetadataTable, EnaError> {
        sink.event(stage_event(format!(
            "phase=Resolve; requesting file report for {}",
            self.project
        )));
        let table = self.metadata.file_report(&self.project)?;
        self.store.ensure_root()?;
        let path = self.store.metadata_path(&self.project);
        table.write_tsv(&path)?;
        tracing::info!(path = %path, runs = table.len(), "metadata table saved");
        sink.event(stage_event(format!("phase=Store; saved {path}")));
        Ok(table)
    }

    fn saved_table(&self) -> Result<MetadataTable, EnaError> {
        MetadataTable::read_tsv(&self.store.metadata_path(&self.project))
    }
}

fn stage_event(message: String) -> ProgressEvent {
    ProgressEvent {
        position: 0,
        total: 0,
        run: None,
        status: None,
        message,
        elapsed: None,
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
