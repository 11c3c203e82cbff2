use std::collections::{HashMap, HashSet};
use std::io::Read;

use camino::Utf8Path;
use csv::{QuoteStyle, ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};

use crate::error::EnaError;
use crate::resolver::ManifestRow;
use crate::store::Store;

/// Which metadata columns carry the fields a download needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub sample_id: String,
    pub run_id: String,
    pub file_locations: String,
    pub checksums: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            sample_id: "sample_accession".to_string(),
            run_id: "run_accession".to_string(),
            file_locations: "fastq_ftp".to_string(),
            checksums: "fastq_md5".to_string(),
        }
    }
}

/// Per-run metadata as returned by the archive file report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl MetadataTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, EnaError> {
        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(EnaError::MetadataParse(format!(
                "row {} has {} fields, expected {}",
                index + 1,
                row.len(),
                columns.len()
            )));
        }
        Ok(Self {
            columns: dedupe_columns(&columns),
            rows,
        })
    }

    /// Parses tab-separated text with a header line. Quotes are literal.
    pub fn from_tsv_reader<R: Read>(reader: R) -> Result<Self, EnaError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .quoting(false)
            .flexible(true)
            .from_reader(reader);
        let columns = reader
            .headers()
            .map_err(|err| EnaError::MetadataParse(err.to_string()))?
            .iter()
            .map(|value| value.trim().to_string())
            .collect::<Vec<_>>();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| EnaError::MetadataParse(err.to_string()))?;
            if record.iter().all(|value| value.trim().is_empty()) {
                continue;
            }
            rows.push(record.iter().map(str::to_string).collect());
        }
        Self::new(columns, rows)
    }

    pub fn read_tsv(path: &Utf8Path) -> Result<Self, EnaError> {
        if !path.as_std_path().exists() {
            return Err(EnaError::MetadataNotFound(path.as_std_path().to_path_buf()));
        }
        let file = std::fs::File::open(path.as_std_path())
            .map_err(|err| EnaError::Filesystem(format!("open {path}: {err}")))?;
        Self::from_tsv_reader(file)
    }

    pub fn to_tsv(&self) -> Result<Vec<u8>, EnaError> {
        let mut writer = WriterBuilder::new()
            .delimiter(b'\t')
            .quote_style(QuoteStyle::Never)
            .from_writer(Vec::new());
        writer
            .write_record(&self.columns)
            .map_err(|err| EnaError::Filesystem(err.to_string()))?;
        for row in &self.rows {
            writer
                .write_record(row)
                .map_err(|err| EnaError::Filesystem(err.to_string()))?;
        }
        writer
            .into_inner()
            .map_err(|err| EnaError::Filesystem(err.to_string()))
    }

    pub fn write_tsv(&self, path: &Utf8Path) -> Result<(), EnaError> {
        Store::write_bytes_atomic(path, &self.to_tsv()?)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index).map(String::as_str)
    }

    /// Non-empty values of `column` with their counts, most frequent first.
    pub fn value_counts(&self, column: &str) -> Vec<(String, usize)> {
        let Some(index) = self.column_index(column) else {
            return Vec::new();
        };
        let mut counts = HashMap::<&str, usize>::new();
        for row in &self.rows {
            let value = row[index].trim();
            if !value.is_empty() {
                *counts.entry(value).or_default() += 1;
            }
        }
        let mut counts = counts
            .into_iter()
            .map(|(value, count)| (value.to_string(), count))
            .collect::<Vec<_>>();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts
    }

    pub fn distinct_count(&self, column: &str) -> usize {
        self.value_counts(column).len()
    }

    /// Extracts download rows. Every required column is checked before any
    /// row is read; the checksum column is optional.
    pub fn manifest_rows(&self, mapping: &ColumnMapping) -> Result<Vec<ManifestRow>, EnaError> {
        let missing = [&mapping.sample_id, &mapping.run_id, &mapping.file_locations]
            .into_iter()
            .filter(|column| self.column_index(column).is_none())
            .cloned()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(EnaError::MissingColumns(missing));
        }
        let sample = self.column_index(&mapping.sample_id).unwrap_or_default();
        let run = self.column_index(&mapping.run_id).unwrap_or_default();
        let locations = self.column_index(&mapping.file_locations).unwrap_or_default();
        let checksums = self.column_index(&mapping.checksums);

        Ok(self
            .rows
            .iter()
            .map(|row| ManifestRow {
                sample_id: row[sample].trim().to_string(),
                run_id: row[run].trim().to_string(),
                file_locations: non_empty(&row[locations]),
                checksums: checksums.and_then(|index| non_empty(&row[index])),
                ..ManifestRow::default()
            })
            .collect())
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Renames repeated column names: the first occurrence keeps its name, later
/// ones get `_2`, `_3`, ... skipping any name already taken.
pub fn dedupe_columns(columns: &[String]) -> Vec<String> {
    let mut taken = columns.iter().cloned().collect::<HashSet<_>>();
    let mut seen = HashSet::new();
    let mut next_suffix = HashMap::<&str, usize>::new();
    let mut renamed = Vec::with_capacity(columns.len());
    for column in columns {
        if seen.insert(column.as_str()) {
            renamed.push(column.clone());
            continue;
        }
        let suffix = next_suffix.entry(column.as_str()).or_insert(2);
        let candidate = loop {
            let candidate = format!("{column}_{suffix}");
            *suffix += 1;
            if !taken.contains(&candidate) {
                break candidate;
            }
        };
        taken.insert(candidate.clone());
        renamed.push(candidate);
    }
    renamed
}
