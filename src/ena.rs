use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::cancel::CancelToken;
use crate::domain::ProjectAccession;
use crate::error::EnaError;
use crate::metadata::MetadataTable;

pub const ENA_PORTAL_API_BASE: &str = "https://www.ebi.ac.uk/ena/portal/api";

/// Columns requested from the file report.
pub const FILE_REPORT_FIELDS: &[&str] = &[
    "study_accession",
    "secondary_study_accession",
    "sample_accession",
    "secondary_sample_accession",
    "experiment_accession",
    "run_accession",
    "submission_accession",
    "tax_id",
    "scientific_name",
    "instrument_platform",
    "instrument_model",
    "library_name",
    "nominal_length",
    "library_layout",
    "library_strategy",
    "library_source",
    "library_selection",
    "read_count",
    "base_count",
    "center_name",
    "first_public",
    "last_updated",
    "experiment_title",
    "study_title",
    "study_alias",
    "experiment_alias",
    "run_alias",
    "fastq_bytes",
    "fastq_md5",
    "fastq_ftp",
    "fastq_aspera",
    "fastq_galaxy",
    "submitted_bytes",
    "submitted_md5",
    "submitted_ftp",
    "submitted_aspera",
    "submitted_galaxy",
    "submitted_format",
    "sra_bytes",
    "sra_md5",
    "sra_ftp",
    "sra_aspera",
    "sra_galaxy",
    "sample_alias",
    "broker_name",
    "sample_title",
    "nominal_sdev",
    "first_created",
];

pub trait MetadataClient: Send + Sync {
    fn file_report(&self, project: &ProjectAccession) -> Result<MetadataTable, EnaError>;
}

#[derive(Clone)]
pub struct EnaPortalClient {
    client: Client,
    base_url: String,
    cancel: CancelToken,
}

impl EnaPortalClient {
    pub fn new(timeout: Duration) -> Result<Self, EnaError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("enatool/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EnaError::EnaHttp(err.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| EnaError::EnaHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: ENA_PORTAL_API_BASE.to_string(),
            cancel: CancelToken::new(),
        })
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn file_report_url(&self, project: &ProjectAccession) -> String {
        file_report_url(&self.base_url, project)
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, EnaError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        for attempt in 0..=MAX_RETRIES {
            if self.cancel.is_cancelled() {
                return Err(EnaError::Cancelled);
            }
            match make_req().send() {
                Ok(resp) if attempt < MAX_RETRIES && is_retryable_status(resp.status().as_u16()) => {
                    let status = resp.status().as_u16();
                    tracing::debug!(status, attempt, "file report request retrying");
                }
                Ok(resp) => return Ok(resp),
                Err(err) if attempt < MAX_RETRIES && is_retryable_error(&err) => {
                    tracing::debug!(attempt, "file report request failed: {err}");
                }
                Err(err) => return Err(EnaError::EnaHttp(err.to_string())),
            }
            let delay = Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1));
            if !self.cancel.sleep(delay) {
                return Err(EnaError::Cancelled);
            }
        }
        Err(EnaError::EnaHttp("file report retries exhausted".to_string()))
    }
}

impl MetadataClient for EnaPortalClient {
    fn file_report(&self, project: &ProjectAccession) -> Result<MetadataTable, EnaError> {
        let url = self.file_report_url(project);
        tracing::info!(project = %project, "requesting file report");
        let response = self.send_with_retries(|| self.client.get(&url))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "ENA request failed".to_string());
            return Err(EnaError::EnaStatus { status, message });
        }
        let body = response
            .text()
            .map_err(|err| EnaError::EnaHttp(err.to_string()))?;
        parse_file_report(project, &body)
    }
}

pub fn file_report_url(base_url: &str, project: &ProjectAccession) -> String {
    format!(
        "{}/filereport?accession={}&result=read_run&fields={}&format=tsv&download=true",
        base_url.trim_end_matches('/'),
        project,
        FILE_REPORT_FIELDS.join(",")
    )
}

/// ENA answers an unknown or empty project with an empty body.
pub fn parse_file_report(project: &ProjectAccession, body: &str) -> Result<MetadataTable, EnaError> {
    if body.trim().is_empty() {
        return Err(EnaError::MetadataParse(format!(
            "ENA returned no runs for {project}"
        )));
    }
    let table = MetadataTable::from_tsv_reader(body.as_bytes())?;
    tracing::info!(project = %project, runs = table.len(), "file report received");
    Ok(table)
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn file_report_url_lists_fields() {
        let project: ProjectAccession = "PRJNA335681".parse().unwrap();
        let url = file_report_url(ENA_PORTAL_API_BASE, &project);
        assert!(url.starts_with(
            "https://www.ebi.ac.uk/ena/portal/api/filereport?accession=PRJNA335681&result=read_run&fields=study_accession,secondary_study_accession,"
        ));
        assert!(url.ends_with("first_created&format=tsv&download=true"));
        assert!(url.contains("fastq_md5,fastq_ftp"));
    }

    #[test]
    fn trailing_slash_in_base_is_ignored() {
        let project: ProjectAccession = "PRJEB1".parse().unwrap();
        assert!(
            file_report_url("http://localhost:8080/", &project)
                .starts_with("http://localhost:8080/filereport?accession=PRJEB1&")
        );
    }

    #[test]
    fn empty_report_is_an_error() {
        let project: ProjectAccession = "PRJEB1".parse().unwrap();
        assert_matches!(
            parse_file_report(&project, "\n").unwrap_err(),
            EnaError::MetadataParse(_)
        );
    }

    #[test]
    fn cancelled_client_sends_nothing() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut client = EnaPortalClient::new(Duration::from_secs(1))
            .unwrap()
            .with_cancel(cancel);
        client.base_url = "http://127.0.0.1:1".to_string();
        let project: ProjectAccession = "PRJEB1".parse().unwrap();
        assert_matches!(client.file_report(&project).unwrap_err(), EnaError::Cancelled);
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(404));
    }
}
