use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::cancel::CancelToken;
use crate::checksum;
use crate::domain::{FileStatus, FileTarget};
use crate::error::{EnaError, TransferError};

const CHUNK_SIZE: usize = 8192;
pub const DEFAULT_NETWORK_BACKOFF: Duration = Duration::from_secs(5);
pub const DEFAULT_CHECKSUM_BACKOFF: Duration = Duration::from_secs(2);

/// Moves one remote resource into one local file. Implementations create or
/// truncate `destination`; cleanup of partial files is the caller's job.
pub trait Transport: Send + Sync {
    fn download(&self, url: &str, destination: &Path) -> Result<(), TransferError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
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
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn download(&self, url: &str, destination: &Path) -> Result<(), TransferError> {
        let mut response = self.client.get(url).send().map_err(|err| {
            if err.is_builder() {
                TransferError::Unexpected(err.to_string())
            } else {
                TransferError::Transient(err.to_string())
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Transient(format!("{url} returned status {status}")));
        }

        let mut file = File::create(destination).map_err(|err| {
            TransferError::Unexpected(format!("create {}: {err}", destination.display()))
        })?;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            let read = response
                .read(&mut buffer)
                .map_err(|err| TransferError::Transient(err.to_string()))?;
            if read == 0 {
                break;
            }
            file.write_all(&buffer[..read]).map_err(|err| {
                TransferError::Unexpected(format!("write {}: {err}", destination.display()))
            })?;
        }
        file.flush()
            .map_err(|err| TransferError::Unexpected(err.to_string()))?;
        Ok(())
    }
}

/// Rewrites archive locations to HTTPS. ENA publishes bare `host/path`
/// locations as well as `ftp://` ones; both are served over HTTPS.
pub fn normalize_location(location: &str) -> String {
    let location = location.trim();
    if let Some(rest) = location.strip_prefix("ftp://") {
        return format!("https://{rest}");
    }
    if let Some(rest) = location.strip_prefix("http://") {
        return format!("https://{rest}");
    }
    if location.contains("://") {
        return location.to_string();
    }
    format!("https://{location}")
}

pub struct FileFetcher<T: Transport> {
    transport: T,
    network_backoff: Duration,
    checksum_backoff: Duration,
    cancel: CancelToken,
}

impl<T: Transport> FileFetcher<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            network_backoff: DEFAULT_NETWORK_BACKOFF,
            checksum_backoff: DEFAULT_CHECKSUM_BACKOFF,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_backoff(mut self, network: Duration, checksum: Duration) -> Self {
        self.network_backoff = network;
        self.checksum_backoff = checksum;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn fetch(&self, target: &FileTarget, max_retries: u32, keep_failed: bool) -> FileStatus {
        let path = target.local_path.as_path();
        let expected = target.expected_checksum.as_deref();
        let name = file_label(path);

        if path.exists() {
            if checksum::verify(path, expected) {
                tracing::debug!(file = %name, "already present and valid");
                return FileStatus::Exists;
            }
            if keep_failed {
                tracing::warn!(file = %name, "existing file has incorrect MD5");
                return FileStatus::Error;
            }
            tracing::warn!(file = %name, "existing file has incorrect MD5, re-downloading");
        }

        if let Some(parent) = path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                tracing::warn!(file = %name, "unable to create {}: {err}", parent.display());
                return FileStatus::Error;
            }
        }

        let url = normalize_location(&target.remote_location);
        for attempt in 1..=max_retries {
            if self.cancel.is_cancelled() {
                remove_partial(path);
                return FileStatus::Error;
            }
            let backoff = match self.transport.download(&url, path) {
                Ok(()) => {
                    if checksum::verify(path, expected) {
                        tracing::info!(file = %name, attempt, "downloaded");
                        return FileStatus::Ok;
                    }
                    if keep_failed {
                        tracing::warn!(file = %name, "MD5 mismatch, keeping file");
                        return FileStatus::Error;
                    }
                    tracing::warn!(file = %name, attempt, max_retries, "MD5 mismatch, retrying");
                    remove_partial(path);
                    self.checksum_backoff
                }
                Err(TransferError::Transient(message)) => {
                    tracing::warn!(
                        file = %name,
                        "download attempt {attempt}/{max_retries} failed: {message}"
                    );
                    remove_partial(path);
                    self.network_backoff
                }
                Err(TransferError::Unexpected(message)) => {
                    tracing::warn!(file = %name, "unexpected error downloading {url}: {message}");
                    remove_partial(path);
                    return FileStatus::Error;
                }
            };
            if attempt < max_retries && !self.cancel.sleep(backoff) {
                return FileStatus::Error;
            }
        }
        FileStatus::Error
    }
}

fn remove_partial(path: &Path) {
    if path.exists() {
        if let Err(err) = fs::remove_file(path) {
            tracing::warn!("unable to remove {}: {err}", path.display());
        }
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
