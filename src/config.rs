use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::coordinator::RunOptions;
use crate::error::EnaError;
use crate::metadata::ColumnMapping;

pub const CONFIG_FILE_NAME: &str = "enatool.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub keep_failed: Option<bool>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub network_backoff_ms: Option<u64>,
    #[serde(default)]
    pub checksum_backoff_ms: Option<u64>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub destination: Option<PathBuf>,
    #[serde(default)]
    pub columns: Option<ColumnMapping>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub max_retries: u32,
    pub keep_failed: bool,
    pub timeout: Duration,
    pub network_backoff: Duration,
    pub checksum_backoff: Duration,
    pub concurrency: usize,
    pub destination: Option<PathBuf>,
    pub columns: ColumnMapping,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        ConfigLoader::resolve_config(Config::default())
    }
}

impl ResolvedConfig {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            max_retries: self.max_retries,
            keep_failed: self.keep_failed,
            concurrency: self.concurrency,
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must exist. Without one, `enatool.json` in the working
    /// directory is tried, then the per-user config directory, then defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, EnaError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::discover(),
        };
        let Some(config_path) = config_path else {
            return Ok(ResolvedConfig::default());
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| EnaError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| EnaError::ConfigParse(err.to_string()))?;
        tracing::debug!(path = %config_path.display(), "config loaded");

        Ok(Self::resolve_config(config))
    }

    pub fn resolve_config(config: Config) -> ResolvedConfig {
        ResolvedConfig {
            max_retries: config.max_retries.unwrap_or(3),
            keep_failed: config.keep_failed.unwrap_or(false),
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(300)),
            network_backoff: Duration::from_millis(config.network_backoff_ms.unwrap_or(5000)),
            checksum_backoff: Duration::from_millis(config.checksum_backoff_ms.unwrap_or(2000)),
            concurrency: config.concurrency.unwrap_or(1).max(1),
            destination: config.destination,
            columns: config.columns.unwrap_or_default(),
        }
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("enatool").join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_config() {
        let resolved = ConfigLoader::resolve_config(Config::default());
        assert_eq!(resolved.max_retries, 3);
        assert!(!resolved.keep_failed);
        assert_eq!(resolved.timeout, Duration::from_secs(300));
        assert_eq!(resolved.network_backoff, Duration::from_secs(5));
        assert_eq!(resolved.checksum_backoff, Duration::from_secs(2));
        assert_eq!(resolved.concurrency, 1);
        assert_eq!(resolved.destination, None);
        assert_eq!(resolved.columns, ColumnMapping::default());
    }

    #[test]
    fn zero_concurrency_means_sequential() {
        let config = Config {
            concurrency: Some(0),
            max_retries: Some(0),
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_config(config);
        assert_eq!(resolved.concurrency, 1);
        assert_eq!(resolved.run_options().max_retries, 0);
    }
}
