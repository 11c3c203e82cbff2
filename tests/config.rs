use std::path::PathBuf;
use std::time::Duration;

use assert_matches::assert_matches;

use enatool::config::{Config, ConfigLoader};
use enatool::error::EnaError;

#[test]
fn parse_config_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("enatool.json");
    std::fs::write(
        &path,
        r#"{
            "max_retries": 5,
            "keep_failed": true,
            "network_backoff_ms": 10,
            "concurrency": 4,
            "destination": "/data/ena",
            "columns": {
                "sample_id": "secondary_sample_accession",
                "run_id": "run_accession",
                "file_locations": "submitted_ftp",
                "checksums": "submitted_md5"
            }
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.max_retries, 5);
    assert!(resolved.keep_failed);
    assert_eq!(resolved.network_backoff, Duration::from_millis(10));
    assert_eq!(resolved.checksum_backoff, Duration::from_secs(2));
    assert_eq!(resolved.timeout, Duration::from_secs(300));
    assert_eq!(resolved.destination, Some(PathBuf::from("/data/ena")));
    assert_eq!(resolved.columns.file_locations, "submitted_ftp");

    let options = resolved.run_options();
    assert_eq!(options.concurrency, 4);
    assert!(options.keep_failed);
}

#[test]
fn explicit_missing_config_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("missing.json");
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, EnaError::ConfigRead(_));
}

#[test]
fn malformed_config_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("enatool.json");
    std::fs::write(&path, r#"{"max_retries": "three"}"#).unwrap();
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, EnaError::ConfigParse(_));
}

#[test]
fn empty_config_uses_defaults() {
    let resolved = ConfigLoader::resolve_config(Config::default());
    assert_eq!(resolved.max_retries, 3);
    assert!(!resolved.keep_failed);
    assert_eq!(resolved.concurrency, 1);
}
