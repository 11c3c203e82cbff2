use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use md5::{Digest, Md5};

const CHUNK_SIZE: usize = 64 * 1024;

/// Lowercase hex MD5 of the file content, read in fixed-size chunks.
pub fn md5_hex(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Checks a local file against the published checksum. A missing or blank
/// expectation always passes. An unreadable file never does.
pub fn verify(path: &Path, expected: Option<&str>) -> bool {
    let Some(expected) = expected.map(str::trim).filter(|value| !value.is_empty()) else {
        return true;
    };
    match md5_hex(path) {
        Ok(actual) => actual.eq_ignore_ascii_case(expected),
        Err(err) => {
            tracing::warn!(path = %path.display(), "unable to hash file: {err}");
            false
        }
    }
}
