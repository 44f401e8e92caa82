//! Integrity manifest for package archives.
//!
//! Every archive carries, as its final member, a plain-text file named
//! `checksum` listing one line per preceding member: the standard base64
//! encoding of the member's SHA-256 digest, a single space, and the
//! member's archive path.

use crate::collect::{CollectedFile, FileContents};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use thiserror::Error;

/// Archive path of the integrity manifest, always the last member.
pub const CHECKSUM_PATH: &str = "checksum";

/// Length of a base64-encoded SHA-256 digest.
const DIGEST_LEN: usize = 44;

/// Errors raised while producing or parsing an integrity manifest.
#[derive(Error, Debug)]
pub enum ChecksumError {
    #[error("cannot read '{path}' for checksumming")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("malformed checksum line {line}: {reason}")]
    Malformed { line: usize, reason: &'static str },
}

/// Differences between an archive's recorded and actual digests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChecksumReport {
    /// Members whose contents no longer match their recorded digest.
    pub mismatched: Vec<String>,
    /// Members recorded in the manifest but absent from the archive.
    pub missing: Vec<String>,
    /// Members present in the archive but not recorded.
    pub unexpected: Vec<String>,
}

impl ChecksumReport {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.mismatched.is_empty() && self.missing.is_empty() && self.unexpected.is_empty()
    }
}

/// Base64 SHA-256 digest of everything readable from `reader`.
///
/// # Errors
///
/// Propagates read failures.
pub fn digest_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(BASE64.encode(hasher.finalize()))
}

fn digest_file(path: &Path) -> Result<String, ChecksumError> {
    let map_err = |source| ChecksumError::Io {
        path: path.display().to_string(),
        source,
    };
    let file = File::open(path).map_err(map_err)?;
    digest_reader(io::BufReader::new(file)).map_err(map_err)
}

/// Digest one collected member, streaming on-disk contents.
///
/// # Errors
///
/// Fails when an on-disk member cannot be read.
pub fn digest_member(file: &CollectedFile) -> Result<String, ChecksumError> {
    match &file.contents {
        FileContents::OnDisk(path) => digest_file(path),
        FileContents::InMemory(bytes) => {
            digest_reader(bytes.as_slice()).map_err(|source| ChecksumError::Io {
                path: file.path.clone(),
                source,
            })
        }
    }
}

/// Build the integrity manifest for `files`, in list order, as an
/// in-memory member ready to append to the archive.
///
/// # Errors
///
/// Fails when any member cannot be read.
pub fn create_checksum_file(files: &[CollectedFile]) -> Result<CollectedFile, ChecksumError> {
    let mut body = String::new();
    for file in files {
        let digest = digest_member(file)?;
        body.push_str(&digest);
        body.push(' ');
        body.push_str(&file.path);
        body.push('\n');
    }
    Ok(CollectedFile::in_memory(CHECKSUM_PATH, body.into_bytes()))
}

/// Parse an integrity manifest into a path → digest map.
///
/// # Errors
///
/// Fails on any line that is not exactly a 44-character base64 digest,
/// one space, and a non-empty path.
pub fn parse_checksum_file(raw: &str) -> Result<BTreeMap<String, String>, ChecksumError> {
    let mut entries = BTreeMap::new();
    for (idx, line) in raw.lines().enumerate() {
        let line_no = idx + 1;
        let Some((digest, path)) = line.split_once(' ') else {
            return Err(ChecksumError::Malformed {
                line: line_no,
                reason: "expected '<digest> <path>'",
            });
        };
        if digest.len() != DIGEST_LEN
            || !digest
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
        {
            return Err(ChecksumError::Malformed {
                line: line_no,
                reason: "digest is not base64 SHA-256",
            });
        }
        if path.is_empty() {
            return Err(ChecksumError::Malformed {
                line: line_no,
                reason: "empty member path",
            });
        }
        entries.insert(path.to_string(), digest.to_string());
    }
    Ok(entries)
}

/// Compare recorded digests against the digests actually observed.
#[must_use]
pub fn compare(
    recorded: &BTreeMap<String, String>,
    actual: &BTreeMap<String, String>,
) -> ChecksumReport {
    let mut report = ChecksumReport::default();
    for (path, digest) in recorded {
        match actual.get(path) {
            Some(found) if found == digest => {}
            Some(_) => report.mismatched.push(path.clone()),
            None => report.missing.push(path.clone()),
        }
    }
    for path in actual.keys() {
        if !recorded.contains_key(path) {
            report.unexpected.push(path.clone());
        }
    }
    report
}
