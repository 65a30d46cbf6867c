//! Integrity records and verification verdicts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::hash::{digest_matches, hash_bytes, hash_file, HashAlgorithm};
use strongbox_common::Result;

/// Expected state of a file: digest, size and provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityRecord {
    pub hash: String,
    pub algorithm: HashAlgorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl IntegrityRecord {
    /// Build a record for a file on disk.
    pub async fn create(
        path: impl AsRef<Path>,
        algorithm: HashAlgorithm,
        metadata: BTreeMap<String, String>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let report = hash_file(path, algorithm).await?;
        Ok(Self {
            hash: report.hash,
            algorithm,
            source_path: Some(path.to_path_buf()),
            size: report.size,
            created_at: Utc::now(),
            metadata,
        })
    }

    /// Build a record for an in-memory buffer.
    pub fn for_bytes(
        data: &[u8],
        algorithm: HashAlgorithm,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            hash: hash_bytes(algorithm, data),
            algorithm,
            source_path: None,
            size: data.len() as u64,
            created_at: Utc::now(),
            metadata,
        }
    }
}

/// First check that failed during verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntegrityFailure {
    FileNotFound,
    SizeMismatch,
    HashMismatch,
    Unreadable,
}

impl fmt::Display for IntegrityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileNotFound => f.write_str("File not found"),
            Self::SizeMismatch => f.write_str("File size mismatch"),
            Self::HashMismatch => f.write_str("File hash mismatch"),
            Self::Unreadable => f.write_str("File could not be read"),
        }
    }
}

/// Outcome of [`verify_integrity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityVerdict {
    pub valid: bool,
    pub reason: Option<IntegrityFailure>,
    pub expected_size: u64,
    pub actual_size: Option<u64>,
    pub expected_hash: String,
    pub actual_hash: Option<String>,
}

impl IntegrityVerdict {
    fn new(record: &IntegrityRecord) -> Self {
        Self {
            valid: false,
            reason: None,
            expected_size: record.size,
            actual_size: None,
            expected_hash: record.hash.clone(),
            actual_hash: None,
        }
    }

    fn fail(mut self, reason: IntegrityFailure) -> Self {
        self.valid = false;
        self.reason = Some(reason);
        self
    }
}

/// Verify a file against a record.
///
/// Checks run in order (existence, size, digest) and stop at the first
/// failure, which becomes the verdict's `reason`. Never returns an error.
pub async fn verify_integrity(path: impl AsRef<Path>, record: &IntegrityRecord) -> IntegrityVerdict {
    let path = path.as_ref();
    let mut verdict = IntegrityVerdict::new(record);

    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => return verdict.fail(IntegrityFailure::FileNotFound),
    };

    verdict.actual_size = Some(metadata.len());
    if metadata.len() != record.size {
        debug!(path = %path.display(), expected = record.size, actual = metadata.len(), "Size mismatch");
        return verdict.fail(IntegrityFailure::SizeMismatch);
    }

    let report = match hash_file(path, record.algorithm).await {
        Ok(report) => report,
        Err(_) => return verdict.fail(IntegrityFailure::Unreadable),
    };

    let matches = digest_matches(&report.hash, &record.hash);
    verdict.actual_hash = Some(report.hash);
    if !matches {
        return verdict.fail(IntegrityFailure::HashMismatch);
    }

    verdict.valid = true;
    verdict
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(data: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_valid_file() {
        let file = write_temp(b"ledger");
        let mut meta = BTreeMap::new();
        meta.insert("owner".to_string(), "ops".to_string());

        let record = IntegrityRecord::create(file.path(), HashAlgorithm::Sha512, meta)
            .await
            .unwrap();
        assert_eq!(record.size, 6);
        assert_eq!(record.metadata["owner"], "ops");

        let verdict = verify_integrity(file.path(), &record).await;
        assert!(verdict.valid);
        assert_eq!(verdict.reason, None);
        assert_eq!(verdict.actual_hash.as_deref(), Some(record.hash.as_str()));
    }

    #[tokio::test]
    async fn test_missing_file_reported_first() {
        let record = IntegrityRecord::for_bytes(b"x", HashAlgorithm::Sha256, BTreeMap::new());
        let dir = tempfile::tempdir().unwrap();

        let verdict = verify_integrity(dir.path().join("gone"), &record).await;
        assert!(!verdict.valid);
        assert_eq!(verdict.reason, Some(IntegrityFailure::FileNotFound));
        assert_eq!(verdict.actual_size, None);
    }

    #[tokio::test]
    async fn test_size_checked_before_hash() {
        let file = write_temp(b"longer contents");
        let record = IntegrityRecord::for_bytes(b"short", HashAlgorithm::Sha256, BTreeMap::new());

        let verdict = verify_integrity(file.path(), &record).await;
        assert_eq!(verdict.reason, Some(IntegrityFailure::SizeMismatch));
        assert_eq!(verdict.actual_size, Some(15));
        assert_eq!(verdict.actual_hash, None);
    }

    #[tokio::test]
    async fn test_hash_mismatch_same_size() {
        let file = write_temp(b"abcde");
        let record = IntegrityRecord::for_bytes(b"edcba", HashAlgorithm::Md5, BTreeMap::new());

        let verdict = verify_integrity(file.path(), &record).await;
        assert_eq!(verdict.reason, Some(IntegrityFailure::HashMismatch));
        assert!(verdict.actual_hash.is_some());
    }

    #[tokio::test]
    async fn test_uppercase_record_hash_accepted() {
        let file = write_temp(b"abcde");
        let mut record = IntegrityRecord::for_bytes(b"abcde", HashAlgorithm::Sha1, BTreeMap::new());
        record.hash = record.hash.to_uppercase();

        assert!(verify_integrity(file.path(), &record).await.valid);
    }
}
