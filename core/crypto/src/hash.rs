//! File hashing.
//!
//! In-memory and streaming digests over MD5, SHA-1 and the SHA-2 family.
//! Streaming reads through a bounded buffer so large files are never
//! materialized.

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Instant;
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncReadExt};

use strongbox_common::{Error, Result};

/// Default streaming buffer size (8 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Wire name (`MD5`, `SHA1`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
            Self::Sha384 => "SHA384",
            Self::Sha512 => "SHA512",
        }
    }

    /// Digest length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_uppercase();

        match normalized.as_str() {
            "MD5" => Ok(Self::Md5),
            "SHA1" => Ok(Self::Sha1),
            "SHA256" => Ok(Self::Sha256),
            "SHA384" => Ok(Self::Sha384),
            "SHA512" => Ok(Self::Sha512),
            _ => Err(Error::Validation(format!("Unsupported hash algorithm: {}", s))),
        }
    }
}

enum Hasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => Self::Md5(Md5::new()),
            HashAlgorithm::Sha1 => Self::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => Self::Sha384(Sha384::new()),
            HashAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Self::Md5(h) => h.finalize().to_vec(),
            Self::Sha1(h) => h.finalize().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha384(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// Result of hashing a file or buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashReport {
    /// Lowercase hex digest.
    pub hash: String,
    pub algorithm: HashAlgorithm,
    /// Number of bytes hashed.
    pub size: u64,
    /// Wall time spent hashing, in milliseconds.
    pub elapsed_ms: u64,
}

fn digest_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Vec<u8> {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Hash an in-memory buffer, returning a lowercase hex digest.
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> String {
    hex::encode(digest_bytes(algorithm, data))
}

/// Hash a buffer and report size and timing.
pub fn hash_bytes_report(algorithm: HashAlgorithm, data: &[u8]) -> HashReport {
    let started = Instant::now();
    let hash = hash_bytes(algorithm, data);
    HashReport {
        hash,
        algorithm,
        size: data.len() as u64,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

/// Hash a stream in chunks of `buffer_size` bytes.
///
/// Returns the hex digest and the number of bytes read.
pub async fn hash_reader<R>(
    reader: &mut R,
    algorithm: HashAlgorithm,
    buffer_size: usize,
) -> Result<(String, u64)>
where
    R: AsyncRead + Unpin,
{
    if buffer_size == 0 {
        return Err(Error::Validation(
            "Buffer size must be greater than zero".to_string(),
        ));
    }

    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; buffer_size];
    let mut total = 0u64;

    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total += read as u64;
    }

    Ok((hex::encode(hasher.finalize()), total))
}

/// Hash a file from disk with the default buffer size.
pub async fn hash_file(path: impl AsRef<Path>, algorithm: HashAlgorithm) -> Result<HashReport> {
    let path = path.as_ref();
    let started = Instant::now();
    let mut file = tokio::fs::File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(path.display().to_string())
        } else {
            Error::Io(e)
        }
    })?;

    let (hash, size) = hash_reader(&mut file, algorithm, DEFAULT_BUFFER_SIZE).await?;
    Ok(HashReport {
        hash,
        algorithm,
        size,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

/// Compare a computed digest with an expected hex string.
///
/// Case-insensitive; malformed hex never matches.
pub fn digest_matches(actual_hex: &str, expected_hex: &str) -> bool {
    let (Ok(actual), Ok(expected)) = (
        hex::decode(actual_hex.trim()),
        hex::decode(expected_hex.trim()),
    ) else {
        return false;
    };
    actual.len() == expected.len() && bool::from(actual.ct_eq(&expected))
}

/// Check a buffer against an expected hex digest.
pub fn verify_hash(data: &[u8], expected_hex: &str, algorithm: HashAlgorithm) -> bool {
    let Ok(expected) = hex::decode(expected_hex.trim()) else {
        return false;
    };
    let actual = digest_bytes(algorithm, data);
    actual.len() == expected.len() && bool::from(actual.ct_eq(&expected))
}

/// Check a file on disk against an expected hex digest.
pub async fn verify_file_hash(
    path: impl AsRef<Path>,
    expected_hex: &str,
    algorithm: HashAlgorithm,
) -> Result<bool> {
    let report = hash_file(path, algorithm).await?;
    Ok(digest_matches(&report.hash, expected_hex))
}
