//! Authenticated encryption with 256-bit keys and 96-bit nonces.
//!
//! Two ciphers are supported, both with a 16-byte Poly1305/GHASH tag:
//! AES-256-GCM (file payloads) and ChaCha20-Poly1305 (backup shards).
//! Authentication failures always map to [`Error::DecryptionFailed`].

use aes_gcm::aead::{AeadInPlace, KeyInit, Nonce, Tag};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::keys::KEY_LENGTH;
use crate::rng::{random_array, RandomSource};
use strongbox_common::{Error, Result};

/// Nonce size (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size (128 bits).
pub const TAG_SIZE: usize = 16;

/// Supported AEAD algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AeadAlgorithm {
    #[default]
    #[serde(rename = "AES-256-GCM")]
    Aes256Gcm,
    #[serde(rename = "ChaCha20-Poly1305")]
    ChaCha20Poly1305,
}

impl AeadAlgorithm {
    /// Wire identifier of the algorithm.
    pub fn id(&self) -> &'static str {
        match self {
            Self::Aes256Gcm => "AES-256-GCM",
            Self::ChaCha20Poly1305 => "ChaCha20-Poly1305",
        }
    }
}

impl fmt::Display for AeadAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for AeadAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().replace('_', "-").as_str() {
            "AES-256-GCM" | "AES256GCM" => Ok(Self::Aes256Gcm),
            "CHACHA20-POLY1305" | "CHACHA20POLY1305" => Ok(Self::ChaCha20Poly1305),
            _ => Err(Error::Validation(format!("Unsupported AEAD algorithm: {}", s))),
        }
    }
}

/// Generate a random nonce.
pub fn generate_nonce(rng: &dyn RandomSource) -> [u8; NONCE_SIZE] {
    random_array(rng)
}

fn seal_with<C: AeadInPlace + KeyInit>(
    key: &[u8; KEY_LENGTH],
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    buffer: &mut Vec<u8>,
) -> Result<[u8; TAG_SIZE]> {
    let cipher = C::new_from_slice(key)
        .map_err(|e| Error::Crypto(format!("Invalid key: {}", e)))?;
    let tag = cipher
        .encrypt_in_place_detached(Nonce::<C>::from_slice(nonce), aad, buffer)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    tag.as_slice()
        .try_into()
        .map_err(|_| Error::Crypto("Unexpected tag size".to_string()))
}

fn open_with<C: AeadInPlace + KeyInit>(
    key: &[u8; KEY_LENGTH],
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
    buffer: &mut Vec<u8>,
    tag: &[u8; TAG_SIZE],
) -> Result<()> {
    let cipher = C::new_from_slice(key).map_err(|_| Error::DecryptionFailed)?;
    cipher
        .decrypt_in_place_detached(
            Nonce::<C>::from_slice(nonce),
            aad,
            buffer,
            Tag::<C>::from_slice(tag),
        )
        .map_err(|_| Error::DecryptionFailed)
}

/// Encrypt with a caller-supplied nonce, returning ciphertext and detached tag.
///
/// # Security
/// - Caller is responsible for nonce uniqueness per key
pub fn seal(
    algorithm: AeadAlgorithm,
    key: &[u8; KEY_LENGTH],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_SIZE])> {
    let mut buffer = plaintext.to_vec();
    let tag = match algorithm {
        AeadAlgorithm::Aes256Gcm => seal_with::<Aes256Gcm>(key, nonce, aad, &mut buffer)?,
        AeadAlgorithm::ChaCha20Poly1305 => {
            seal_with::<ChaCha20Poly1305>(key, nonce, aad, &mut buffer)?
        }
    };
    Ok((buffer, tag))
}

/// Decrypt a detached-tag ciphertext.
///
/// # Errors
/// - `DecryptionFailed` on any authentication failure
pub fn open(
    algorithm: AeadAlgorithm,
    key: &[u8; KEY_LENGTH],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    tag: &[u8; TAG_SIZE],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let mut buffer = ciphertext.to_vec();
    match algorithm {
        AeadAlgorithm::Aes256Gcm => open_with::<Aes256Gcm>(key, nonce, aad, &mut buffer, tag)?,
        AeadAlgorithm::ChaCha20Poly1305 => {
            open_with::<ChaCha20Poly1305>(key, nonce, aad, &mut buffer, tag)?
        }
    }
    Ok(buffer)
}

/// Encrypt with a random nonce into the self-contained format
/// `nonce || ciphertext || tag`.
pub fn encrypt(
    algorithm: AeadAlgorithm,
    key: &[u8; KEY_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
    rng: &dyn RandomSource,
) -> Result<Vec<u8>> {
    let nonce = generate_nonce(rng);
    let (ciphertext, tag) = seal(algorithm, key, &nonce, plaintext, aad)?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len() + TAG_SIZE);
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);
    result.extend_from_slice(&tag);
    Ok(result)
}

/// Decrypt the `nonce || ciphertext || tag` format produced by [`encrypt`].
pub fn decrypt(
    algorithm: AeadAlgorithm,
    key: &[u8; KEY_LENGTH],
    data: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::DecryptionFailed);
    }

    let (nonce, rest) = data.split_at(NONCE_SIZE);
    let (ciphertext, tag) = rest.split_at(rest.len() - TAG_SIZE);

    let nonce: &[u8; NONCE_SIZE] = nonce.try_into().map_err(|_| Error::DecryptionFailed)?;
    let tag: &[u8; TAG_SIZE] = tag.try_into().map_err(|_| Error::DecryptionFailed)?;

    open(algorithm, key, nonce, ciphertext, tag, aad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::{OsRandom, SeededRandom};

    const ALGORITHMS: [AeadAlgorithm; 2] =
        [AeadAlgorithm::Aes256Gcm, AeadAlgorithm::ChaCha20Poly1305];

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [42u8; KEY_LENGTH];
        for alg in ALGORITHMS {
            let ciphertext = encrypt(alg, &key, b"Hello, World!", b"aad", &OsRandom).unwrap();
            let decrypted = decrypt(alg, &key, &ciphertext, b"aad").unwrap();
            assert_eq!(decrypted, b"Hello, World!");
        }
    }

    #[test]
    fn test_ciphertext_size() {
        let key = [42u8; KEY_LENGTH];
        let plaintext = b"Test message";

        let ciphertext =
            encrypt(AeadAlgorithm::Aes256Gcm, &key, plaintext, b"", &OsRandom).unwrap();

        assert_eq!(ciphertext.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);
    }

    #[test]
    fn test_wrong_key_fails() {
        let ciphertext = encrypt(
            AeadAlgorithm::Aes256Gcm,
            &[1u8; KEY_LENGTH],
            b"Secret data",
            b"",
            &OsRandom,
        )
        .unwrap();

        let result = decrypt(AeadAlgorithm::Aes256Gcm, &[2u8; KEY_LENGTH], &ciphertext, b"");
        assert!(matches!(result, Err(Error::DecryptionFailed)));
    }

    #[test]
    fn test_wrong_algorithm_fails() {
        let key = [3u8; KEY_LENGTH];
        let ciphertext =
            encrypt(AeadAlgorithm::Aes256Gcm, &key, b"data", b"", &OsRandom).unwrap();
        assert!(decrypt(AeadAlgorithm::ChaCha20Poly1305, &key, &ciphertext, b"").is_err());
    }

    #[test]
    fn test_tampered_tag_fails() {
        let key = [42u8; KEY_LENGTH];
        let nonce = [9u8; NONCE_SIZE];
        let (ciphertext, mut tag) =
            seal(AeadAlgorithm::Aes256Gcm, &key, &nonce, b"Important data", b"").unwrap();
        tag[0] ^= 0x01;

        let result = open(AeadAlgorithm::Aes256Gcm, &key, &nonce, &ciphertext, &tag, b"");
        assert!(matches!(result, Err(Error::DecryptionFailed)));
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = [42u8; KEY_LENGTH];
        let ciphertext = encrypt(
            AeadAlgorithm::ChaCha20Poly1305,
            &key,
            b"secret",
            b"correct aad",
            &OsRandom,
        )
        .unwrap();

        let result = decrypt(AeadAlgorithm::ChaCha20Poly1305, &key, &ciphertext, b"wrong aad");
        assert!(result.is_err());
    }

    #[test]
    fn test_truncated_input_fails() {
        let key = [42u8; KEY_LENGTH];
        assert!(matches!(
            decrypt(AeadAlgorithm::Aes256Gcm, &key, &[0u8; 10], b""),
            Err(Error::DecryptionFailed)
        ));
    }

    #[test]
    fn test_seeded_nonce_is_reproducible() {
        let key = [1u8; KEY_LENGTH];
        let a = encrypt(AeadAlgorithm::Aes256Gcm, &key, b"x", b"", &SeededRandom::from_seed(5))
            .unwrap();
        let b = encrypt(AeadAlgorithm::Aes256Gcm, &key, b"x", b"", &SeededRandom::from_seed(5))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!(
            "aes-256-gcm".parse::<AeadAlgorithm>().unwrap(),
            AeadAlgorithm::Aes256Gcm
        );
        assert_eq!(
            "ChaCha20-Poly1305".parse::<AeadAlgorithm>().unwrap(),
            AeadAlgorithm::ChaCha20Poly1305
        );
        assert!("DES".parse::<AeadAlgorithm>().is_err());
        assert_eq!(
            serde_json::to_string(&AeadAlgorithm::Aes256Gcm).unwrap(),
            "\"AES-256-GCM\""
        );
    }
}
