//! Hybrid escrow of a symmetric key to a P-384 public key.
//!
//! 1. A fresh content key encrypts the escrowed key (AES-256-GCM)
//! 2. An ephemeral P-384 scalar does ECDH with the recipient's point
//! 3. HKDF-SHA256 over the shared secret yields the key-encryption key
//! 4. The KEK wraps the content key (AES-256-GCM)
//!
//! The caller's context bytes are authenticated with the escrowed key;
//! release only succeeds with the same context.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hkdf::Hkdf;
use p384::ecdh::diffie_hellman;
use p384::PublicKey;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::keypair::{random_secret, TimelockPrivateKey, TimelockPublicKey};
use strongbox_common::{base64_bytes, Error, Result};
use strongbox_crypto::aead::{self, AeadAlgorithm, NONCE_SIZE, TAG_SIZE};
use strongbox_crypto::rng::random_array;
use strongbox_crypto::{FileKey, RandomSource, KEY_LENGTH};

/// Current escrow format version.
pub const ESCROW_VERSION: u8 = 1;

const KEK_INFO: &[u8] = b"strongbox/v1/timelock-kek";
const WRAP_AAD: &[u8] = b"strongbox/v1/timelock-wrap";
const KEY_AAD: &[u8] = b"strongbox/v1/timelock-key";

/// A symmetric key wrapped to a timelock public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowedKey {
    pub version: u8,
    /// SEC1 point of the ephemeral key used for ECDH.
    #[serde(with = "base64_bytes")]
    pub ephemeral_public_key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub wrap_nonce: Vec<u8>,
    /// Content key under the KEK, ciphertext followed by tag.
    #[serde(with = "base64_bytes")]
    pub wrapped_content_key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub key_nonce: Vec<u8>,
    /// Escrowed key under the content key, ciphertext followed by tag.
    #[serde(with = "base64_bytes")]
    pub encrypted_file_key: Vec<u8>,
}

impl EscrowedKey {
    /// Compact wire form: base64 of the JSON encoding.
    pub fn to_base64(&self) -> Result<String> {
        Ok(STANDARD.encode(serde_json::to_vec(self)?))
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let json = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::InvalidInput(format!("Invalid escrowed key encoding: {}", e)))?;
        Ok(serde_json::from_slice(&json)?)
    }
}

fn derive_kek(
    shared_secret: &[u8],
    ephemeral: &[u8],
    recipient: &[u8],
) -> Result<Zeroizing<[u8; KEY_LENGTH]>> {
    let mut salt = Vec::with_capacity(ephemeral.len() + recipient.len());
    salt.extend_from_slice(ephemeral);
    salt.extend_from_slice(recipient);

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared_secret);
    let mut kek = Zeroizing::new([0u8; KEY_LENGTH]);
    hk.expand(KEK_INFO, kek.as_mut_slice())
        .map_err(|e| Error::Crypto(format!("HKDF expand failed: {}", e)))?;
    Ok(kek)
}

fn seal_combined(
    key: &[u8; KEY_LENGTH],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let (mut ciphertext, tag) = aead::seal(AeadAlgorithm::Aes256Gcm, key, nonce, plaintext, aad)?;
    ciphertext.extend_from_slice(&tag);
    Ok(ciphertext)
}

fn open_combined(key: &[u8; KEY_LENGTH], nonce: &[u8], data: &[u8], aad: &[u8]) -> Option<Vec<u8>> {
    let nonce: &[u8; NONCE_SIZE] = nonce.try_into().ok()?;
    let split = data.len().checked_sub(TAG_SIZE)?;
    let (ciphertext, tag) = data.split_at(split);
    let tag: &[u8; TAG_SIZE] = tag.try_into().ok()?;
    aead::open(AeadAlgorithm::Aes256Gcm, key, nonce, ciphertext, tag, aad).ok()
}

fn key_aad(context: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(KEY_AAD.len() + 8 + context.len());
    aad.extend_from_slice(KEY_AAD);
    aad.extend_from_slice(&(context.len() as u64).to_be_bytes());
    aad.extend_from_slice(context);
    aad
}

/// Wrap `file_key` so only the holder of `recipient`'s private key can
/// recover it, and only under the same `context`.
///
/// # Postconditions
/// - Fresh content key, ephemeral scalar and nonces per call
/// - `release_file_key(escrow_file_key(k, pk, c), sk, c) == Some(k)`
pub fn escrow_file_key(
    file_key: &FileKey,
    recipient: &TimelockPublicKey,
    context: &[u8],
    rng: &dyn RandomSource,
) -> Result<EscrowedKey> {
    let content_key = FileKey::generate(rng);
    let key_nonce: [u8; NONCE_SIZE] = random_array(rng);
    let encrypted_file_key = seal_combined(
        content_key.as_bytes(),
        &key_nonce,
        file_key.as_bytes(),
        &key_aad(context),
    )?;

    let ephemeral = random_secret(rng)?;
    let ephemeral_public = ephemeral.public_key().to_sec1_bytes().to_vec();
    let shared = diffie_hellman(ephemeral.to_nonzero_scalar(), recipient.inner().as_affine());
    let kek = derive_kek(
        shared.raw_secret_bytes().as_slice(),
        &ephemeral_public,
        &recipient.to_sec1_bytes(),
    )?;

    let wrap_nonce: [u8; NONCE_SIZE] = random_array(rng);
    let wrapped_content_key =
        seal_combined(&kek, &wrap_nonce, content_key.as_bytes(), WRAP_AAD)?;

    Ok(EscrowedKey {
        version: ESCROW_VERSION,
        ephemeral_public_key: ephemeral_public,
        wrap_nonce: wrap_nonce.to_vec(),
        wrapped_content_key,
        key_nonce: key_nonce.to_vec(),
        encrypted_file_key,
    })
}

/// Recover an escrowed key.
///
/// Returns `None` on any failure (wrong private key, tampered blob,
/// different context, unknown version); the cause is not reported.
pub fn release_file_key(
    escrowed: &EscrowedKey,
    private_key: &TimelockPrivateKey,
    context: &[u8],
) -> Option<FileKey> {
    if escrowed.version != ESCROW_VERSION {
        return None;
    }

    let ephemeral = PublicKey::from_sec1_bytes(&escrowed.ephemeral_public_key).ok()?;
    let shared = diffie_hellman(private_key.inner().to_nonzero_scalar(), ephemeral.as_affine());
    let kek = derive_kek(
        shared.raw_secret_bytes().as_slice(),
        &escrowed.ephemeral_public_key,
        &private_key.public_key().to_sec1_bytes(),
    )
    .ok()?;

    let content_key = Zeroizing::new(open_combined(
        &kek,
        &escrowed.wrap_nonce,
        &escrowed.wrapped_content_key,
        WRAP_AAD,
    )?);
    let content_key = FileKey::from_slice(&content_key).ok()?;

    let file_key = Zeroizing::new(open_combined(
        content_key.as_bytes(),
        &escrowed.key_nonce,
        &escrowed.encrypted_file_key,
        &key_aad(context),
    )?);
    FileKey::from_slice(&file_key).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::TimelockKeyPair;
    use strongbox_crypto::{OsRandom, SeededRandom};

    const CONTEXT: &[u8] = b"mode=Timestamp;at=1780000000.000000000;height=-";

    #[test]
    fn test_escrow_release_roundtrip() {
        let pair = TimelockKeyPair::generate(&OsRandom).unwrap();
        let key = FileKey::generate(&OsRandom);

        let escrowed = escrow_file_key(&key, &pair.public, CONTEXT, &OsRandom).unwrap();
        assert_eq!(escrowed.version, ESCROW_VERSION);
        assert_eq!(escrowed.encrypted_file_key.len(), KEY_LENGTH + TAG_SIZE);

        assert_eq!(release_file_key(&escrowed, &pair.private, CONTEXT), Some(key));
    }

    #[test]
    fn test_wrong_private_key_returns_none() {
        let rng = SeededRandom::from_seed(1);
        let pair = TimelockKeyPair::generate(&rng).unwrap();
        let other = TimelockKeyPair::generate(&rng).unwrap();
        let key = FileKey::generate(&rng);

        let escrowed = escrow_file_key(&key, &pair.public, CONTEXT, &rng).unwrap();
        assert_eq!(release_file_key(&escrowed, &other.private, CONTEXT), None);
    }

    #[test]
    fn test_tampering_returns_none() {
        let pair = TimelockKeyPair::generate(&OsRandom).unwrap();
        let key = FileKey::generate(&OsRandom);
        let escrowed = escrow_file_key(&key, &pair.public, CONTEXT, &OsRandom).unwrap();

        let mut wrapped = escrowed.clone();
        wrapped.wrapped_content_key[0] ^= 1;
        assert_eq!(release_file_key(&wrapped, &pair.private, CONTEXT), None);

        let mut file_key = escrowed.clone();
        file_key.encrypted_file_key.truncate(4);
        assert_eq!(release_file_key(&file_key, &pair.private, CONTEXT), None);

        let mut version = escrowed.clone();
        version.version = 99;
        assert_eq!(release_file_key(&version, &pair.private, CONTEXT), None);

        let mut point = escrowed;
        point.ephemeral_public_key = vec![4, 1, 2, 3];
        assert_eq!(release_file_key(&point, &pair.private, CONTEXT), None);
    }

    #[test]
    fn test_different_context_returns_none() {
        let pair = TimelockKeyPair::generate(&OsRandom).unwrap();
        let key = FileKey::generate(&OsRandom);
        let escrowed = escrow_file_key(&key, &pair.public, CONTEXT, &OsRandom).unwrap();

        assert_eq!(release_file_key(&escrowed, &pair.private, b""), None);
        assert_eq!(
            release_file_key(&escrowed, &pair.private, b"mode=Timestamp;at=0.000000000;height=-"),
            None
        );
        assert_eq!(release_file_key(&escrowed, &pair.private, CONTEXT), Some(key));
    }

    #[test]
    fn test_wire_encoding() {
        let pair = TimelockKeyPair::generate(&OsRandom).unwrap();
        let key = FileKey::generate(&OsRandom);
        let escrowed = escrow_file_key(&key, &pair.public, CONTEXT, &OsRandom).unwrap();

        let json = serde_json::to_string(&escrowed).unwrap();
        assert!(json.contains("\"ephemeralPublicKey\""));

        let decoded = EscrowedKey::from_base64(&escrowed.to_base64().unwrap()).unwrap();
        assert_eq!(decoded, escrowed);
        assert!(EscrowedKey::from_base64("%%%").is_err());
    }
}
