//! Bounded, expiring cache of decrypt results.
//!
//! Entries are keyed by a BLAKE2b MAC over the payload digest and the
//! password, keyed with a secret drawn once per process. The password is
//! never stored, and keys cannot be tested offline without the secret.

use blake2::digest::consts::U32;
use blake2::digest::{KeyInit, Mac};
use blake2::Blake2bMac;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use zeroize::Zeroizing;

use strongbox_crypto::rng::random_array;
use strongbox_crypto::RandomSource;

type CacheKey = [u8; 32];

struct Entry {
    plaintext: Zeroizing<Vec<u8>>,
    inserted_at: Instant,
}

/// Decrypt cache with a TTL and a capacity bound.
pub struct DecryptCache {
    secret: Zeroizing<[u8; 32]>,
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<CacheKey, Entry>>,
}

impl DecryptCache {
    pub fn new(ttl: Duration, capacity: usize, rng: &dyn RandomSource) -> Self {
        Self {
            secret: Zeroizing::new(random_array(rng)),
            ttl,
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Derive the cache key for a payload digest and password.
    pub fn key(&self, payload_digest: &[u8], password: &str) -> CacheKey {
        // A 32-byte key is always accepted.
        let mut mac = match <Blake2bMac<U32> as KeyInit>::new_from_slice(&self.secret[..]) {
            Ok(mac) => mac,
            Err(_) => unreachable!("BLAKE2b accepts keys up to 64 bytes"),
        };
        mac.update(&(payload_digest.len() as u64).to_le_bytes());
        mac.update(payload_digest);
        mac.update(password.as_bytes());
        mac.finalize().into_bytes().into()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let mut entries = self.lock();
        let expired = match entries.get(key) {
            None => return None,
            Some(entry) => entry.inserted_at.elapsed() >= self.ttl,
        };
        if expired {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|entry| entry.plaintext.to_vec())
    }

    pub fn insert(&self, key: CacheKey, plaintext: Vec<u8>) {
        let mut entries = self.lock();
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);

        while entries.len() >= self.capacity && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(k, _)| *k);
            match oldest {
                Some(oldest) => {
                    entries.remove(&oldest);
                }
                None => break,
            }
        }

        entries.insert(
            key,
            Entry {
                plaintext: Zeroizing::new(plaintext),
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strongbox_crypto::SeededRandom;

    fn cache(ttl_secs: u64, capacity: usize) -> DecryptCache {
        DecryptCache::new(
            Duration::from_secs(ttl_secs),
            capacity,
            &SeededRandom::from_seed(5),
        )
    }

    #[test]
    fn test_key_depends_on_password_and_secret() {
        let a = cache(60, 4);
        assert_eq!(a.key(b"digest", "pw"), a.key(b"digest", "pw"));
        assert_ne!(a.key(b"digest", "pw"), a.key(b"digest", "pw2"));
        assert_ne!(a.key(b"digest", "pw"), a.key(b"digest2", "pw"));

        let b = DecryptCache::new(Duration::from_secs(60), 4, &SeededRandom::from_seed(6));
        assert_ne!(a.key(b"digest", "pw"), b.key(b"digest", "pw"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = cache(10, 4);
        let key = cache.key(b"d", "pw");
        cache.insert(key, b"plain".to_vec());
        assert_eq!(cache.get(&key), Some(b"plain".to_vec()));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get(&key), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest() {
        let cache = cache(60, 2);
        let keys: Vec<_> = (0..3u8).map(|i| cache.key(&[i], "pw")).collect();

        cache.insert(keys[0], vec![0]);
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert(keys[1], vec![1]);
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert(keys[2], vec![2]);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&keys[0]), None);
        assert_eq!(cache.get(&keys[2]), Some(vec![2]));
    }
}
