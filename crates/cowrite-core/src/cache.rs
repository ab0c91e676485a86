//! Bounded LRU cache with TTL for generated suggestions.
//!
//! Expired entries are evicted lazily on read. Keys are request fingerprints
//! (see [`fingerprint`]), so identical requests against identical content hit.

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries (default: 100)
    pub capacity: usize,
    /// Entries older than this are treated as absent (default: 5 minutes)
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            ttl: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: u64,
}

/// LRU + TTL cache keyed by request fingerprint.
#[derive(Debug)]
pub struct SuggestionCache<V> {
    entries: LruCache<String, CacheEntry<V>>,
    ttl_ms: u64,
}

impl<V: Clone> SuggestionCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            ttl_ms: config.ttl.as_millis() as u64,
        }
    }

    /// Cached value for `key`, if present and younger than the TTL.
    ///
    /// A hit becomes the most recently used entry; an expired entry is removed.
    pub fn get(&mut self, key: &str, now_ms: u64) -> Option<V> {
        let expired = match self.entries.peek(key) {
            Some(entry) => now_ms.saturating_sub(entry.inserted_at) > self.ttl_ms,
            None => return None,
        };

        if expired {
            self.entries.pop(key);
            return None;
        }
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Insert or overwrite `key`, evicting the least recently used entry when full.
    pub fn set(&mut self, key: impl Into<String>, value: V, now_ms: u64) {
        self.entries.put(
            key.into(),
            CacheEntry {
                value,
                inserted_at: now_ms,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Deterministic cache key for a suggestion request.
///
/// SHA-256 over the length-prefixed request fields, so no two distinct
/// requests share a key and any edit to the content produces a new one.
pub fn fingerprint(
    document_id: &str,
    content: &str,
    prompt: Option<&str>,
    max_suggestions: usize,
) -> String {
    let mut hasher = Sha256::new();
    for field in [Some(document_id), Some(content), prompt] {
        match field {
            Some(value) => {
                hasher.update([1u8]);
                hasher.update((value.len() as u64).to_le_bytes());
                hasher.update(value.as_bytes());
            }
            None => hasher.update([0u8]),
        }
    }
    hasher.update((max_suggestions as u64).to_le_bytes());
    hex::encode(hasher.finalize())
}
