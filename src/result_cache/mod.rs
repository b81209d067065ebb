//! ResultCache - Process-lifetime memoization of search results
//!
//! ## Responsibilities
//!
//! - Derive a stable key from the search parameters (SHA-256 hex digest)
//! - Store computed result lists for the lifetime of the service
//!
//! Entries have no TTL and no size bound. Concurrent misses on one key may
//! both compute and both insert; the value is a pure function of the key so
//! the last write wins harmlessly. Bounded policies plug in through
//! [`CacheBackend`].

use crate::error::Result;
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

/// Hex digest identifying one set of search parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Digest of `<kind>:<canonical JSON of params>`
    ///
    /// `params` must serialize deterministically (structs and sequences, no
    /// hash maps) for equal parameters to produce equal keys.
    pub fn digest<P: Serialize>(kind: &str, params: &P) -> Result<Self> {
        let canonical = serde_json::to_string(params)?;
        let mut hasher = Sha256::new();
        hasher.update(kind.as_bytes());
        hasher.update(b":");
        hasher.update(canonical.as_bytes());
        Ok(Self(hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Storage policy behind a [`ResultCache`]
pub trait CacheBackend<V>: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<V>;
    fn insert(&self, key: CacheKey, value: V);
    fn len(&self) -> usize;
}

/// Grows without bound; never evicts
pub struct UnboundedBackend<V> {
    entries: DashMap<CacheKey, V>,
}

impl<V> Default for UnboundedBackend<V> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<V: Clone + Send + Sync> CacheBackend<V> for UnboundedBackend<V> {
    fn get(&self, key: &CacheKey) -> Option<V> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    fn insert(&self, key: CacheKey, value: V) {
        self.entries.insert(key, value);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Memoization layer owned by one search engine instance
pub struct ResultCache<V> {
    backend: Box<dyn CacheBackend<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone + Send + Sync + 'static> ResultCache<V> {
    /// Create a cache over an unbounded in-memory map
    pub fn unbounded() -> Self {
        Self::with_backend(Box::new(UnboundedBackend::default()))
    }

    pub fn with_backend(backend: Box<dyn CacheBackend<V>>) -> Self {
        Self {
            backend,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let found = self.backend.get(key);
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key.as_str(), "Result cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key.as_str(), "Result cache miss");
        }
        found
    }

    pub fn insert(&self, key: CacheKey, value: V) {
        self.backend.insert(key, value);
    }

    /// Return the cached value or compute, store and return it
    pub async fn get_or_try_insert_with<F, Fut>(&self, key: CacheKey, compute: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = compute().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.backend.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[derive(Serialize)]
    struct Params<'a> {
        steps: &'a [&'a str],
        nprobe: u32,
    }

    #[test]
    fn test_digest_is_stable_and_sensitive() {
        let a = CacheKey::digest("temporal", &Params { steps: &["a", "b"], nprobe: 8 }).unwrap();
        let b = CacheKey::digest("temporal", &Params { steps: &["a", "b"], nprobe: 8 }).unwrap();
        let c = CacheKey::digest("temporal", &Params { steps: &["b", "a"], nprobe: 8 }).unwrap();
        let d = CacheKey::digest("videos", &Params { steps: &["a", "b"], nprobe: 8 }).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.as_str().len(), 64);
    }

    #[tokio::test]
    async fn test_get_or_try_insert_computes_once() {
        let cache: ResultCache<Arc<Vec<u32>>> = ResultCache::unbounded();
        let calls = AtomicUsize::new(0);
        let key = CacheKey::digest("k", &1u32).unwrap();

        for _ in 0..3 {
            let v = cache
                .get_or_try_insert_with(key.clone(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(vec![1, 2, 3]))
                })
                .await
                .unwrap();
            assert_eq!(*v, vec![1, 2, 3]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_failed_compute_is_not_cached() {
        let cache: ResultCache<Arc<Vec<u32>>> = ResultCache::unbounded();
        let key = CacheKey::digest("k", &2u32).unwrap();

        let err = cache
            .get_or_try_insert_with(key.clone(), || async {
                Err(Error::Embedding("offline".to_string()))
            })
            .await;
        assert!(err.is_err());
        assert_eq!(cache.stats().entries, 0);
    }
}
