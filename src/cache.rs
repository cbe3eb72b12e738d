//! Fingerprint-keyed result cache.
//!
//! The cache is a pure performance layer: its only correctness requirement is
//! that identical semantic content yields identical keys, which the
//! fingerprinting in [`compose`](crate::compose) guarantees. Every cache
//! failure degrades to a miss — recomputation — and is logged, never surfaced.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use roaring::RoaringTreemap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{OtuscopeError, Result};
use crate::schema::OtherHasher;

const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// TTL classes from the caching policy: short/interactive entries, the 7-day
/// schema/spatial/options class, and administrator pre-warmed entries that
/// live until explicit invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    Default,
    Week,
    Forever,
}

/// The backing key/value store. External collaborators provide their own
/// implementation; [`MemoryCache`] is the in-process one. Concurrent get/put
/// must not corrupt entries; last write wins is acceptable.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    /// `ttl = None` means the entry never expires.
    fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

// ------------- MemoryCache -------------
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

/// Process-local cache store behind a mutex.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry, OtherHasher>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| OtuscopeError::CacheUnavailable(e.to_string()))?;
        if let Some(entry) = entries.get(key) {
            if entry.expires_at.is_some_and(|at| at <= Instant::now()) {
                entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| OtuscopeError::CacheUnavailable(e.to_string()))?;
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| OtuscopeError::CacheUnavailable(e.to_string()))?;
        entries.clear();
        Ok(())
    }
}

// ------------- ResultCache -------------
/// Memoization layer over cascading-options answers and materialized sample
/// result sets. Not used for observation-matrix streams.
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    short_ttl: Duration,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>, short_ttl: Duration) -> Self {
        Self { store, short_ttl }
    }

    fn ttl(&self, class: TtlClass) -> Option<Duration> {
        match class {
            TtlClass::Default => Some(self.short_ttl),
            TtlClass::Week => Some(WEEK),
            TtlClass::Forever => None,
        }
    }

    /// Look the key up; on a miss (or any cache failure) run `compute` and
    /// remember its result. Values cross the store boundary as JSON.
    pub fn get_or_compute<T, F>(&self, key: &str, class: TtlClass, compute: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        match self.store.get(key) {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    debug!(key, "cache hit");
                    return Ok(value);
                }
                Err(e) => warn!(key, error = %e, "discarding undecodable cache entry"),
            },
            Ok(None) => {}
            Err(e) => warn!(key, error = %e, "cache read failed, computing directly"),
        }
        let value = compute()?;
        match serde_json::to_vec(&value) {
            Ok(bytes) => self.put_with_ttl(key, bytes, class),
            Err(e) => warn!(key, error = %e, "cache value not encodable"),
        }
        Ok(value)
    }

    /// Same policy for sample-id bitsets, which use roaring's own compact
    /// serialization instead of JSON.
    pub fn get_or_compute_ids<F>(
        &self,
        key: &str,
        class: TtlClass,
        compute: F,
    ) -> Result<RoaringTreemap>
    where
        F: FnOnce() -> Result<RoaringTreemap>,
    {
        match self.store.get(key) {
            Ok(Some(bytes)) => match RoaringTreemap::deserialize_from(&bytes[..]) {
                Ok(ids) => {
                    debug!(key, "cache hit");
                    return Ok(ids);
                }
                Err(e) => warn!(key, error = %e, "discarding undecodable cache entry"),
            },
            Ok(None) => {}
            Err(e) => warn!(key, error = %e, "cache read failed, computing directly"),
        }
        let ids = compute()?;
        let mut bytes = Vec::with_capacity(ids.serialized_size());
        match ids.serialize_into(&mut bytes) {
            Ok(()) => self.put_with_ttl(key, bytes, class),
            Err(e) => warn!(key, error = %e, "cache value not encodable"),
        }
        Ok(ids)
    }

    pub fn put_with_ttl(&self, key: &str, value: Vec<u8>, class: TtlClass) {
        if let Err(e) = self.store.put(key, value, self.ttl(class)) {
            warn!(key, error = %e, "cache write failed");
        }
    }

    pub fn invalidate_all(&self) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "cache clear failed");
        }
    }
}
