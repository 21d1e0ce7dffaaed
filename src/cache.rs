//! Bounded in-memory caches with lazy TTL expiry
//!
//! [`TtlCache`] is the shared store. [`ResponseCache`] and
//! [`ToolResultCache`] decide what gets keyed and what may be stored.

mod response;
mod tool;

pub use response::ResponseCache;
pub use tool::ToolResultCache;

use crate::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: DateTime<Utc>,
}

/// Fingerprint-keyed cache. Full caches drop their oldest entry on insert;
/// expired entries are removed when read or swept.
pub struct TtlCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    ttl: Duration,
    max_size: usize,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, max_size: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_size: max_size.max(1),
            clock,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &CacheEntry<V>, now: DateTime<Utc>) -> bool {
        now - entry.stored_at > self.ttl
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.lock();
        let entry = entries.get(key)?;
        if self.is_expired(entry, now) {
            entries.remove(key);
            tracing::debug!(key = %short(key), "Cache entry expired");
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn insert(&self, key: String, value: V) {
        let now = self.clock.now();
        let mut entries = self.lock();
        if !entries.contains_key(&key) && entries.len() >= self.max_size {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.stored_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
                tracing::debug!(key = %short(&oldest), "Cache full, evicted oldest entry");
            }
        }
        entries.insert(key, CacheEntry { value, stored_at: now });
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.lock().remove(key).map(|e| e.value)
    }

    pub fn clear(&self) -> usize {
        let mut entries = self.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry, returning how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| now - e.stored_at <= self.ttl);
        before - entries.len()
    }
}

/// First eight characters of a key, for log lines
fn short(key: &str) -> &str {
    key.get(..8).unwrap_or(key)
}
