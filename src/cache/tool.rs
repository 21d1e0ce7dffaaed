//! Cache of tool results keyed by tool name and normalized arguments

use super::TtlCache;
use crate::clock::Clock;
use crate::fingerprint::{canonical_json, fingerprint};
use chrono::Duration;
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct ToolResultCache {
    inner: TtlCache<Map<String, Value>>,
}

impl ToolResultCache {
    pub fn new(ttl: Duration, max_size: usize, clock: Arc<dyn Clock>) -> Self {
        tracing::info!(ttl_hours = ttl.num_hours(), max_size, "Tool cache initialized");
        Self {
            inner: TtlCache::new(ttl, max_size, clock),
        }
    }

    /// Top-level `null` arguments are dropped before hashing
    pub fn key_for(name: &str, args: &Map<String, Value>) -> String {
        let normalized: Map<String, Value> = args
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let args = canonical_json(&Value::Object(normalized));
        fingerprint(&[name, args.as_str()])
    }

    pub fn get(&self, name: &str, args: &Map<String, Value>) -> Option<Map<String, Value>> {
        let key = Self::key_for(name, args);
        let hit = self.inner.get(&key);
        if hit.is_some() {
            tracing::info!(tool = %name, key = %super::short(&key), "Tool cache hit");
        }
        hit
    }

    pub fn store(&self, name: &str, args: &Map<String, Value>, result: Map<String, Value>) {
        self.inner.insert(Self::key_for(name, args), result);
    }

    pub fn clear(&self) -> usize {
        let count = self.inner.clear();
        tracing::info!(count, "Cleared tool cache");
        count
    }

    pub fn cleanup_expired(&self) -> usize {
        self.inner.cleanup_expired()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
