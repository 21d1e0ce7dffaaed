//! Cache of final model answers keyed by conversation shape

use super::TtlCache;
use crate::clock::Clock;
use crate::fingerprint::{canonical_json, fingerprint};
use crate::llm::{CanonicalMessage, CanonicalResponse, Role, ToolSpec};
use chrono::Duration;
use std::sync::Arc;

const SYSTEM_PREFIX_CHARS: usize = 100;

pub struct ResponseCache {
    inner: TtlCache<CanonicalResponse>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_size: usize, clock: Arc<dyn Clock>) -> Self {
        tracing::info!(ttl_minutes = ttl.num_minutes(), max_size, "Response cache initialized");
        Self {
            inner: TtlCache::new(ttl, max_size, clock),
        }
    }

    /// Stable hash of an advertised tool set
    pub fn tools_hash(tools: &[ToolSpec]) -> String {
        let specs: Vec<String> = tools
            .iter()
            .map(|t| serde_json::to_value(t).map(|v| canonical_json(&v)).unwrap_or_default())
            .collect();
        fingerprint(&specs)
    }

    /// Key from the first system prompt's prefix, the last user message and the tool set
    pub fn key_for(messages: &[CanonicalMessage], tools_hash: Option<&str>) -> String {
        let mut parts = Vec::with_capacity(3);
        if let Some(system) = messages.iter().find(|m| m.role == Role::System) {
            let prefix: String = system.text().chars().take(SYSTEM_PREFIX_CHARS).collect();
            parts.push(format!("system:{prefix}"));
        }
        if let Some(user) = messages.iter().rev().find(|m| m.role == Role::User) {
            parts.push(format!("user:{}", user.text()));
        }
        if let Some(hash) = tools_hash {
            parts.push(format!("tools:{hash}"));
        }
        fingerprint(&parts)
    }

    pub fn get(&self, key: &str) -> Option<CanonicalResponse> {
        let hit = self.inner.get(key);
        if hit.is_some() {
            tracing::info!(key = %super::short(key), "Response cache hit");
        }
        hit
    }

    /// Store a final answer. Turns that made tool calls are never cached.
    pub fn store(&self, key: String, response: CanonicalResponse, has_tool_calls: bool) -> bool {
        if has_tool_calls || response.has_tool_calls() {
            tracing::debug!(key = %super::short(&key), "Not caching tool-call response");
            return false;
        }
        self.inner.insert(key, response);
        true
    }

    pub fn clear(&self) -> usize {
        let count = self.inner.clear();
        tracing::info!(count, "Cleared response cache");
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
