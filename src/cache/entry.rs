//! [`CacheEntry`] - on-disk representation of one cached job.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque per-job data. Keys merge shallowly on update.
pub type CachePayload = serde_json::Map<String, serde_json::Value>;

/// Everything in the cache, keyed by job id.
pub type CacheContents = BTreeMap<String, CacheEntry>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Unix time in milliseconds of the last set or update.
    pub timestamp: u64,
    #[serde(default)]
    pub payload: CachePayload,
}

impl CacheEntry {
    pub fn new(timestamp: u64, payload: CachePayload) -> Self {
        Self { timestamp, payload }
    }

    /// Merge `partial` into the payload and move the timestamp forward.
    pub fn merge(&mut self, partial: CachePayload, timestamp: u64) {
        self.payload.extend(partial);
        self.timestamp = timestamp;
    }

    /// Has this entry outlived `ttl_ms` as of `now`?
    pub fn is_expired(&self, now: u64, ttl_ms: u64) -> bool {
        now.saturating_sub(self.timestamp) > ttl_ms
    }
}
