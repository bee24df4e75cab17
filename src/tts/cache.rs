//! In-memory LRU cache for synthesized audio.
//!
//! Keyed by the request fingerprint (text + voice parameters). Uses
//! [`moka`] with a bounded entry count, LRU eviction and optional TTL.

use bytes::Bytes;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use std::time::Duration;

/// Bounded fingerprint → audio cache. Cloning shares the same storage.
#[derive(Clone)]
pub struct AudioCache {
    inner: Cache<String, Bytes>,
}

impl AudioCache {
    pub fn new(max_entries: u64, ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder()
            .max_capacity(max_entries)
            .eviction_policy(EvictionPolicy::lru());
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        Self {
            inner: builder.build(),
        }
    }

    pub fn get(&self, fingerprint: &str) -> Option<Bytes> {
        self.inner.get(fingerprint)
    }

    pub fn insert(&self, fingerprint: String, audio: Bytes) {
        self.inner.insert(fingerprint, audio);
    }

    /// Approximate entry count (exact after pending maintenance runs).
    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}
