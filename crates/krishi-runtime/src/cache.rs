//! Memo of primary generative answers.
//!
//! The cascade stores every acceptable `primary-ai` payload here under the
//! query's key. The same cache serves as the record source of the `cache`
//! tier, so a repeated query can still be answered once the endpoint or
//! every credential becomes unavailable.

use async_trait::async_trait;
use moka::future::Cache;
use std::time::Duration;

use krishi_core::{Payload, Query};

use crate::config::CacheConfig;
use crate::tiers::RecordSource;

/// Response cache using moka.
#[derive(Clone)]
pub struct ResponseCache {
    cache: Cache<String, Payload>,
}

impl ResponseCache {
    /// Create a new cache with the given configuration.
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries, config.ttl)
    }

    /// Get a cached payload.
    pub async fn get(&self, key: &str) -> Option<Payload> {
        self.cache.get(key).await
    }

    /// Store a payload. Empty keys are not cached.
    pub async fn insert(&self, key: &str, payload: Payload) {
        if key.is_empty() {
            return;
        }
        self.cache.insert(key.to_string(), payload).await;
    }

    /// Drop one entry.
    pub async fn invalidate(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    /// Clear the cache.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate number of entries.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

#[async_trait]
impl RecordSource for ResponseCache {
    async fn lookup(&self, query: &Query) -> anyhow::Result<Option<Payload>> {
        if query.key.is_empty() {
            return Ok(None);
        }
        Ok(self.get(&query.key).await)
    }

    fn name(&self) -> &str {
        "response-cache"
    }
}
