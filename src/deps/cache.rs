//! Injected version-cache service.
//!
//! The resolver never assumes a backing store: anything implementing
//! [`VersionCache`] works — the in-memory map here for tests and
//! single-process deployments, or a shared store behind the same trait.
//! Staleness is the only tolerated hazard; concurrent writers race
//! per-key last-write-wins.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// One cached pin with its fetch time.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub version: String,
    pub fetched_at: Instant,
}

#[async_trait]
pub trait VersionCache: Send + Sync {
    /// Fresh entry for `name`, or `None`. Implementations treat entries
    /// older than their TTL as absent.
    async fn get(&self, name: &str) -> Option<CacheEntry>;
    async fn put(&self, name: &str, version: &str);
}

/// Process-local cache with a fixed TTL.
pub struct MemoryVersionCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryVersionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl VersionCache for MemoryVersionCache {
    async fn get(&self, name: &str) -> Option<CacheEntry> {
        let entries = self.entries.read().await;
        entries
            .get(name)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .cloned()
    }

    async fn put(&self, name: &str, version: &str) {
        let mut entries = self.entries.write().await;
        entries.insert(
            name.to_string(),
            CacheEntry {
                version: version.to_string(),
                fetched_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_entry_hits() {
        let cache = MemoryVersionCache::new(Duration::from_secs(60));
        cache.put("react", "18.2.0").await;
        let entry = cache.get("react").await.expect("fresh entry");
        assert_eq!(entry.version, "18.2.0");
    }

    #[tokio::test]
    async fn stale_entry_is_absent() {
        let cache = MemoryVersionCache::new(Duration::ZERO);
        cache.put("react", "18.2.0").await;
        assert!(cache.get("react").await.is_none());
    }

    #[tokio::test]
    async fn last_write_wins_per_key() {
        let cache = MemoryVersionCache::new(Duration::from_secs(60));
        cache.put("vue", "3.4.0").await;
        cache.put("vue", "3.4.21").await;
        assert_eq!(cache.get("vue").await.expect("entry").version, "3.4.21");
    }
}
