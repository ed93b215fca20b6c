// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Best-effort caches.
//!
//! Caches are read-through with short TTLs and explicitly invalidated on
//! write. They are never authoritative: a miss is always safe to recompute
//! from the store.

use std::hash::Hash;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

/// Generic in-process TTL cache.
///
/// Owned by components that need a bounded-staleness view of slow-changing
/// data (status configuration, user names). Constructor-injected rather
/// than process-global so tests can control its lifetime.
pub struct TtlCache<K, V> {
    entries: DashMap<K, (V, Instant)>,
    ttl: Duration,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    /// Create a cache whose entries expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Look up a non-expired entry.
    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.entries.get(key)?;
        let (value, inserted_at) = entry.value();
        if inserted_at.elapsed() < self.ttl {
            Some(value.clone())
        } else {
            drop(entry);
            self.entries.remove(key);
            None
        }
    }

    /// Insert or refresh an entry.
    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(key, (value, Instant::now()));
    }

    /// Drop an entry regardless of age.
    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }
}

/// Shared cache of derived aggregates (status summary snapshots).
///
/// Best-effort from the core's perspective: set/invalidate failures are
/// logged by callers, never propagated.
#[async_trait]
pub trait SummaryCache: Send + Sync {
    /// Look up a cached value.
    async fn get(&self, key: &str) -> Option<String>;

    /// Store a value with a TTL.
    async fn set(&self, key: &str, value: String, ttl: Duration);

    /// Drop every key starting with `prefix`.
    async fn invalidate_prefix(&self, prefix: &str);
}

/// In-memory [`SummaryCache`] implementation.
#[derive(Default)]
pub struct InMemorySummaryCache {
    entries: DashMap<String, (String, Instant)>,
}

impl InMemorySummaryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SummaryCache for InMemorySummaryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let entry = self.entries.get(key)?;
        let (value, expires_at) = entry.value();
        if *expires_at > Instant::now() {
            Some(value.clone())
        } else {
            None
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
    }

    async fn invalidate_prefix(&self, prefix: &str) {
        self.entries.retain(|key, _| !key.starts_with(prefix));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_cache_expiry() {
        let cache: TtlCache<&str, i32> = TtlCache::new(Duration::from_millis(30));
        cache.insert("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&"a"), None);
    }

    #[test]
    fn test_ttl_cache_invalidate() {
        let cache: TtlCache<&str, i32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("a", 1);
        cache.invalidate(&"a");
        assert_eq!(cache.get(&"a"), None);
    }

    #[tokio::test]
    async fn test_summary_cache_prefix_invalidation() {
        let cache = InMemorySummaryCache::new();
        cache
            .set("summary:cust-1:all", "{}".to_string(), Duration::from_secs(60))
            .await;
        cache
            .set("summary:cust-2:all", "{}".to_string(), Duration::from_secs(60))
            .await;

        cache.invalidate_prefix("summary:cust-1").await;

        assert!(cache.get("summary:cust-1:all").await.is_none());
        assert!(cache.get("summary:cust-2:all").await.is_some());
    }

    #[tokio::test]
    async fn test_summary_cache_ttl() {
        let cache = InMemorySummaryCache::new();
        cache
            .set("k", "v".to_string(), Duration::from_millis(20))
            .await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("k").await.is_none());
    }
}
