//! In-process cache store

use super::{CacheEntry, CacheResult, CacheStore, KeyPattern};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local store backed by a `HashMap`
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> CacheResult<()> {
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn remove_matching(&self, pattern: &KeyPattern) -> CacheResult<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !pattern.matches(key));
        Ok(before - entries.len())
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> CacheResult<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(before - entries.len())
    }

    async fn len(&self) -> CacheResult<usize> {
        Ok(self.entries.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_set_get_replace() {
        let store = MemoryStore::new();
        let now = Utc::now();

        assert!(store.get("a").await.unwrap().is_none());

        store
            .set("a", CacheEntry::new(json!(1), now, Duration::from_secs(10)))
            .await
            .unwrap();
        store
            .set("a", CacheEntry::new(json!(2), now, Duration::from_secs(10)))
            .await
            .unwrap();

        let entry = store.get("a").await.unwrap().unwrap();
        assert_eq!(entry.value, json!(2));
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove_matching_and_expired() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let ttl = Duration::from_secs(60);

        for key in ["programs:a", "programs:b", "school:1:stats:all:all:all"] {
            store.set(key, CacheEntry::new(json!(key), now, ttl)).await.unwrap();
        }
        store
            .set("stale", CacheEntry::new(json!(0), now, Duration::ZERO))
            .await
            .unwrap();

        let removed = store
            .remove_matching(&KeyPattern::new("programs:*").unwrap())
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let removed = store
            .remove_matching(&KeyPattern::new("nothing:*").unwrap())
            .await
            .unwrap();
        assert_eq!(removed, 0);

        assert_eq!(store.remove_expired(now).await.unwrap(), 1);
        assert_eq!(store.len().await.unwrap(), 1);
    }
}
