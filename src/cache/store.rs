//! Storage backend abstraction

use super::{CacheResult, KeyPattern};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored value with its lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create an entry that expires `ttl` after `now`
    pub fn new(value: Value, now: DateTime<Utc>, ttl: std::time::Duration) -> Self {
        let expires_at = Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            value,
            created_at: now,
            expires_at,
        }
    }

    /// An entry is live strictly before its expiry instant
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Key-value backend for [`CacheService`](super::CacheService)
///
/// Stores do not interpret expiry on reads; the service decides liveness
/// with its own clock.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>>;

    /// Insert or replace the entry for `key`
    async fn set(&self, key: &str, entry: CacheEntry) -> CacheResult<()>;

    /// Remove every key matching `pattern`, returning how many were removed
    async fn remove_matching(&self, pattern: &KeyPattern) -> CacheResult<usize>;

    /// Remove entries whose expiry is at or before `now`
    async fn remove_expired(&self, now: DateTime<Utc>) -> CacheResult<usize>;

    /// Number of stored entries, live or not
    async fn len(&self) -> CacheResult<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::time::Duration as StdDuration;

    #[test]
    fn test_entry_liveness_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap();
        let entry = CacheEntry::new(json!(1), now, StdDuration::from_secs(60));

        assert!(entry.is_live(now));
        assert!(entry.is_live(now + Duration::seconds(59)));
        assert!(!entry.is_live(now + Duration::seconds(60)));
    }

    #[test]
    fn test_entry_zero_ttl_is_never_live() {
        let now = Utc::now();
        let entry = CacheEntry::new(json!("x"), now, StdDuration::ZERO);
        assert!(!entry.is_live(now));
    }

    #[test]
    fn test_entry_huge_ttl_saturates() {
        let now = Utc::now();
        let entry = CacheEntry::new(json!(null), now, StdDuration::from_secs(u64::MAX));
        assert_eq!(entry.expires_at, DateTime::<Utc>::MAX_UTC);
    }
}
