//! Get-or-compute cache service

use super::{CacheEntry, CacheResult, CacheStore, Clock, KeyPattern, MemoryStore, SystemClock};
use crate::metrics;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Behaviour switches for [`CacheService`]
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// When false every call runs its supplier and nothing is stored
    pub enabled: bool,

    /// Let concurrent misses on one key share a single supplier run
    pub single_flight: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            single_flight: true,
        }
    }
}

/// Counters since the service was created
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub backend: String,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub store_errors: u64,
    pub invalidated: u64,
    pub hit_rate: f64,
    /// Entries currently held by the store, when it could be asked
    pub entries: Option<usize>,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    store_errors: AtomicU64,
    invalidated: AtomicU64,
}

/// Memoizes supplier results under string keys with a TTL
pub struct CacheService {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    options: CacheOptions,
    /// Per-key gates held while a supplier runs
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    counters: Counters,
}

impl CacheService {
    pub fn new(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>, options: CacheOptions) -> Self {
        tracing::debug!(
            backend = store.name(),
            enabled = options.enabled,
            single_flight = options.single_flight,
            "Creating cache service"
        );

        Self {
            store,
            clock,
            options,
            in_flight: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// In-memory store, wall clock, default options
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            CacheOptions::default(),
        )
    }

    /// Return the live value cached under `key`, or run `supplier`, cache its
    /// value for `ttl` and return it.
    ///
    /// Supplier errors are returned unchanged and nothing is cached. Store
    /// errors are logged and otherwise ignored: the supplier runs as if the
    /// cache were empty.
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        supplier: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.options.enabled {
            return supplier().await;
        }

        if let Some(value) = self.lookup(key).await {
            self.record_hit(key);
            return Ok(value);
        }

        if !self.options.single_flight {
            self.record_miss(key);
            return self.compute_and_store(key, ttl, supplier).await;
        }

        let gate = self.gate_for(key).await;
        let result = {
            let _guard = gate.lock().await;

            // Another caller may have filled the key while we waited
            if let Some(value) = self.lookup(key).await {
                self.record_hit(key);
                Ok(value)
            } else {
                self.record_miss(key);
                self.compute_and_store(key, ttl, supplier).await
            }
        };
        self.release_gate(key, gate).await;

        result
    }

    /// Remove every key matching a glob pattern such as `programs:*`
    pub async fn invalidate(&self, pattern: &str) -> CacheResult<usize> {
        let pattern = KeyPattern::new(pattern)?;
        let removed = self.store.remove_matching(&pattern).await.map_err(|e| {
            self.record_store_error();
            e
        })?;

        self.counters
            .invalidated
            .fetch_add(removed as u64, Ordering::Relaxed);
        metrics::record_cache_operations("invalidated", removed as u64);

        tracing::info!(pattern = %pattern, removed, "Invalidated cache keys");
        Ok(removed)
    }

    /// Drop entries that have expired
    pub async fn purge_expired(&self) -> CacheResult<usize> {
        let removed = self.store.remove_expired(self.clock.now()).await.map_err(|e| {
            self.record_store_error();
            e
        })?;

        if removed > 0 {
            tracing::debug!(removed, "Purged expired cache entries");
        }
        Ok(removed)
    }

    /// Periodically purge expired entries until the handle is aborted
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = self.purge_expired().await {
                    tracing::warn!(error = %e, "Cache sweep failed");
                }
                if let Ok(len) = self.store.len().await {
                    metrics::set_cache_entries(len);
                }
            }
        })
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            backend: self.store.name().to_string(),
            hits,
            misses,
            writes: self.counters.writes.load(Ordering::Relaxed),
            store_errors: self.counters.store_errors.load(Ordering::Relaxed),
            invalidated: self.counters.invalidated.load(Ordering::Relaxed),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            entries: self.store.len().await.ok(),
        }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Read a live value, treating store failures and undecodable entries
    /// as misses
    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = match self.store.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                self.record_store_error();
                tracing::warn!(
                    key,
                    backend = self.store.name(),
                    error = %e,
                    "Cache read failed, computing directly"
                );
                return None;
            }
        };

        if !entry.is_live(self.clock.now()) {
            tracing::trace!(key, expired_at = %entry.expires_at, "Cache entry expired");
            return None;
        }

        match serde_json::from_value(entry.value) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(
                    key,
                    error = %e,
                    "Cached value has an unexpected shape, recomputing"
                );
                None
            }
        }
    }

    async fn compute_and_store<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        supplier: F,
    ) -> Result<T, E>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let value = supplier().await?;
        metrics::observe_supplier_duration(started.elapsed());

        match serde_json::to_value(&value) {
            Ok(json) => {
                let entry = CacheEntry::new(json, self.clock.now(), ttl);
                match self.store.set(key, entry).await {
                    Ok(()) => {
                        self.counters.writes.fetch_add(1, Ordering::Relaxed);
                        metrics::record_cache_operations("write", 1);
                        tracing::trace!(key, ttl_secs = ttl.as_secs(), "Cached value");
                    }
                    Err(e) => {
                        self.record_store_error();
                        tracing::warn!(
                            key,
                            backend = self.store.name(),
                            error = %e,
                            "Cache write failed, serving uncached value"
                        );
                    }
                }
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Value could not be serialized for caching");
            }
        }

        Ok(value)
    }

    async fn gate_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut flights = self.in_flight.lock().await;
        Arc::clone(
            flights
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Drop our handle on a gate and forget the gate once nobody holds it.
    /// Handles are only cloned and dropped under the `in_flight` lock.
    async fn release_gate(&self, key: &str, gate: Arc<Mutex<()>>) {
        let mut flights = self.in_flight.lock().await;
        drop(gate);
        if flights
            .get(key)
            .is_some_and(|current| Arc::strong_count(current) == 1)
        {
            flights.remove(key);
        }
    }

    fn record_hit(&self, key: &str) {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_operations("hit", 1);
        tracing::debug!(key, "Cache hit");
    }

    fn record_miss(&self, key: &str) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_operations("miss", 1);
        tracing::debug!(key, "Cache miss");
    }

    fn record_store_error(&self) {
        self.counters.store_errors.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_operations("store_error", 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, ManualClock};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::AtomicUsize;

    const TTL: Duration = Duration::from_secs(60);

    fn service_with_clock(options: CacheOptions) -> (CacheService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let service = CacheService::new(Arc::new(MemoryStore::new()), clock.clone(), options);
        (service, clock)
    }

    fn counting_supplier(
        calls: &AtomicUsize,
        value: u32,
    ) -> impl Future<Output = Result<u32, String>> + '_ {
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        }
    }

    /// Store whose every operation fails, as if the backend were unreachable
    struct UnreachableStore;

    #[async_trait]
    impl CacheStore for UnreachableStore {
        fn name(&self) -> &'static str {
            "unreachable"
        }

        async fn get(&self, _key: &str) -> CacheResult<Option<CacheEntry>> {
            Err(CacheError::Store("connection refused".into()))
        }

        async fn set(&self, _key: &str, _entry: CacheEntry) -> CacheResult<()> {
            Err(CacheError::Store("connection refused".into()))
        }

        async fn remove_matching(&self, _pattern: &KeyPattern) -> CacheResult<usize> {
            Err(CacheError::Store("connection refused".into()))
        }

        async fn remove_expired(&self, _now: DateTime<Utc>) -> CacheResult<usize> {
            Err(CacheError::Store("connection refused".into()))
        }

        async fn len(&self) -> CacheResult<usize> {
            Err(CacheError::Store("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let (cache, _clock) = service_with_clock(CacheOptions::default());
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_set("k", TTL, || counting_supplier(&calls, 7))
            .await
            .unwrap();
        let second = cache
            .get_or_set("k", TTL, || counting_supplier(&calls, 8))
            .await
            .unwrap();

        assert_eq!(first, 7);
        assert_eq!(second, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.entries, Some(1));
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_expiry_recomputes() {
        let (cache, clock) = service_with_clock(CacheOptions::default());
        let calls = AtomicUsize::new(0);

        cache
            .get_or_set("k", TTL, || counting_supplier(&calls, 1))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(59));
        let value = cache
            .get_or_set("k", TTL, || counting_supplier(&calls, 2))
            .await
            .unwrap();
        assert_eq!(value, 1);

        clock.advance(Duration::from_secs(1));
        let value = cache
            .get_or_set("k", TTL, || counting_supplier(&calls, 3))
            .await
            .unwrap();
        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_recompute() {
        let (cache, _clock) = service_with_clock(CacheOptions::default());
        let calls = AtomicUsize::new(0);

        cache
            .get_or_set("programs:abc", TTL, || counting_supplier(&calls, 1))
            .await
            .unwrap();
        cache
            .get_or_set("schools:1", TTL, || counting_supplier(&calls, 1))
            .await
            .unwrap();

        assert_eq!(cache.invalidate("programs:*").await.unwrap(), 1);
        assert_eq!(cache.invalidate("programs:*").await.unwrap(), 0);

        let value = cache
            .get_or_set("programs:abc", TTL, || counting_supplier(&calls, 2))
            .await
            .unwrap();
        assert_eq!(value, 2);

        // Untouched key is still cached
        let value = cache
            .get_or_set("schools:1", TTL, || counting_supplier(&calls, 9))
            .await
            .unwrap();
        assert_eq!(value, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_invalid_pattern_is_rejected() {
        let cache = CacheService::in_memory();
        let err = cache.invalidate("school:[").await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidPattern { .. }));
    }

    #[tokio::test]
    async fn test_supplier_error_is_not_cached() {
        let (cache, _clock) = service_with_clock(CacheOptions::default());

        let err = cache
            .get_or_set("k", TTL, || async { Err::<u32, _>("db down".to_string()) })
            .await
            .unwrap_err();
        assert_eq!(err, "db down");

        let calls = AtomicUsize::new(0);
        let value = cache
            .get_or_set("k", TTL, || counting_supplier(&calls, 5))
            .await
            .unwrap();
        assert_eq!(value, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().await.writes, 1);
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_open() {
        let cache = CacheService::new(
            Arc::new(UnreachableStore),
            Arc::new(SystemClock),
            CacheOptions::default(),
        );
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_set("k", TTL, || counting_supplier(&calls, 4))
                .await
                .unwrap();
            assert_eq!(value, 4);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let stats = cache.stats().await;
        // Two failed reads (before and after the gate) and one failed write per call
        assert_eq!(stats.store_errors, 9);
        assert_eq!(stats.entries, None);

        assert!(cache.invalidate("*").await.is_err());
    }

    #[tokio::test]
    async fn test_disabled_cache_always_computes() {
        let (cache, _clock) = service_with_clock(CacheOptions {
            enabled: false,
            single_flight: true,
        });
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            cache
                .get_or_set("k", TTL, || counting_supplier(&calls, 1))
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().await.entries, Some(0));
    }

    #[tokio::test]
    async fn test_mismatched_cached_shape_is_a_miss() {
        let (cache, _clock) = service_with_clock(CacheOptions::default());

        cache
            .get_or_set("k", TTL, || async { Ok::<_, String>("text".to_string()) })
            .await
            .unwrap();

        let value = cache
            .get_or_set("k", TTL, || async { Ok::<u32, String>(11) })
            .await
            .unwrap();
        assert_eq!(value, 11);
    }

    #[tokio::test]
    async fn test_single_flight_shares_one_computation() {
        let cache = Arc::new(CacheService::in_memory());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_set("slow", TTL, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, String>(99u32)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 99);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.in_flight.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_without_single_flight_each_miss_computes() {
        let cache = Arc::new(CacheService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            CacheOptions {
                enabled: true,
                single_flight: false,
            },
        ));
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(tokio::sync::Barrier::new(4));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let calls = calls.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_set("slow", TTL, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        // Hold every supplier open until all four have started
                        barrier.wait().await;
                        Ok::<_, String>(1u32)
                    })
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (cache, clock) = service_with_clock(CacheOptions::default());
        let calls = AtomicUsize::new(0);

        cache
            .get_or_set("short", Duration::from_secs(5), || counting_supplier(&calls, 1))
            .await
            .unwrap();
        cache
            .get_or_set("long", Duration::from_secs(500), || counting_supplier(&calls, 1))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(10));
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert_eq!(cache.stats().await.entries, Some(1));
    }
}
