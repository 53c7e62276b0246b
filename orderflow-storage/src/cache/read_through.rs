//! Read-through lookup path.
//!
//! A lookup consults the cache first and only falls back to the store on a
//! miss, backfilling the cache with whatever the store returns. The store is
//! the source of truth; a failed store call leaves the cache untouched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use orderflow_core::Order;

use super::traits::{CacheStats, OrderCache};
use crate::deadline::with_deadline;
use crate::store::{OrderStore, StorageResult};

/// Where a lookup was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    Cache,
    Store,
}

impl ReadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadSource::Cache => "cache",
            ReadSource::Store => "store",
        }
    }
}

/// Result of a successful lookup, carrying where it came from.
#[derive(Debug, Clone)]
pub struct CacheRead {
    order: Arc<Order>,
    source: ReadSource,
}

impl CacheRead {
    /// Create a read served by the cache.
    pub fn from_cache(order: Arc<Order>) -> Self {
        Self {
            order,
            source: ReadSource::Cache,
        }
    }

    /// Create a read served by the store after a cache miss.
    pub fn from_storage(order: Arc<Order>) -> Self {
        Self {
            order,
            source: ReadSource::Store,
        }
    }

    pub fn order(&self) -> &Order {
        &self.order
    }

    /// Consume the wrapper and return the shared snapshot.
    pub fn into_order(self) -> Arc<Order> {
        self.order
    }

    pub fn source(&self) -> ReadSource {
        self.source
    }

    pub fn was_cache_hit(&self) -> bool {
        self.source == ReadSource::Cache
    }
}

/// Lookup counters, updated lock-free.
#[derive(Debug, Default)]
pub struct ReadStats {
    /// Lookups answered by the cache.
    pub cache_hits: AtomicU64,
    /// Lookups answered by the store after a miss.
    pub store_hits: AtomicU64,
    /// Lookups that found nothing anywhere.
    pub not_found: AtomicU64,
    /// Lookups that failed in the store.
    pub errors: AtomicU64,
}

impl ReadStats {
    pub fn snapshot(&self) -> ReadStatsSnapshot {
        ReadStatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            store_hits: self.store_hits.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ReadStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadStatsSnapshot {
    pub cache_hits: u64,
    pub store_hits: u64,
    pub not_found: u64,
    pub errors: u64,
}

/// Read-through cache over an [`OrderStore`].
///
/// # Type Parameters
///
/// - `S`: the durable store consulted on a miss
/// - `C`: the cache answering hits and receiving backfills
pub struct ReadThroughCache<S, C>
where
    S: OrderStore + ?Sized,
    C: OrderCache + ?Sized,
{
    store: Arc<S>,
    cache: Arc<C>,
    store_timeout: Duration,
    stats: ReadStats,
}

impl<S, C> ReadThroughCache<S, C>
where
    S: OrderStore + ?Sized,
    C: OrderCache + ?Sized,
{
    pub fn new(store: Arc<S>, cache: Arc<C>, store_timeout: Duration) -> Self {
        Self {
            store,
            cache,
            store_timeout,
            stats: ReadStats::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    pub fn stats(&self) -> ReadStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Look up an order by key.
    ///
    /// Returns `Ok(None)` when neither the cache nor the store has it. A
    /// store failure (including deadline expiry) is returned as an error and
    /// nothing is written to the cache.
    pub async fn lookup(&self, order_uid: &str) -> StorageResult<Option<CacheRead>> {
        if let Some(order) = self.cache.get(order_uid) {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(CacheRead::from_cache(order)));
        }

        let fetched = with_deadline(
            "get_order",
            self.store_timeout,
            self.store.get_order(order_uid),
        )
        .await;

        match fetched {
            Ok(Some(order)) => {
                let order = Arc::new(order);
                self.cache.put(Arc::clone(&order));
                self.stats.store_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(order_uid, "Order loaded from store into cache");
                Ok(Some(CacheRead::from_storage(order)))
            }
            Ok(None) => {
                self.stats.not_found.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(order_uid, error = %e, "Store lookup failed");
                Err(e)
            }
        }
    }

    /// Most recently created orders, straight from the store.
    ///
    /// Listing does not populate the cache.
    pub async fn list_recent(&self, limit: usize) -> StorageResult<Vec<Order>> {
        with_deadline(
            "recent_orders",
            self.store_timeout,
            self.store.recent_orders(limit),
        )
        .await
    }

    /// Probe the store within the configured deadline.
    pub async fn ping_store(&self) -> StorageResult<()> {
        with_deadline("ping", self.store_timeout, self.store.ping()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::lru::SharedLruCache;
    use crate::store::test_fixtures::order;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use orderflow_core::StorageError;
    use std::sync::atomic::AtomicUsize;

    /// Local double counting point lookups on a `MemoryStore`.
    #[derive(Default)]
    struct LookupCountingStore {
        inner: MemoryStore,
        gets: AtomicUsize,
    }

    #[async_trait]
    impl OrderStore for LookupCountingStore {
        async fn create_order(&self, order: &Order) -> StorageResult<()> {
            self.inner.create_order(order).await
        }

        async fn get_order(&self, order_uid: &str) -> StorageResult<Option<Order>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get_order(order_uid).await
        }

        async fn order_exists(&self, order_uid: &str) -> StorageResult<bool> {
            self.inner.order_exists(order_uid).await
        }

        async fn recent_orders(&self, limit: usize) -> StorageResult<Vec<Order>> {
            self.inner.recent_orders(limit).await
        }

        async fn ping(&self) -> StorageResult<()> {
            Ok(())
        }
    }

    /// Store that never answers.
    struct HangingStore;

    #[async_trait]
    impl OrderStore for HangingStore {
        async fn create_order(&self, _order: &Order) -> StorageResult<()> {
            std::future::pending().await
        }

        async fn get_order(&self, _order_uid: &str) -> StorageResult<Option<Order>> {
            std::future::pending().await
        }

        async fn order_exists(&self, _order_uid: &str) -> StorageResult<bool> {
            std::future::pending().await
        }

        async fn recent_orders(&self, _limit: usize) -> StorageResult<Vec<Order>> {
            std::future::pending().await
        }

        async fn ping(&self) -> StorageResult<()> {
            std::future::pending().await
        }
    }

    fn reads_with(
        store: Arc<LookupCountingStore>,
        capacity: usize,
    ) -> ReadThroughCache<LookupCountingStore, SharedLruCache> {
        ReadThroughCache::new(
            store,
            Arc::new(SharedLruCache::new(capacity)),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_store_hit_backfills_then_cache_serves() {
        let store = Arc::new(LookupCountingStore::default());
        store.create_order(&order("a")).await.unwrap();
        let reads = reads_with(Arc::clone(&store), 4);

        let first = reads.lookup("a").await.unwrap().unwrap();
        assert_eq!(first.source(), ReadSource::Store);
        assert_eq!(first.order().order_uid, "a");
        assert_eq!(store.gets.load(Ordering::SeqCst), 1);

        let second = reads.lookup("a").await.unwrap().unwrap();
        assert!(second.was_cache_hit());
        assert_eq!(store.gets.load(Ordering::SeqCst), 1);
        assert_eq!(second.order(), first.order());

        let stats = reads.stats();
        assert_eq!(stats.store_hits, 1);
        assert_eq!(stats.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_unknown_key_is_not_found_and_not_cached() {
        let store = Arc::new(LookupCountingStore::default());
        let reads = reads_with(Arc::clone(&store), 4);

        assert!(reads.lookup("ghost").await.unwrap().is_none());
        assert!(reads.lookup("ghost").await.unwrap().is_none());

        assert_eq!(store.gets.load(Ordering::SeqCst), 2);
        assert_eq!(reads.cache_stats().size, 0);
        assert_eq!(reads.stats().not_found, 2);
    }

    #[tokio::test]
    async fn test_cached_entry_skips_store() {
        let store = Arc::new(LookupCountingStore::default());
        let reads = reads_with(Arc::clone(&store), 4);
        reads.cache().put(Arc::new(order("warm")));

        let read = reads.lookup("warm").await.unwrap().unwrap();
        assert!(read.was_cache_hit());
        assert_eq!(store.gets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_timeout_surfaces_and_leaves_cache_untouched() {
        let reads = ReadThroughCache::new(
            Arc::new(HangingStore),
            Arc::new(SharedLruCache::new(4)),
            Duration::from_millis(100),
        );

        let err = reads.lookup("a").await.unwrap_err();
        assert!(matches!(err, StorageError::Timeout { operation: "get_order", .. }));
        assert_eq!(reads.cache_stats().size, 0);
        assert_eq!(reads.stats().errors, 1);
    }

    #[tokio::test]
    async fn test_works_with_trait_objects() {
        let store: Arc<dyn OrderStore> = Arc::new(MemoryStore::with_orders([order("a")]));
        let cache: Arc<dyn OrderCache> = Arc::new(SharedLruCache::new(2));
        let reads = ReadThroughCache::new(store, cache, Duration::from_secs(1));

        assert!(reads.lookup("a").await.unwrap().is_some());
        assert_eq!(reads.list_recent(10).await.unwrap().len(), 1);
        reads.ping_store().await.unwrap();
    }
}
