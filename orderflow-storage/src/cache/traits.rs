//! Cache capability trait and statistics.

use std::sync::Arc;

use orderflow_core::Order;
use serde::Serialize;

/// Order cache capability.
///
/// Values are shared immutable snapshots; callers never mutate an order in
/// place. Implementations must be safe to share between the ingest loop and
/// concurrent request handlers.
pub trait OrderCache: Send + Sync {
    /// Look up an order, marking it most recently used on a hit.
    fn get(&self, order_uid: &str) -> Option<Arc<Order>>;

    /// Insert or overwrite the entry keyed by `order.order_uid`, marking it
    /// most recently used. Evicts the least recently used entry when over
    /// capacity.
    fn put(&self, order: Arc<Order>);

    /// Insert orders in the given sequence until capacity is reached. The
    /// first inserted entry ends up least recently used. Returns the number
    /// of orders loaded.
    fn bulk_load(&self, orders: Vec<Arc<Order>>) -> usize;

    /// Point-in-time statistics.
    fn stats(&self) -> CacheStats;

    /// Remove every entry.
    fn clear(&self);
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of entries currently cached.
    pub size: usize,
    /// Maximum number of entries.
    pub capacity: usize,
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries dropped to stay within capacity.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }
}
