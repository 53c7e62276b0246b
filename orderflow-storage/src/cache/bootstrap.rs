//! Cache warm-up at process start.

use std::sync::Arc;
use std::time::Duration;

use super::traits::OrderCache;
use crate::deadline::with_deadline;
use crate::store::OrderStore;

/// Load up to the cache's capacity of the most recently created orders.
///
/// The store lists newest first; the list is reversed before loading so the
/// newest order ends up most recently used and the oldest loaded order is
/// the first eviction candidate. A store failure is logged and the cache is
/// left empty: startup continues with a cold cache.
///
/// Returns the number of orders loaded.
pub async fn bootstrap_cache<S, C>(store: &S, cache: &C, store_timeout: Duration) -> usize
where
    S: OrderStore + ?Sized,
    C: OrderCache + ?Sized,
{
    let capacity = cache.stats().capacity;
    if capacity == 0 {
        return 0;
    }

    let recent = match with_deadline("recent_orders", store_timeout, store.recent_orders(capacity))
        .await
    {
        Ok(recent) => recent,
        Err(e) => {
            tracing::error!(error = %e, "Failed to restore cache from store, starting cold");
            return 0;
        }
    };

    let oldest_first: Vec<_> = recent.into_iter().rev().map(Arc::new).collect();
    let loaded = cache.bulk_load(oldest_first);

    tracing::info!(loaded, capacity, "Cache restored from store");
    loaded
}
