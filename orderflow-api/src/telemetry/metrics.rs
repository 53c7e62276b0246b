//! Prometheus Metrics
//!
//! `ServiceMetrics` owns a private registry and is injected wherever it is
//! needed. Component counters (`IngestStats`, `ReadStats`, cache stats) stay
//! lock-free atomics; they are folded into the registry when `/metrics` is
//! scraped. Store latency is observed directly by [`MeteredStore`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, response::IntoResponse};
use orderflow_core::Order;
use orderflow_ingest::IngestStatsSnapshot;
use orderflow_storage::{CacheStats, OrderStore, ReadStatsSnapshot, StorageResult};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Store operation latency buckets (seconds)
const STORE_LATENCY_BUCKETS: &[f64] =
    &[0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0];

/// Container for all service metrics.
#[derive(Clone)]
pub struct ServiceMetrics {
    registry: Registry,

    /// Serializes folds; `advance` reads then increments.
    fold_lock: Arc<Mutex<()>>,

    /// Ingested messages - labels: outcome
    pub ingest_messages_total: IntCounterVec,

    /// Transient feed errors
    pub feed_errors_total: IntCounter,

    /// Read path lookups - labels: source (cache, store, not_found, error)
    pub cache_lookups_total: IntCounterVec,

    /// Entries evicted from the cache
    pub cache_evictions_total: IntCounter,

    /// Store call duration - labels: operation
    pub store_operation_duration_seconds: HistogramVec,

    /// Failed store calls - labels: operation
    pub store_errors_total: IntCounterVec,

    pub cache_entries: IntGauge,
    pub cache_capacity: IntGauge,
}

fn registration_failed(name: &str, err: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, err))
}

impl ServiceMetrics {
    /// Create all metrics and register them with a fresh registry.
    pub fn new() -> ApiResult<Self> {
        let registry = Registry::new();

        let ingest_messages_total = IntCounterVec::new(
            Opts::new(
                "orderflow_ingest_messages_total",
                "Messages processed by the ingestor",
            ),
            &["outcome"],
        )
        .map_err(|e| registration_failed("ingest_messages_total", e))?;

        let feed_errors_total = IntCounter::new(
            "orderflow_feed_errors_total",
            "Transient errors reported by the message feed",
        )
        .map_err(|e| registration_failed("feed_errors_total", e))?;

        let cache_lookups_total = IntCounterVec::new(
            Opts::new(
                "orderflow_cache_lookups_total",
                "Order lookups by where they were answered",
            ),
            &["source"],
        )
        .map_err(|e| registration_failed("cache_lookups_total", e))?;

        let cache_evictions_total = IntCounter::new(
            "orderflow_cache_evictions_total",
            "Entries evicted from the order cache",
        )
        .map_err(|e| registration_failed("cache_evictions_total", e))?;

        let store_operation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "orderflow_store_operation_duration_seconds",
                "Order store call duration in seconds",
            )
            .buckets(STORE_LATENCY_BUCKETS.to_vec()),
            &["operation"],
        )
        .map_err(|e| registration_failed("store_operation_duration_seconds", e))?;

        let store_errors_total = IntCounterVec::new(
            Opts::new("orderflow_store_errors_total", "Failed order store calls"),
            &["operation"],
        )
        .map_err(|e| registration_failed("store_errors_total", e))?;

        let cache_entries = IntGauge::new("orderflow_cache_entries", "Orders currently cached")
            .map_err(|e| registration_failed("cache_entries", e))?;

        let cache_capacity =
            IntGauge::new("orderflow_cache_capacity", "Maximum number of cached orders")
                .map_err(|e| registration_failed("cache_capacity", e))?;

        let metrics = Self {
            registry,
            fold_lock: Arc::new(Mutex::new(())),
            ingest_messages_total,
            feed_errors_total,
            cache_lookups_total,
            cache_evictions_total,
            store_operation_duration_seconds,
            store_errors_total,
            cache_entries,
            cache_capacity,
        };
        metrics.register_all()?;
        Ok(metrics)
    }

    fn register_all(&self) -> ApiResult<()> {
        let collectors: Vec<(&str, Box<dyn prometheus::core::Collector>)> = vec![
            ("ingest_messages_total", Box::new(self.ingest_messages_total.clone())),
            ("feed_errors_total", Box::new(self.feed_errors_total.clone())),
            ("cache_lookups_total", Box::new(self.cache_lookups_total.clone())),
            ("cache_evictions_total", Box::new(self.cache_evictions_total.clone())),
            (
                "store_operation_duration_seconds",
                Box::new(self.store_operation_duration_seconds.clone()),
            ),
            ("store_errors_total", Box::new(self.store_errors_total.clone())),
            ("cache_entries", Box::new(self.cache_entries.clone())),
            ("cache_capacity", Box::new(self.cache_capacity.clone())),
        ];

        for (name, collector) in collectors {
            self.registry
                .register(collector)
                .map_err(|e| registration_failed(name, e))?;
        }
        Ok(())
    }

    /// Record one store call.
    pub fn record_store_operation(&self, operation: &str, success: bool, duration_secs: f64) {
        self.store_operation_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
        if !success {
            self.store_errors_total.with_label_values(&[operation]).inc();
        }
    }

    /// Bring the registry up to date with component counters.
    pub fn fold_snapshots(
        &self,
        ingest: &IngestStatsSnapshot,
        reads: &ReadStatsSnapshot,
        cache: &CacheStats,
    ) {
        let _folding = self.fold_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let outcomes = [
            ("stored", ingest.stored),
            ("duplicate", ingest.duplicates),
            ("rejected", ingest.rejected),
            ("dropped", ingest.dropped),
            ("failed", ingest.failed),
        ];
        for (outcome, total) in outcomes {
            advance(&self.ingest_messages_total.with_label_values(&[outcome]), total);
        }
        advance(&self.feed_errors_total, ingest.feed_errors);

        let sources = [
            ("cache", reads.cache_hits),
            ("store", reads.store_hits),
            ("not_found", reads.not_found),
            ("error", reads.errors),
        ];
        for (source, total) in sources {
            advance(&self.cache_lookups_total.with_label_values(&[source]), total);
        }
        advance(&self.cache_evictions_total, cache.evictions);

        self.cache_entries.set(clamp_i64(cache.size));
        self.cache_capacity.set(clamp_i64(cache.capacity));
    }

    /// Render the registry in the Prometheus text format.
    pub fn encode(&self) -> ApiResult<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| ApiError::internal_error(format!("Failed to encode metrics: {}", e)))?;
        Ok(buffer)
    }
}

/// Counters only move forward; catch up to a monotonic snapshot value.
/// Callers must hold `fold_lock`.
fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

fn clamp_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Observability",
    responses(
        (status = 200, description = "Prometheus metrics in text format", content_type = "text/plain"),
        (status = 500, description = "Failed to encode metrics"),
    ),
)]
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.fold_snapshots(
        &state.ingest_stats.snapshot(),
        &state.reader.stats(),
        &state.reader.cache_stats(),
    );

    match state.metrics.encode() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.message.into_bytes(),
            )
        }
    }
}

// ============================================================================
// METERED STORE
// ============================================================================

/// [`OrderStore`] decorator recording the latency of every call.
pub struct MeteredStore<S> {
    inner: S,
    metrics: Arc<ServiceMetrics>,
}

impl<S> MeteredStore<S> {
    pub fn new(inner: S, metrics: Arc<ServiceMetrics>) -> Self {
        Self { inner, metrics }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn start(&self, operation: &'static str) -> CallTimer<'_> {
        CallTimer {
            metrics: &self.metrics,
            operation,
            started: Instant::now(),
            success: false,
        }
    }
}

/// Records one store call when dropped. A call whose future is dropped
/// before it finishes, as on a deadline, is recorded as failed.
struct CallTimer<'a> {
    metrics: &'a ServiceMetrics,
    operation: &'static str,
    started: Instant,
    success: bool,
}

impl CallTimer<'_> {
    fn finish<T>(mut self, result: &StorageResult<T>) {
        self.success = result.is_ok();
    }
}

impl Drop for CallTimer<'_> {
    fn drop(&mut self) {
        self.metrics.record_store_operation(
            self.operation,
            self.success,
            self.started.elapsed().as_secs_f64(),
        );
    }
}

#[async_trait]
impl<S: OrderStore> OrderStore for MeteredStore<S> {
    async fn create_order(&self, order: &Order) -> StorageResult<()> {
        let timer = self.start("create_order");
        let result = self.inner.create_order(order).await;
        timer.finish(&result);
        result
    }

    async fn get_order(&self, order_uid: &str) -> StorageResult<Option<Order>> {
        let timer = self.start("get_order");
        let result = self.inner.get_order(order_uid).await;
        timer.finish(&result);
        result
    }

    async fn order_exists(&self, order_uid: &str) -> StorageResult<bool> {
        let timer = self.start("order_exists");
        let result = self.inner.order_exists(order_uid).await;
        timer.finish(&result);
        result
    }

    async fn recent_orders(&self, limit: usize) -> StorageResult<Vec<Order>> {
        let timer = self.start("recent_orders");
        let result = self.inner.recent_orders(limit).await;
        timer.finish(&result);
        result
    }

    async fn ping(&self) -> StorageResult<()> {
        let timer = self.start("ping");
        let result = self.inner.ping().await;
        timer.finish(&result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderflow_storage::with_deadline;
    use orderflow_test_utils::fixtures::sample_order;
    use orderflow_test_utils::FlakyStore;
    use std::time::Duration;

    /// Store whose calls never complete.
    struct Hung;

    #[async_trait]
    impl OrderStore for Hung {
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

    fn render(metrics: &ServiceMetrics) -> Result<String, String> {
        let bytes = metrics.encode().map_err(|e| e.message)?;
        String::from_utf8(bytes).map_err(|e| e.to_string())
    }

    #[test]
    fn test_registries_are_independent() -> Result<(), String> {
        let first = ServiceMetrics::new().map_err(|e| e.message)?;
        let second = ServiceMetrics::new().map_err(|e| e.message)?;

        first.feed_errors_total.inc();
        assert_eq!(first.feed_errors_total.get(), 1);
        assert_eq!(second.feed_errors_total.get(), 0);
        Ok(())
    }

    #[test]
    fn test_fold_snapshots_is_idempotent() -> Result<(), String> {
        let metrics = ServiceMetrics::new().map_err(|e| e.message)?;
        let ingest = IngestStatsSnapshot {
            stored: 3,
            duplicates: 1,
            ..IngestStatsSnapshot::default()
        };
        let reads = ReadStatsSnapshot {
            cache_hits: 5,
            ..ReadStatsSnapshot::default()
        };
        let cache = CacheStats {
            size: 3,
            capacity: 10,
            evictions: 2,
            ..CacheStats::default()
        };

        metrics.fold_snapshots(&ingest, &reads, &cache);
        metrics.fold_snapshots(&ingest, &reads, &cache);

        let stored = metrics.ingest_messages_total.with_label_values(&["stored"]);
        assert_eq!(stored.get(), 3);
        assert_eq!(metrics.cache_lookups_total.with_label_values(&["cache"]).get(), 5);
        assert_eq!(metrics.cache_evictions_total.get(), 2);
        assert_eq!(metrics.cache_entries.get(), 3);
        assert_eq!(metrics.cache_capacity.get(), 10);

        let text = render(&metrics)?;
        assert!(text.contains("orderflow_ingest_messages_total{outcome=\"stored\"} 3"));
        assert!(text.contains("orderflow_cache_capacity 10"));
        Ok(())
    }

    #[tokio::test]
    async fn test_metered_store_records_success_and_failure() -> Result<(), String> {
        let metrics = Arc::new(ServiceMetrics::new().map_err(|e| e.message)?);
        let store = MeteredStore::new(FlakyStore::new(), Arc::clone(&metrics));

        store
            .create_order(&sample_order("metered"))
            .await
            .map_err(|e| e.to_string())?;
        store.inner().set_down(true);
        assert!(store.get_order("metered").await.is_err());

        let created = metrics
            .store_operation_duration_seconds
            .with_label_values(&["create_order"]);
        assert_eq!(created.get_sample_count(), 1);
        assert_eq!(metrics.store_errors_total.with_label_values(&["get_order"]).get(), 1);
        assert_eq!(metrics.store_errors_total.with_label_values(&["create_order"]).get(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_metered_store_records_abandoned_call_as_error() -> Result<(), String> {
        let metrics = Arc::new(ServiceMetrics::new().map_err(|e| e.message)?);
        let store = MeteredStore::new(Hung, Arc::clone(&metrics));

        let deadline = Duration::from_millis(20);
        let result = with_deadline("order_exists", deadline, store.order_exists("slow")).await;
        assert!(matches!(result, Err(orderflow_core::StorageError::Timeout { .. })));

        let timed = metrics
            .store_operation_duration_seconds
            .with_label_values(&["order_exists"]);
        assert_eq!(timed.get_sample_count(), 1);
        assert!(timed.get_sample_sum() >= deadline.as_secs_f64() * 0.9);
        assert_eq!(metrics.store_errors_total.with_label_values(&["order_exists"]).get(), 1);
        Ok(())
    }

    #[test]
    fn test_concurrent_folds_never_overshoot() -> Result<(), String> {
        let metrics = ServiceMetrics::new().map_err(|e| e.message)?;
        let ingest = IngestStatsSnapshot {
            stored: 1_000,
            dropped: 7,
            feed_errors: 500,
            ..IngestStatsSnapshot::default()
        };
        let reads = ReadStatsSnapshot {
            cache_hits: 250,
            ..ReadStatsSnapshot::default()
        };
        let cache = CacheStats::default();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        metrics.fold_snapshots(&ingest, &reads, &cache);
                    }
                });
            }
        });

        assert_eq!(metrics.ingest_messages_total.with_label_values(&["stored"]).get(), 1_000);
        assert_eq!(metrics.ingest_messages_total.with_label_values(&["dropped"]).get(), 7);
        assert_eq!(metrics.feed_errors_total.get(), 500);
        assert_eq!(metrics.cache_lookups_total.with_label_values(&["cache"]).get(), 250);
        Ok(())
    }
}
