//! Idempotent per-message ingestion.
//!
//! Each message is decoded, validated and normalized, checked against the
//! store for an earlier delivery, persisted atomically and finally placed in
//! the cache. The outcome tells the caller whether the message may be
//! acknowledged.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orderflow_core::constants::{
    DEFAULT_FEED_POLL_TIMEOUT_MS, DEFAULT_FEED_RETRY_BACKOFF_MS, DEFAULT_PERSIST_MAX_ATTEMPTS,
    DEFAULT_STORE_TIMEOUT_MS,
};
use orderflow_core::{Order, OrderMessage, StorageError, ValidationError};
use orderflow_storage::{with_deadline, OrderCache, OrderStore, StorageResult};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for message ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// How long one feed poll waits for a message (default: 5 seconds)
    pub poll_timeout: Duration,

    /// Pause after a transient feed error, and the base step of the linear
    /// backoff between persistence attempts (default: 1 second)
    pub retry_backoff: Duration,

    /// Attempts to persist one order before leaving the message for
    /// redelivery (default: 3)
    pub persist_max_attempts: u32,

    /// Deadline for each store call (default: 2 seconds)
    pub store_timeout: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(DEFAULT_FEED_POLL_TIMEOUT_MS),
            retry_backoff: Duration::from_millis(DEFAULT_FEED_RETRY_BACKOFF_MS),
            persist_max_attempts: DEFAULT_PERSIST_MAX_ATTEMPTS,
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
        }
    }
}

impl IngestConfig {
    /// Create IngestConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `ORDERFLOW_FEED_POLL_TIMEOUT_MS`: Feed poll timeout (default: 5000)
    /// - `ORDERFLOW_FEED_RETRY_BACKOFF_MS`: Backoff after feed errors (default: 1000)
    /// - `ORDERFLOW_PERSIST_MAX_ATTEMPTS`: Persistence attempts per message (default: 3)
    /// - `ORDERFLOW_STORE_TIMEOUT_MS`: Per store call deadline (default: 2000)
    pub fn from_env() -> Self {
        let poll_timeout = Duration::from_millis(
            std::env::var("ORDERFLOW_FEED_POLL_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_FEED_POLL_TIMEOUT_MS),
        );

        let retry_backoff = Duration::from_millis(
            std::env::var("ORDERFLOW_FEED_RETRY_BACKOFF_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_FEED_RETRY_BACKOFF_MS),
        );

        let persist_max_attempts = std::env::var("ORDERFLOW_PERSIST_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|attempts: &u32| *attempts > 0)
            .unwrap_or(DEFAULT_PERSIST_MAX_ATTEMPTS);

        let store_timeout = Duration::from_millis(
            std::env::var("ORDERFLOW_STORE_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_STORE_TIMEOUT_MS),
        );

        Self {
            poll_timeout,
            retry_backoff,
            persist_max_attempts,
            store_timeout,
        }
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }
}

// ============================================================================
// OUTCOMES AND STATS
// ============================================================================

/// What happened to one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Persisted and cached.
    Stored,
    /// Already persisted by an earlier delivery; nothing written.
    Duplicate,
    /// Malformed or incomplete; permanently skipped.
    Rejected(ValidationError),
    /// The store refused the order itself; retrying cannot help, so the
    /// message is skipped like a rejected one.
    Dropped(StorageError),
    /// Persistence failed after every attempt; must be redelivered.
    Failed(StorageError),
}

impl IngestOutcome {
    /// Whether the message is fully handled and may be acknowledged.
    pub fn is_final(&self) -> bool {
        !matches!(self, IngestOutcome::Failed(_))
    }

    /// Metric label for this outcome.
    pub fn label(&self) -> &'static str {
        match self {
            IngestOutcome::Stored => "stored",
            IngestOutcome::Duplicate => "duplicate",
            IngestOutcome::Rejected(_) => "rejected",
            IngestOutcome::Dropped(_) => "dropped",
            IngestOutcome::Failed(_) => "failed",
        }
    }
}

/// Ingestion counters.
#[derive(Debug, Default)]
pub struct IngestStats {
    /// Messages handed to the ingestor
    pub received: AtomicU64,

    /// Orders persisted and cached
    pub stored: AtomicU64,

    /// Redeliveries of already stored orders
    pub duplicates: AtomicU64,

    /// Messages that failed decoding or validation
    pub rejected: AtomicU64,

    /// Messages skipped because the store refused the order
    pub dropped: AtomicU64,

    /// Messages left unacknowledged after persistence failures
    pub failed: AtomicU64,

    /// Persistence attempts that were retried
    pub persist_retries: AtomicU64,

    /// Orders whose `date_created` was replaced by the processing time
    pub timestamp_fallbacks: AtomicU64,

    /// Transient errors reported by the feed
    pub feed_errors: AtomicU64,
}

impl IngestStats {
    /// Get current snapshot of all counters.
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            persist_retries: self.persist_retries.load(Ordering::Relaxed),
            timestamp_fallbacks: self.timestamp_fallbacks.load(Ordering::Relaxed),
            feed_errors: self.feed_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of ingestion counters at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStatsSnapshot {
    pub received: u64,
    pub stored: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub failed: u64,
    pub persist_retries: u64,
    pub timestamp_fallbacks: u64,
    pub feed_errors: u64,
}

// ============================================================================
// INGESTOR
// ============================================================================

const CREATE_ORDER: &str = "create_order";

enum Persisted {
    Created,
    AlreadyThere,
}

/// Turns raw feed payloads into stored, cached orders.
pub struct MessageIngestor<S, C>
where
    S: OrderStore + ?Sized,
    C: OrderCache + ?Sized,
{
    store: Arc<S>,
    cache: Arc<C>,
    config: IngestConfig,
    stats: Arc<IngestStats>,
}

impl<S, C> MessageIngestor<S, C>
where
    S: OrderStore + ?Sized,
    C: OrderCache + ?Sized,
{
    pub fn new(store: Arc<S>, cache: Arc<C>, config: IngestConfig) -> Self {
        Self {
            store,
            cache,
            config,
            stats: Arc::new(IngestStats::default()),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Shared counters, readable while the ingest loop runs.
    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    /// Run one message through the pipeline.
    pub async fn process(&self, payload: &[u8]) -> IngestOutcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let order = match self.normalize(payload) {
            Ok(order) => order,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    raw_message = %String::from_utf8_lossy(payload),
                    "Invalid order message, skipping"
                );
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                return IngestOutcome::Rejected(e);
            }
        };

        match self.persist_with_retry(&order).await {
            Ok(Persisted::Created) => {
                let order_uid = order.order_uid.clone();
                self.cache.put(Arc::new(order));
                self.stats.stored.fetch_add(1, Ordering::Relaxed);
                tracing::info!(order_uid = %order_uid, "Order saved");
                IngestOutcome::Stored
            }
            Ok(Persisted::AlreadyThere) => {
                self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
                tracing::info!(order_uid = %order.order_uid, "Order already exists, skipping");
                IngestOutcome::Duplicate
            }
            Err(e) if !e.is_transient() => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    order_uid = %order.order_uid,
                    error = %e,
                    raw_message = %String::from_utf8_lossy(payload),
                    "Store refused order, skipping"
                );
                IngestOutcome::Dropped(e)
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    order_uid = %order.order_uid,
                    error = %e,
                    attempts = self.config.persist_max_attempts,
                    "Failed to save order, leaving message for redelivery"
                );
                IngestOutcome::Failed(e)
            }
        }
    }

    fn normalize(&self, payload: &[u8]) -> Result<Order, ValidationError> {
        let message = OrderMessage::decode(payload)?;
        message.validate()?;

        let raw_date = message.date_created.clone();
        let normalized = message.into_order(Utc::now());
        if normalized.date_created_fallback {
            self.stats.timestamp_fallbacks.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                order_uid = %normalized.order.order_uid,
                date_created = %raw_date,
                "Failed to parse date_created, using processing time"
            );
        }
        Ok(normalized.order)
    }

    async fn persist_with_retry(&self, order: &Order) -> StorageResult<Persisted> {
        let max_attempts = self.config.persist_max_attempts.max(1);
        let mut attempt = 1;
        // Set once a create times out: its commit may have landed anyway.
        let mut write_unconfirmed = false;
        loop {
            match self.persist_once(order).await {
                Ok(Persisted::AlreadyThere) if write_unconfirmed => {
                    tracing::info!(
                        order_uid = %order.order_uid,
                        "Timed out write was committed"
                    );
                    return Ok(Persisted::Created);
                }
                Ok(persisted) => return Ok(persisted),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    if matches!(e, StorageError::Timeout { operation: CREATE_ORDER, .. }) {
                        write_unconfirmed = true;
                    }
                    self.stats.persist_retries.fetch_add(1, Ordering::Relaxed);
                    let backoff = self.config.retry_backoff * attempt;
                    tracing::warn!(
                        order_uid = %order.order_uid,
                        error = %e,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Order persistence failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn persist_once(&self, order: &Order) -> StorageResult<Persisted> {
        let timeout = self.config.store_timeout;

        let exists = with_deadline(
            "order_exists",
            timeout,
            self.store.order_exists(&order.order_uid),
        )
        .await?;
        if exists {
            return Ok(Persisted::AlreadyThere);
        }

        match with_deadline(CREATE_ORDER, timeout, self.store.create_order(order)).await {
            Ok(()) => Ok(Persisted::Created),
            // Lost a race with a concurrent delivery of the same order.
            Err(StorageError::AlreadyExists { .. }) => Ok(Persisted::AlreadyThere),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use orderflow_storage::{MemoryStore, SharedLruCache};
    use std::sync::atomic::{AtomicBool, AtomicU32};

    fn valid_payload(uid: &str) -> Vec<u8> {
        serde_json::json!({
            "order_uid": uid,
            "track_number": "WBILMTESTTRACK",
            "entry": "WBIL",
            "delivery": {"name": "Test Testov", "phone": "+9720000000"},
            "payment": {"currency": "USD", "amount": 1817},
            "items": [{"chrt_id": 9934930, "rid": "r1", "total_price": 317}],
            "customer_id": "test",
            "date_created": "2021-11-26T06:22:19Z"
        })
        .to_string()
        .into_bytes()
    }

    fn fast_config() -> IngestConfig {
        IngestConfig {
            retry_backoff: Duration::from_millis(1),
            store_timeout: Duration::from_secs(1),
            ..IngestConfig::default()
        }
    }

    /// Store whose writes fail a fixed number of times before succeeding.
    struct FailingWrites {
        inner: MemoryStore,
        remaining_failures: AtomicU32,
    }

    impl FailingWrites {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryStore::new(),
                remaining_failures: AtomicU32::new(failures),
            }
        }
    }

    #[async_trait]
    impl OrderStore for FailingWrites {
        async fn create_order(&self, order: &Order) -> StorageResult<()> {
            let left = self.remaining_failures.load(Ordering::SeqCst);
            if left > 0 {
                self.remaining_failures.store(left - 1, Ordering::SeqCst);
                return Err(StorageError::TransactionFailed {
                    reason: "deadlock detected".to_string(),
                });
            }
            self.inner.create_order(order).await
        }

        async fn get_order(&self, order_uid: &str) -> StorageResult<Option<Order>> {
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

    /// Store that refuses every write as invalid data.
    struct RefusingWrites(MemoryStore);

    #[async_trait]
    impl OrderStore for RefusingWrites {
        async fn create_order(&self, _order: &Order) -> StorageResult<()> {
            Err(StorageError::Rejected {
                reason: "invalid byte sequence for encoding \"UTF8\": 0x00".to_string(),
            })
        }

        async fn get_order(&self, order_uid: &str) -> StorageResult<Option<Order>> {
            self.0.get_order(order_uid).await
        }

        async fn order_exists(&self, order_uid: &str) -> StorageResult<bool> {
            self.0.order_exists(order_uid).await
        }

        async fn recent_orders(&self, limit: usize) -> StorageResult<Vec<Order>> {
            self.0.recent_orders(limit).await
        }

        async fn ping(&self) -> StorageResult<()> {
            Ok(())
        }
    }

    /// Store whose first write commits and then stalls past any deadline.
    struct StallAfterCommit {
        inner: MemoryStore,
        stalled: AtomicBool,
    }

    #[async_trait]
    impl OrderStore for StallAfterCommit {
        async fn create_order(&self, order: &Order) -> StorageResult<()> {
            self.inner.create_order(order).await?;
            if !self.stalled.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(())
        }

        async fn get_order(&self, order_uid: &str) -> StorageResult<Option<Order>> {
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

    fn ingestor_with<S: OrderStore>(
        store: Arc<S>,
    ) -> (MessageIngestor<S, SharedLruCache>, Arc<SharedLruCache>) {
        let cache = Arc::new(SharedLruCache::new(8));
        let ingestor = MessageIngestor::new(store, Arc::clone(&cache), fast_config());
        (ingestor, cache)
    }

    #[tokio::test]
    async fn test_valid_message_is_stored_and_cached() {
        let store = Arc::new(MemoryStore::new());
        let (ingestor, cache) = ingestor_with(Arc::clone(&store));

        let outcome = ingestor.process(&valid_payload("a")).await;

        assert_eq!(outcome, IngestOutcome::Stored);
        assert!(store.order_exists("a").await.unwrap());
        assert!(cache.contains("a"));
        assert_eq!(ingestor.stats().snapshot().stored, 1);
    }

    #[tokio::test]
    async fn test_redelivery_is_absorbed() {
        let store = Arc::new(MemoryStore::new());
        let (ingestor, cache) = ingestor_with(Arc::clone(&store));

        assert_eq!(ingestor.process(&valid_payload("a")).await, IngestOutcome::Stored);
        assert_eq!(
            ingestor.process(&valid_payload("a")).await,
            IngestOutcome::Duplicate
        );

        assert_eq!(store.len().await, 1);
        assert_eq!(cache.len(), 1);
        let stats = ingestor.stats().snapshot();
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn test_empty_customer_id_is_rejected_and_never_stored() {
        let store = Arc::new(MemoryStore::new());
        let (ingestor, cache) = ingestor_with(Arc::clone(&store));

        let mut payload: serde_json::Value =
            serde_json::from_slice(&valid_payload("bad")).unwrap();
        payload["customer_id"] = serde_json::json!("");
        let outcome = ingestor.process(payload.to_string().as_bytes()).await;

        assert!(matches!(
            outcome,
            IngestOutcome::Rejected(ValidationError::RequiredFieldMissing { .. })
        ));
        assert!(outcome.is_final());
        assert!(!store.order_exists("bad").await.unwrap());
        assert_eq!(store.get_order("bad").await.unwrap(), None);
        assert!(!cache.contains("bad"));
    }

    #[tokio::test]
    async fn test_garbage_payload_is_rejected() {
        let (ingestor, _cache) = ingestor_with(Arc::new(MemoryStore::new()));

        let outcome = ingestor.process(b"\xff\xfe not json").await;

        assert!(matches!(
            outcome,
            IngestOutcome::Rejected(ValidationError::Malformed { .. })
        ));
        assert_eq!(ingestor.stats().snapshot().rejected, 1);
    }

    #[tokio::test]
    async fn test_bad_date_falls_back_and_is_counted() {
        let store = Arc::new(MemoryStore::new());
        let (ingestor, _cache) = ingestor_with(Arc::clone(&store));

        let mut payload: serde_json::Value = serde_json::from_slice(&valid_payload("d")).unwrap();
        payload["date_created"] = serde_json::json!("26/11/2021");
        let before = Utc::now();
        ingestor.process(payload.to_string().as_bytes()).await;

        let stored = store.get_order("d").await.unwrap().unwrap();
        assert!(stored.date_created >= before - chrono::Duration::seconds(1));
        assert_eq!(ingestor.stats().snapshot().timestamp_fallbacks, 1);
    }

    #[tokio::test]
    async fn test_transient_write_failure_is_retried() {
        let store = Arc::new(FailingWrites::new(2));
        let (ingestor, cache) = ingestor_with(Arc::clone(&store));

        let outcome = ingestor.process(&valid_payload("a")).await;

        assert_eq!(outcome, IngestOutcome::Stored);
        assert!(cache.contains("a"));
        assert_eq!(ingestor.stats().snapshot().persist_retries, 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_leave_message_unfinished() {
        let store = Arc::new(FailingWrites::new(10));
        let (ingestor, cache) = ingestor_with(Arc::clone(&store));

        let outcome = ingestor.process(&valid_payload("a")).await;

        assert!(matches!(
            outcome,
            IngestOutcome::Failed(StorageError::TransactionFailed { .. })
        ));
        assert!(!outcome.is_final());
        assert!(!cache.contains("a"));
        assert!(!store.order_exists("a").await.unwrap());
        assert_eq!(ingestor.stats().snapshot().failed, 1);
    }

    #[tokio::test]
    async fn test_refused_write_is_dropped_without_retry() {
        let store = Arc::new(RefusingWrites(MemoryStore::new()));
        let (ingestor, cache) = ingestor_with(Arc::clone(&store));

        let outcome = ingestor.process(&valid_payload("nul")).await;

        assert!(matches!(
            outcome,
            IngestOutcome::Dropped(StorageError::Rejected { .. })
        ));
        assert!(outcome.is_final());
        assert!(!cache.contains("nul"));
        let stats = ingestor.stats().snapshot();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.persist_retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_write_that_committed_counts_as_stored() {
        let store = Arc::new(StallAfterCommit {
            inner: MemoryStore::new(),
            stalled: AtomicBool::new(false),
        });
        let cache = Arc::new(SharedLruCache::new(8));
        let config = fast_config().with_store_timeout(Duration::from_millis(50));
        let ingestor = MessageIngestor::new(Arc::clone(&store), Arc::clone(&cache), config);

        let outcome = ingestor.process(&valid_payload("late")).await;

        assert_eq!(outcome, IngestOutcome::Stored);
        assert!(cache.contains("late"));
        let stats = ingestor.stats().snapshot();
        assert_eq!(stats.stored, 1);
        assert_eq!(stats.duplicates, 0);
        assert_eq!(stats.persist_retries, 1);
    }

    #[tokio::test]
    async fn test_null_optional_fields_are_stored() {
        let store = Arc::new(MemoryStore::new());
        let (ingestor, cache) = ingestor_with(Arc::clone(&store));

        let mut payload: serde_json::Value = serde_json::from_slice(&valid_payload("n")).unwrap();
        payload["internal_signature"] = serde_json::Value::Null;
        payload["delivery"]["email"] = serde_json::Value::Null;
        payload["payment"]["request_id"] = serde_json::Value::Null;
        payload["items"][0]["sale"] = serde_json::Value::Null;
        let outcome = ingestor.process(payload.to_string().as_bytes()).await;

        assert_eq!(outcome, IngestOutcome::Stored);
        let stored = store.get_order("n").await.unwrap().unwrap();
        assert_eq!(stored.internal_signature, "");
        assert_eq!(stored.delivery.email, "");
        assert_eq!(stored.items[0].sale, 0);
        assert!(cache.contains("n"));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(IngestOutcome::Stored.label(), "stored");
        assert_eq!(IngestOutcome::Duplicate.label(), "duplicate");
        assert!(IngestOutcome::Duplicate.is_final());
        let refused = IngestOutcome::Dropped(StorageError::Rejected {
            reason: "bad".to_string(),
        });
        assert_eq!(refused.label(), "dropped");
        assert!(refused.is_final());
    }
}
