//! Constants shared across orderflow crates.

// ============================================================================
// CACHE
// ============================================================================

/// Default number of orders held by the in-memory cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Default deadline for a single durable-store call, in milliseconds.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 2000;

// ============================================================================
// LISTING
// ============================================================================

/// Default number of orders returned by the listing call.
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Hard cap on the listing call's limit.
pub const MAX_LIST_LIMIT: usize = 1000;

// ============================================================================
// INGESTION
// ============================================================================

/// How long one feed poll waits for a message before returning empty.
pub const DEFAULT_FEED_POLL_TIMEOUT_MS: u64 = 5000;

/// Pause after a transient feed error before polling again.
pub const DEFAULT_FEED_RETRY_BACKOFF_MS: u64 = 1000;

/// Attempts made to persist one order before leaving it for redelivery.
pub const DEFAULT_PERSIST_MAX_ATTEMPTS: u32 = 3;

// ============================================================================
// KAFKA
// ============================================================================

/// Broker list used when none is configured.
pub const DEFAULT_KAFKA_BROKERS: &str = "localhost:9092";

/// Topic carrying order messages.
pub const DEFAULT_KAFKA_TOPIC: &str = "orders";

/// Consumer group whose committed offsets track ingestion progress.
pub const DEFAULT_KAFKA_GROUP_ID: &str = "order-service-group";
