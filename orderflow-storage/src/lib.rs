//! Orderflow Storage - Store Capability, LRU Cache and Read Path
//!
//! Defines the durable store abstraction consumed by ingestion and the read
//! path, the in-memory LRU cache that fronts it, and the read-through lookup
//! that reconciles the two. The PostgreSQL implementation lives in
//! orderflow-api.

pub mod cache;
pub mod deadline;
pub mod store;

pub use cache::{
    bootstrap_cache, CacheRead, CacheStats, LruCache, OrderCache, ReadSource, ReadStats,
    ReadStatsSnapshot, ReadThroughCache, SharedLruCache,
};
pub use deadline::with_deadline;
pub use store::{MemoryStore, OrderStore, StorageResult};
