//! In-memory order cache in front of the durable store.
//!
//! [`LruCache`] is the bare data structure: a hash map into a doubly linked
//! recency list, O(1) for every operation. [`SharedLruCache`] puts it behind
//! a single mutex and implements the [`OrderCache`] capability shared by
//! ingestion and the read path.
//!
//! `get` mutates recency order, so reads take the same exclusive lock as
//! writes. Every critical section is O(1) and contention windows stay short.
//!
//! # Example
//!
//! ```ignore
//! let cache = Arc::new(SharedLruCache::new(1000));
//! bootstrap_cache(store.as_ref(), cache.as_ref(), timeout).await;
//!
//! let reads = ReadThroughCache::new(store, cache, timeout);
//! if let Some(read) = reads.lookup("b563feb7b2b84b6test").await? {
//!     println!("served from {:?}", read.source());
//! }
//! ```

pub mod bootstrap;
pub mod lru;
pub mod read_through;
pub mod traits;

pub use bootstrap::bootstrap_cache;
pub use lru::{LruCache, SharedLruCache};
pub use read_through::{CacheRead, ReadSource, ReadStats, ReadStatsSnapshot, ReadThroughCache};
pub use traits::{CacheStats, OrderCache};
