//! Orderflow Ingest - Message Feed and Idempotent Ingestion
//!
//! This crate consumes order messages from an at-least-once feed and turns
//! them into stored, cached orders.
//!
//! # Pipeline
//!
//! ```text
//! feed ─poll→ decode → validate → exists? ─no→ create_order → cache.put ─→ ack
//!                         │           └─yes→ skip ──────────────────────→ ack
//!                         └─invalid→ log ───────────────────────────────→ ack
//!                                 create_order refused by the store → ack
//!                     create_order failed transiently after retries → no ack
//! ```
//!
//! # Key Types
//!
//! - `MessageFeed`: feed capability with per-message acknowledgement
//! - `KafkaFeed`: consumer-group feed committing acknowledged offsets
//! - `InMemoryFeed`: partitioned broker stand-in supporting redelivery
//! - `JsonLinesFeed`: one JSON message per line from any async reader
//! - `MessageIngestor`: the per-message pipeline
//! - `run_ingest_loop`: sequential driver with cooperative shutdown

pub mod feed;
pub mod ingestor;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod worker;

pub use feed::{FeedMessage, FeedProducer, InMemoryFeed, JsonLinesFeed, MessageFeed};
pub use ingestor::{IngestConfig, IngestOutcome, IngestStats, IngestStatsSnapshot, MessageIngestor};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaConfig, KafkaFeed};
pub use worker::run_ingest_loop;
