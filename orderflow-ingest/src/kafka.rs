//! Kafka consumer-group feed.
//!
//! Offsets are never committed automatically. An acknowledged message only
//! moves the group's committed offset once every earlier message delivered
//! from the same partition is acknowledged too, so a message left
//! unacknowledged is delivered again after a restart or rebalance.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use orderflow_core::constants::{
    DEFAULT_KAFKA_BROKERS, DEFAULT_KAFKA_GROUP_ID, DEFAULT_KAFKA_TOPIC,
};
use orderflow_core::FeedError;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};

use crate::feed::{FeedMessage, MessageFeed};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Where the order topic lives and which group consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub group_id: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: parse_brokers(DEFAULT_KAFKA_BROKERS),
            topic: DEFAULT_KAFKA_TOPIC.to_string(),
            group_id: DEFAULT_KAFKA_GROUP_ID.to_string(),
        }
    }
}

impl KafkaConfig {
    /// Environment variables:
    /// - `ORDERFLOW_KAFKA_BROKERS`: comma-separated `host:port` list (default: localhost:9092)
    /// - `ORDERFLOW_KAFKA_TOPIC` (default: orders)
    /// - `ORDERFLOW_KAFKA_GROUP_ID` (default: order-service-group)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let non_empty = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        Self {
            brokers: non_empty("ORDERFLOW_KAFKA_BROKERS")
                .map(|s| parse_brokers(&s))
                .unwrap_or(defaults.brokers),
            topic: non_empty("ORDERFLOW_KAFKA_TOPIC").unwrap_or(defaults.topic),
            group_id: non_empty("ORDERFLOW_KAFKA_GROUP_ID").unwrap_or(defaults.group_id),
        }
    }

    /// Value for librdkafka's `bootstrap.servers`.
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }
}

fn parse_brokers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|broker| !broker.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// OFFSET TRACKING
// ============================================================================

#[derive(Debug, Default)]
struct PartitionOffsets {
    /// Delivered offsets still waiting for an ack.
    unacked: BTreeSet<i64>,
    /// One past the highest delivered offset.
    end: i64,
    /// Last offset handed to the broker as committed.
    committed: Option<i64>,
}

/// Turns out-of-order acks into a contiguous per-partition commit point.
#[derive(Debug, Default)]
struct OffsetTracker {
    partitions: HashMap<i32, PartitionOffsets>,
}

impl OffsetTracker {
    fn delivered(&mut self, partition: i32, offset: i64) {
        let log = self.partitions.entry(partition).or_default();
        log.unacked.insert(offset);
        log.end = log.end.max(offset + 1);
    }

    /// Record an ack; returns the new commit offset when it moved forward.
    fn acknowledge(&mut self, partition: i32, offset: i64) -> Option<i64> {
        let log = self.partitions.get_mut(&partition)?;
        if !log.unacked.remove(&offset) {
            return None;
        }
        let next = log.unacked.first().copied().unwrap_or(log.end);
        if log.committed.is_some_and(|committed| committed >= next) {
            return None;
        }
        log.committed = Some(next);
        Some(next)
    }
}

// ============================================================================
// FEED
// ============================================================================

/// [`MessageFeed`] over one topic of a Kafka consumer group.
pub struct KafkaFeed {
    consumer: StreamConsumer,
    topic: String,
    offsets: OffsetTracker,
}

impl KafkaFeed {
    /// Create the consumer and subscribe to the configured topic.
    ///
    /// Connection happens lazily; an unreachable broker surfaces later as
    /// transient poll errors.
    pub fn connect(config: &KafkaConfig) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.bootstrap_servers())
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;
        consumer.subscribe(&[config.topic.as_str()])?;

        tracing::info!(
            brokers = %config.bootstrap_servers(),
            topic = %config.topic,
            group_id = %config.group_id,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
            offsets: OffsetTracker::default(),
        })
    }
}

fn transient(err: KafkaError) -> FeedError {
    FeedError::Transient {
        reason: err.to_string(),
    }
}

#[async_trait]
impl MessageFeed for KafkaFeed {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<FeedMessage>, FeedError> {
        let message = match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => return Ok(None),
            Ok(Err(e)) => return Err(transient(e)),
            Ok(Ok(message)) => FeedMessage {
                partition: message.partition(),
                offset: message.offset(),
                payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            },
        };

        tracing::debug!(
            topic = %self.topic,
            partition = message.partition,
            offset = message.offset,
            "Received Kafka message"
        );
        self.offsets.delivered(message.partition, message.offset);
        Ok(Some(message))
    }

    async fn ack(&mut self, message: &FeedMessage) -> Result<(), FeedError> {
        let Some(next) = self.offsets.acknowledge(message.partition, message.offset) else {
            return Ok(());
        };

        let mut commit = TopicPartitionList::new();
        commit
            .add_partition_offset(&self.topic, message.partition, Offset::Offset(next))
            .map_err(transient)?;
        self.consumer
            .commit(&commit, CommitMode::Async)
            .map_err(transient)
    }
}
