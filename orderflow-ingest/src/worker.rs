//! Sequential ingest loop.
//!
//! One message is processed completely (decode through cache update) before
//! the next is polled. The shutdown signal is observed between messages, so
//! an in-flight write always runs to completion or failure first.

use std::sync::Arc;

use orderflow_core::FeedError;
use orderflow_storage::{OrderCache, OrderStore};
use tokio::sync::watch;
use tracing::Instrument;

use crate::feed::MessageFeed;
use crate::ingestor::{IngestStatsSnapshot, MessageIngestor};

/// Drive `ingestor` from `feed` until the feed closes or shutdown is
/// signalled.
///
/// Messages are acknowledged only when their outcome is final: stored,
/// duplicate, rejected, or dropped after the store refused it. A message
/// whose persistence failed transiently is left unacknowledged so the feed
/// delivers it again.
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(run_ingest_loop(feed, ingestor, shutdown_rx));
///
/// // Later, trigger shutdown
/// let _ = shutdown_tx.send(true);
/// let stats = handle.await?;
/// ```
pub async fn run_ingest_loop<F, S, C>(
    mut feed: F,
    ingestor: Arc<MessageIngestor<S, C>>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> IngestStatsSnapshot
where
    F: MessageFeed,
    S: OrderStore + ?Sized,
    C: OrderCache + ?Sized,
{
    let config = ingestor.config().clone();
    let stats = ingestor.stats();

    tracing::info!(
        poll_timeout_ms = config.poll_timeout.as_millis() as u64,
        persist_max_attempts = config.persist_max_attempts,
        "Ingest loop started"
    );

    loop {
        if *shutdown_rx.borrow() {
            tracing::info!("Ingest loop shutting down");
            break;
        }

        let polled = tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    tracing::info!("Shutdown sender dropped, stopping ingest loop");
                    break;
                }
                continue;
            }

            polled = feed.poll(config.poll_timeout) => polled,
        };

        match polled {
            Ok(Some(message)) => {
                let span = tracing::info_span!(
                    "ingest_message",
                    partition = message.partition,
                    offset = message.offset
                );
                let outcome = ingestor.process(&message.payload).instrument(span).await;

                if outcome.is_final() {
                    if let Err(e) = feed.ack(&message).await {
                        tracing::warn!(
                            partition = message.partition,
                            offset = message.offset,
                            error = %e,
                            "Failed to acknowledge message"
                        );
                    }
                } else {
                    tracing::warn!(
                        partition = message.partition,
                        offset = message.offset,
                        "Message left unacknowledged for redelivery"
                    );
                }
            }
            Ok(None) => {
                tracing::trace!("No message within poll timeout");
            }
            Err(FeedError::Closed) => {
                tracing::info!("Feed closed, stopping ingest loop");
                break;
            }
            Err(FeedError::Transient { reason }) => {
                stats
                    .feed_errors
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                tracing::error!(error = %reason, "Error reading message");

                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {}
                    _ = tokio::time::sleep(config.retry_backoff) => {}
                }
            }
        }
    }

    let snapshot = stats.snapshot();
    tracing::info!(
        received = snapshot.received,
        stored = snapshot.stored,
        duplicates = snapshot.duplicates,
        rejected = snapshot.rejected,
        dropped = snapshot.dropped,
        failed = snapshot.failed,
        "Ingest loop completed"
    );

    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::InMemoryFeed;
    use crate::ingestor::IngestConfig;
    use orderflow_storage::{MemoryStore, SharedLruCache};
    use std::time::Duration;

    fn payload(uid: &str) -> String {
        serde_json::json!({
            "order_uid": uid,
            "track_number": "TRACK",
            "delivery": {"name": "N", "phone": "+1"},
            "payment": {"currency": "USD", "amount": 10},
            "items": [{"rid": "r"}],
            "customer_id": "c",
            "date_created": "2021-11-26T06:22:19Z"
        })
        .to_string()
    }

    fn ingestor(
        store: Arc<MemoryStore>,
    ) -> Arc<MessageIngestor<MemoryStore, SharedLruCache>> {
        let config = IngestConfig {
            poll_timeout: Duration::from_millis(20),
            retry_backoff: Duration::from_millis(1),
            ..IngestConfig::default()
        };
        Arc::new(MessageIngestor::new(
            store,
            Arc::new(SharedLruCache::new(16)),
            config,
        ))
    }

    #[tokio::test]
    async fn test_loop_drains_feed_until_closed() {
        let store = Arc::new(MemoryStore::new());
        let feed = InMemoryFeed::new();
        let producer = feed.producer();
        producer.publish(0, payload("a"));
        producer.publish(1, payload("b"));
        producer.publish(0, payload("a"));
        producer.publish(0, "{broken");
        producer.close();

        let (_tx, rx) = watch::channel(false);
        let stats = run_ingest_loop(feed, ingestor(Arc::clone(&store)), rx).await;

        assert_eq!(stats.received, 4);
        assert_eq!(stats.stored, 2);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(store.len().await, 2);
        assert_eq!(producer.uncommitted(), 0);
    }

    #[tokio::test]
    async fn test_loop_accepts_boxed_feed() {
        let store = Arc::new(MemoryStore::new());
        let feed = InMemoryFeed::new();
        let producer = feed.producer();
        producer.publish(0, payload("boxed"));
        producer.close();

        let boxed: Box<dyn MessageFeed> = Box::new(feed);
        let (_tx, rx) = watch::channel(false);
        let stats = run_ingest_loop(boxed, ingestor(Arc::clone(&store)), rx).await;

        assert_eq!(stats.stored, 1);
        assert_eq!(producer.committed_offset(0), 1);
    }

    #[tokio::test]
    async fn test_transient_feed_error_does_not_stop_loop() {
        let store = Arc::new(MemoryStore::new());
        let feed = InMemoryFeed::new();
        let producer = feed.producer();
        producer.inject_error("leader not available");
        producer.publish(0, payload("a"));
        producer.close();

        let (_tx, rx) = watch::channel(false);
        let stats = run_ingest_loop(feed, ingestor(Arc::clone(&store)), rx).await;

        assert_eq!(stats.feed_errors, 1);
        assert_eq!(stats.stored, 1);
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_idle_loop() {
        let store = Arc::new(MemoryStore::new());
        let feed = InMemoryFeed::new();
        let producer = feed.producer();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run_ingest_loop(feed, ingestor(Arc::clone(&store)), rx));

        producer.publish(0, payload("a"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let stats = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.stored, 1);
    }
}
