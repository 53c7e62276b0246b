//! Message feed capability and implementations.
//!
//! A feed delivers raw order messages at least once. Messages carry their
//! partition and offset; within one partition they arrive in offset order.
//! The consumer acknowledges a message once its outcome is final, and only
//! acknowledged messages are safe from redelivery.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use orderflow_core::FeedError;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::Notify;
use tokio::time::Instant;

/// One message read from a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMessage {
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

/// At-least-once message source.
#[async_trait]
pub trait MessageFeed: Send {
    /// Wait up to `timeout` for the next message.
    ///
    /// `Ok(None)` means nothing arrived in time and is not an error.
    /// [`FeedError::Transient`] asks the caller to back off and poll again;
    /// [`FeedError::Closed`] means no further messages will ever arrive.
    ///
    /// Implementations must be cancel safe: dropping the future before it
    /// completes must not lose a message.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<FeedMessage>, FeedError>;

    /// Mark a delivered message as fully handled.
    async fn ack(&mut self, message: &FeedMessage) -> Result<(), FeedError>;
}

/// Lets a caller keep ownership of a feed across several loop runs.
#[async_trait]
impl<'a, F> MessageFeed for &'a mut F
where
    F: MessageFeed + ?Sized,
{
    async fn poll(&mut self, timeout: Duration) -> Result<Option<FeedMessage>, FeedError> {
        (**self).poll(timeout).await
    }

    async fn ack(&mut self, message: &FeedMessage) -> Result<(), FeedError> {
        (**self).ack(message).await
    }
}

#[async_trait]
impl<F> MessageFeed for Box<F>
where
    F: MessageFeed + ?Sized,
{
    async fn poll(&mut self, timeout: Duration) -> Result<Option<FeedMessage>, FeedError> {
        (**self).poll(timeout).await
    }

    async fn ack(&mut self, message: &FeedMessage) -> Result<(), FeedError> {
        (**self).ack(message).await
    }
}

// ============================================================================
// IN-MEMORY FEED
// ============================================================================

#[derive(Debug, Default)]
struct PartitionLog {
    payloads: Vec<Vec<u8>>,
    /// Next offset to deliver.
    cursor: usize,
    /// Every offset below this one is acknowledged.
    committed: usize,
    /// Acknowledged offsets at or above `committed`.
    acked: BTreeSet<usize>,
}

impl PartitionLog {
    fn ack(&mut self, offset: usize) {
        if offset < self.committed || offset >= self.payloads.len() {
            return;
        }
        self.acked.insert(offset);
        while self.acked.remove(&self.committed) {
            self.committed += 1;
        }
    }
}

#[derive(Debug)]
struct FeedState {
    partitions: BTreeMap<i32, PartitionLog>,
    pending_errors: VecDeque<String>,
    last_partition: i32,
    closed: bool,
}

impl FeedState {
    /// Next undelivered message, rotating across partitions.
    fn next_ready(&mut self) -> Option<FeedMessage> {
        let ready = |log: &PartitionLog| log.cursor < log.payloads.len();
        let partition = self
            .partitions
            .range((Excluded(self.last_partition), Unbounded))
            .find(|(_, log)| ready(log))
            .or_else(|| self.partitions.iter().find(|(_, log)| ready(log)))
            .map(|(partition, _)| *partition)?;

        let log = self.partitions.get_mut(&partition)?;
        let offset = log.cursor;
        log.cursor += 1;
        self.last_partition = partition;

        Some(FeedMessage {
            partition,
            offset: offset as i64,
            payload: log.payloads[offset].clone(),
        })
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<FeedState>,
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Partitioned in-memory feed with per-message acknowledgement.
///
/// Behaves like a log-based broker: each partition keeps every message, a
/// delivery cursor and a committed offset (the end of the contiguous run of
/// acknowledged messages). [`FeedProducer::redeliver_pending`] rewinds every
/// cursor to its committed offset, which is what a consumer restart or
/// rebalance looks like.
#[derive(Debug)]
pub struct InMemoryFeed {
    shared: Arc<Shared>,
}

/// Publishing and control handle for an [`InMemoryFeed`].
#[derive(Debug, Clone)]
pub struct FeedProducer {
    shared: Arc<Shared>,
}

impl InMemoryFeed {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(FeedState {
                    partitions: BTreeMap::new(),
                    pending_errors: VecDeque::new(),
                    last_partition: i32::MIN,
                    closed: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    pub fn producer(&self) -> FeedProducer {
        FeedProducer {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Default for InMemoryFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedProducer {
    /// Append a message to `partition`, returning its offset.
    pub fn publish(&self, partition: i32, payload: impl Into<Vec<u8>>) -> i64 {
        let offset = {
            let mut state = self.shared.lock();
            let log = state.partitions.entry(partition).or_default();
            log.payloads.push(payload.into());
            log.payloads.len() - 1
        };
        self.shared.notify.notify_one();
        offset as i64
    }

    /// Make the next poll fail with [`FeedError::Transient`].
    pub fn inject_error(&self, reason: impl Into<String>) {
        self.shared.lock().pending_errors.push_back(reason.into());
        self.shared.notify.notify_one();
    }

    /// Stop accepting messages. Polls drain what is left, then report
    /// [`FeedError::Closed`].
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.notify.notify_one();
    }

    /// Rewind every partition to its committed offset so unacknowledged
    /// messages (and anything delivered after them) are delivered again.
    /// Returns the number of messages that will be redelivered.
    pub fn redeliver_pending(&self) -> usize {
        let rewound = {
            let mut state = self.shared.lock();
            state
                .partitions
                .values_mut()
                .map(|log| {
                    let rewound = log.cursor - log.committed;
                    log.cursor = log.committed;
                    rewound
                })
                .sum()
        };
        if rewound > 0 {
            self.shared.notify.notify_one();
        }
        rewound
    }

    /// Committed offset of `partition`: the offset of its first
    /// unacknowledged message.
    pub fn committed_offset(&self, partition: i32) -> i64 {
        self.shared
            .lock()
            .partitions
            .get(&partition)
            .map_or(0, |log| log.committed as i64)
    }

    /// Messages delivered or waiting that are not yet committed.
    pub fn uncommitted(&self) -> usize {
        self.shared
            .lock()
            .partitions
            .values()
            .map(|log| log.payloads.len() - log.committed)
            .sum()
    }
}

#[async_trait]
impl MessageFeed for InMemoryFeed {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<FeedMessage>, FeedError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.shared.lock();
                if let Some(reason) = state.pending_errors.pop_front() {
                    return Err(FeedError::Transient { reason });
                }
                if let Some(message) = state.next_ready() {
                    return Ok(Some(message));
                }
                if state.closed {
                    return Err(FeedError::Closed);
                }
            }

            if tokio::time::timeout_at(deadline, self.shared.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn ack(&mut self, message: &FeedMessage) -> Result<(), FeedError> {
        let offset = usize::try_from(message.offset).map_err(|_| FeedError::Transient {
            reason: format!("negative offset {}", message.offset),
        })?;
        if let Some(log) = self.shared.lock().partitions.get_mut(&message.partition) {
            log.ack(offset);
        }
        Ok(())
    }
}

// ============================================================================
// JSON LINES FEED
// ============================================================================

/// Feed reading one JSON message per line from any async reader (a file,
/// stdin, a socket).
///
/// Everything arrives on partition 0 with the line number as offset. A
/// stream cannot be rewound, so acknowledgement is a no-op. End of input
/// closes the feed.
pub struct JsonLinesFeed<R> {
    lines: Lines<R>,
    next_offset: i64,
}

impl<R> JsonLinesFeed<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            next_offset: 0,
        }
    }
}

#[async_trait]
impl<R> MessageFeed for JsonLinesFeed<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn poll(&mut self, timeout: Duration) -> Result<Option<FeedMessage>, FeedError> {
        loop {
            let line = match tokio::time::timeout(timeout, self.lines.next_line()).await {
                Err(_) => return Ok(None),
                Ok(Err(e)) => {
                    return Err(FeedError::Transient {
                        reason: e.to_string(),
                    })
                }
                Ok(Ok(None)) => return Err(FeedError::Closed),
                Ok(Ok(Some(line))) => line,
            };

            let offset = self.next_offset;
            self.next_offset += 1;
            if line.trim().is_empty() {
                continue;
            }

            return Ok(Some(FeedMessage {
                partition: 0,
                offset,
                payload: line.into_bytes(),
            }));
        }
    }

    async fn ack(&mut self, _message: &FeedMessage) -> Result<(), FeedError> {
        Ok(())
    }
}
