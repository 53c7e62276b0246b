//! Per-call deadlines for store operations.

use std::future::Future;
use std::time::Duration;

use orderflow_core::StorageError;

use crate::store::StorageResult;

/// Run a store call, failing with [`StorageError::Timeout`] if it does not
/// finish within `after`.
///
/// The inner future is dropped on expiry, but the work it already handed to
/// the store is not recalled: a write whose commit was in flight may still
/// land. Callers that see a timeout on a write must treat its effect as
/// unknown.
pub async fn with_deadline<T, F>(operation: &'static str, after: Duration, call: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, after_ms = after.as_millis() as u64, "Store call timed out");
            Err(StorageError::Timeout { operation, after })
        }
    }
}
