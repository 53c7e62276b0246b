//! Durable order store capability.
//!
//! The store is the source of truth. Orders are append-only: once
//! `create_order` succeeds the aggregate is never updated or deleted.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use orderflow_core::{Order, StorageError};
use tokio::sync::RwLock;

/// Result type for store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Async durable store for order aggregates.
///
/// Implementations must write an aggregate atomically: the order row and its
/// delivery, payment and item rows either all become visible or none do.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist a new order. Fails with [`StorageError::AlreadyExists`] when
    /// the key is taken, leaving no partial state on any failure.
    async fn create_order(&self, order: &Order) -> StorageResult<()>;

    /// Point lookup by order key.
    async fn get_order(&self, order_uid: &str) -> StorageResult<Option<Order>>;

    /// Whether an order with this key has been stored.
    async fn order_exists(&self, order_uid: &str) -> StorageResult<bool>;

    /// Up to `limit` orders, most recently created first.
    async fn recent_orders(&self, limit: usize) -> StorageResult<Vec<Order>>;

    /// Cheap reachability probe used by readiness checks.
    async fn ping(&self) -> StorageResult<()>;
}

#[async_trait]
impl<S: OrderStore + ?Sized> OrderStore for Arc<S> {
    async fn create_order(&self, order: &Order) -> StorageResult<()> {
        (**self).create_order(order).await
    }

    async fn get_order(&self, order_uid: &str) -> StorageResult<Option<Order>> {
        (**self).get_order(order_uid).await
    }

    async fn order_exists(&self, order_uid: &str) -> StorageResult<bool> {
        (**self).order_exists(order_uid).await
    }

    async fn recent_orders(&self, limit: usize) -> StorageResult<Vec<Order>> {
        (**self).recent_orders(limit).await
    }

    async fn ping(&self) -> StorageResult<()> {
        (**self).ping().await
    }
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

#[derive(Debug, Default)]
struct MemoryInner {
    orders: HashMap<String, Order>,
    /// Keys in creation order.
    sequence: Vec<String>,
}

/// In-memory store, used by tests and local runs without PostgreSQL.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `orders`, in creation order.
    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        let mut inner = MemoryInner::default();
        for order in orders {
            if !inner.orders.contains_key(&order.order_uid) {
                inner.sequence.push(order.order_uid.clone());
                inner.orders.insert(order.order_uid.clone(), order);
            }
        }
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Number of stored orders.
    pub async fn len(&self) -> usize {
        self.inner.read().await.orders.len()
    }

    /// Whether the store holds no orders.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.orders.is_empty()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn create_order(&self, order: &Order) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        if inner.orders.contains_key(&order.order_uid) {
            return Err(StorageError::AlreadyExists {
                order_uid: order.order_uid.clone(),
            });
        }
        inner.sequence.push(order.order_uid.clone());
        inner.orders.insert(order.order_uid.clone(), order.clone());
        Ok(())
    }

    async fn get_order(&self, order_uid: &str) -> StorageResult<Option<Order>> {
        Ok(self.inner.read().await.orders.get(order_uid).cloned())
    }

    async fn order_exists(&self, order_uid: &str) -> StorageResult<bool> {
        Ok(self.inner.read().await.orders.contains_key(order_uid))
    }

    async fn recent_orders(&self, limit: usize) -> StorageResult<Vec<Order>> {
        let inner = self.inner.read().await;
        Ok(inner
            .sequence
            .iter()
            .rev()
            .take(limit)
            .filter_map(|uid| inner.orders.get(uid).cloned())
            .collect())
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::order;
    use super::*;

    #[tokio::test]
    async fn test_create_then_get_roundtrips() {
        let store = MemoryStore::new();
        let original = order("a");

        store.create_order(&original).await.unwrap();

        assert!(store.order_exists("a").await.unwrap());
        assert_eq!(store.get_order("a").await.unwrap(), Some(original));
        assert_eq!(store.get_order("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_create_is_rejected() {
        let store = MemoryStore::new();
        store.create_order(&order("a")).await.unwrap();

        let err = store.create_order(&order("a")).await.unwrap_err();
        assert_eq!(
            err,
            StorageError::AlreadyExists {
                order_uid: "a".to_string()
            }
        );
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_recent_orders_newest_first() {
        let store = MemoryStore::with_orders(["a", "b", "c"].map(order));

        let recent = store.recent_orders(2).await.unwrap();
        let uids: Vec<_> = recent.iter().map(|o| o.order_uid.as_str()).collect();
        assert_eq!(uids, vec!["c", "b"]);

        assert_eq!(store.recent_orders(10).await.unwrap().len(), 3);
        assert!(store.recent_orders(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_through_arc_dyn() {
        let store: Arc<dyn OrderStore> = Arc::new(MemoryStore::new());
        store.create_order(&order("x")).await.unwrap();
        assert!(store.order_exists("x").await.unwrap());
        store.ping().await.unwrap();
    }
}
