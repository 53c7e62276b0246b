//! Orderflow Test Utilities
//!
//! Shared test infrastructure for the orderflow workspace:
//! - Store doubles for counting calls and injecting failures
//! - Proptest generators for the order aggregate
//! - Fixtures for common scenarios

pub use orderflow_core::{
    Delivery, Order, OrderItem, OrderMessage, Payment, StorageError, Timestamp, ValidationError,
};
pub use orderflow_storage::{MemoryStore, OrderStore, StorageResult};

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

// ============================================================================
// STORE DOUBLES
// ============================================================================

/// Store double counting calls per operation, backed by a [`MemoryStore`].
#[derive(Debug, Default)]
pub struct CountingStore {
    inner: MemoryStore,
    creates: AtomicUsize,
    gets: AtomicUsize,
    exists: AtomicUsize,
    recents: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        Self {
            inner: MemoryStore::with_orders(orders),
            ..Self::default()
        }
    }

    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn exists_calls(&self) -> usize {
        self.exists.load(Ordering::SeqCst)
    }

    pub fn recent_calls(&self) -> usize {
        self.recents.load(Ordering::SeqCst)
    }

    pub async fn stored(&self) -> usize {
        self.inner.len().await
    }
}

#[async_trait]
impl OrderStore for CountingStore {
    async fn create_order(&self, order: &Order) -> StorageResult<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.inner.create_order(order).await
    }

    async fn get_order(&self, order_uid: &str) -> StorageResult<Option<Order>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get_order(order_uid).await
    }

    async fn order_exists(&self, order_uid: &str) -> StorageResult<bool> {
        self.exists.fetch_add(1, Ordering::SeqCst);
        self.inner.order_exists(order_uid).await
    }

    async fn recent_orders(&self, limit: usize) -> StorageResult<Vec<Order>> {
        self.recents.fetch_add(1, Ordering::SeqCst);
        self.inner.recent_orders(limit).await
    }

    async fn ping(&self) -> StorageResult<()> {
        self.inner.ping().await
    }
}

/// Store double with switchable outages, backed by a [`MemoryStore`].
///
/// While marked down every call fails with [`StorageError::Unavailable`].
/// Independently, the next `n` writes can be made to fail with
/// [`StorageError::TransactionFailed`], or every write refused with
/// [`StorageError::Rejected`].
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    down: AtomicBool,
    failing_writes: AtomicU32,
    refusing_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_orders(orders: impl IntoIterator<Item = Order>) -> Self {
        Self {
            inner: MemoryStore::with_orders(orders),
            ..Self::default()
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    pub fn refuse_writes(&self, refuse: bool) {
        self.refusing_writes.store(refuse, Ordering::SeqCst);
    }

    pub async fn stored(&self) -> usize {
        self.inner.len().await
    }

    fn check_up(&self) -> StorageResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for FlakyStore {
    async fn create_order(&self, order: &Order) -> StorageResult<()> {
        self.check_up()?;
        if self.refusing_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Rejected {
                reason: format!("value too long in order {}", order.order_uid),
            });
        }
        let failing = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::TransactionFailed {
                reason: "could not serialize access".to_string(),
            });
        }
        self.inner.create_order(order).await
    }

    async fn get_order(&self, order_uid: &str) -> StorageResult<Option<Order>> {
        self.check_up()?;
        self.inner.get_order(order_uid).await
    }

    async fn order_exists(&self, order_uid: &str) -> StorageResult<bool> {
        self.check_up()?;
        self.inner.order_exists(order_uid).await
    }

    async fn recent_orders(&self, limit: usize) -> StorageResult<Vec<Order>> {
        self.check_up()?;
        self.inner.recent_orders(limit).await
    }

    async fn ping(&self) -> StorageResult<()> {
        self.check_up()
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for the order aggregate.

    use super::*;
    use chrono::{DateTime, Utc};
    use proptest::prelude::*;

    /// Generate an order key.
    pub fn arb_order_uid() -> impl Strategy<Value = String> {
        "[a-z0-9]{8,19}"
    }

    /// Generate a timestamp with microsecond precision (2020-2030).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64, 0u32..1_000_000).prop_map(|(secs, micros)| {
            DateTime::from_timestamp(secs, micros * 1000).unwrap_or_else(Utc::now)
        })
    }

    pub fn arb_delivery() -> impl Strategy<Value = Delivery> {
        (
            "[A-Za-z ]{1,30}",
            "\\+[0-9]{7,12}",
            "[0-9]{5,7}",
            "[A-Za-z ]{0,20}",
            "[A-Za-z0-9 ]{0,40}",
            "[A-Za-z]{0,15}",
            "[a-z]{1,10}@[a-z]{1,8}\\.com",
        )
            .prop_map(|(name, phone, zip, city, address, region, email)| Delivery {
                name,
                phone,
                zip,
                city,
                address,
                region,
                email,
            })
    }

    pub fn arb_payment() -> impl Strategy<Value = Payment> {
        (
            "[a-z0-9]{8,19}",
            "[a-z0-9]{0,8}",
            prop_oneof![Just("USD"), Just("EUR"), Just("RUB")],
            "[a-z]{3,8}",
            1i64..1_000_000,
            1577836800i64..1893456000i64,
            "[a-z]{3,10}",
            (0i64..10_000, 0i64..1_000_000, 0i64..1_000),
        )
            .prop_map(
                |(
                    transaction,
                    request_id,
                    currency,
                    provider,
                    amount,
                    payment_dt,
                    bank,
                    (delivery_cost, goods_total, custom_fee),
                )| Payment {
                    transaction,
                    request_id,
                    currency: currency.to_string(),
                    provider,
                    amount,
                    payment_dt,
                    bank,
                    delivery_cost,
                    goods_total,
                    custom_fee,
                },
            )
    }

    pub fn arb_item() -> impl Strategy<Value = OrderItem> {
        (
            1i64..100_000_000,
            "[A-Z]{6,14}",
            0i64..100_000,
            "[a-z0-9]{10,21}",
            "[A-Za-z ]{1,30}",
            0i32..100,
            "[0-9SMLX]{1,3}",
            0i64..100_000,
            1i64..100_000_000,
            "[A-Za-z ]{1,20}",
            100i32..999,
        )
            .prop_map(
                |(chrt_id, track_number, price, rid, name, sale, size, total_price, nm_id, brand, status)| {
                    OrderItem {
                        chrt_id,
                        track_number,
                        price,
                        rid,
                        name,
                        sale,
                        size,
                        total_price,
                        nm_id,
                        brand,
                        status,
                    }
                },
            )
    }

    /// Generate a complete, valid Order aggregate with 1..=5 items.
    pub fn arb_order() -> impl Strategy<Value = Order> {
        (
            arb_order_uid(),
            "[A-Z]{6,14}",
            "[A-Z]{2,6}",
            arb_delivery(),
            arb_payment(),
            prop::collection::vec(arb_item(), 1..=5),
            prop_oneof![Just("en"), Just("ru")],
            "[a-z0-9]{1,12}",
            "[a-z]{3,10}",
            (0i32..1000, arb_timestamp(), "[0-9]{1,2}", "[0-9]{1,2}"),
        )
            .prop_map(
                |(
                    order_uid,
                    track_number,
                    entry,
                    delivery,
                    payment,
                    items,
                    locale,
                    customer_id,
                    delivery_service,
                    (sm_id, date_created, shardkey, oof_shard),
                )| Order {
                    order_uid,
                    track_number,
                    entry,
                    delivery,
                    payment,
                    items,
                    locale: locale.to_string(),
                    internal_signature: String::new(),
                    customer_id,
                    delivery_service,
                    shardkey,
                    sm_id,
                    date_created,
                    oof_shard,
                },
            )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use chrono::{TimeZone, Utc};

    /// The canonical sample order, keyed by `order_uid`.
    pub fn sample_order(order_uid: &str) -> Order {
        Order {
            order_uid: order_uid.to_string(),
            track_number: "WBILMTESTTRACK".to_string(),
            entry: "WBIL".to_string(),
            delivery: Delivery {
                name: "Test Testov".to_string(),
                phone: "+9720000000".to_string(),
                zip: "2639809".to_string(),
                city: "Kiryat Mozkin".to_string(),
                address: "Ploshad Mira 15".to_string(),
                region: "Kraiot".to_string(),
                email: "test@gmail.com".to_string(),
            },
            payment: Payment {
                transaction: order_uid.to_string(),
                request_id: String::new(),
                currency: "USD".to_string(),
                provider: "wbpay".to_string(),
                amount: 1817,
                payment_dt: 1_637_907_727,
                bank: "alpha".to_string(),
                delivery_cost: 1500,
                goods_total: 317,
                custom_fee: 0,
            },
            items: vec![OrderItem {
                chrt_id: 9_934_930,
                track_number: "WBILMTESTTRACK".to_string(),
                price: 453,
                rid: "ab4219087a764ae0btest".to_string(),
                name: "Mascaras".to_string(),
                sale: 30,
                size: "0".to_string(),
                total_price: 317,
                nm_id: 2_389_212,
                brand: "Vivienne Sabo".to_string(),
                status: 202,
            }],
            locale: "en".to_string(),
            internal_signature: String::new(),
            customer_id: "test".to_string(),
            delivery_service: "meest".to_string(),
            shardkey: "9".to_string(),
            sm_id: 99,
            date_created: Utc
                .with_ymd_and_hms(2021, 11, 26, 6, 22, 19)
                .single()
                .unwrap_or_else(Utc::now),
            oof_shard: "1".to_string(),
        }
    }

    /// `count` sample orders keyed `{prefix}-0` .. `{prefix}-{count-1}`.
    pub fn sample_orders(prefix: &str, count: usize) -> Vec<Order> {
        (0..count)
            .map(|i| sample_order(&format!("{prefix}-{i}")))
            .collect()
    }

    /// Wire JSON for [`sample_order`].
    pub fn sample_message_json(order_uid: &str) -> String {
        message_json(&sample_order(order_uid))
    }

    /// Wire JSON for any order.
    pub fn message_json(order: &Order) -> String {
        serde_json::to_string(&OrderMessage::from(order)).unwrap_or_default()
    }
}
