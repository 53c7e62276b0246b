//! PostgreSQL Order Store
//!
//! Connection pooling via deadpool-postgres and the `OrderStore`
//! implementation backing the cache and the ingestor.
//!
//! An order is spread over four tables: `orders`, `deliveries`, `payments`
//! and `order_items`. Writes go through a single transaction, so a failed
//! sub-write leaves nothing behind. `orders.ingest_seq` is assigned on insert
//! and defines "most recently created" for the recency listing.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{
    Config, ManagerConfig, Object, Pool, PoolConfig, PoolError, RecyclingMethod, Runtime,
};
use orderflow_core::{Delivery, Order, OrderItem, Payment, StorageError, Timestamp};
use orderflow_storage::{OrderStore, StorageResult};
use tokio_postgres::error::SqlState;
use tokio_postgres::row::RowIndex;
use tokio_postgres::types::FromSql;
use tokio_postgres::{Client, NoTls, Row};

use crate::error::{ApiError, ApiResult};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// How long a caller waits for a free connection
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "order_service_db".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            max_size: 25,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            host: std::env::var("ORDERFLOW_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("ORDERFLOW_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("ORDERFLOW_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("ORDERFLOW_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("ORDERFLOW_DB_PASSWORD").unwrap_or(defaults.password),
            max_size: std::env::var("ORDERFLOW_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|size: &usize| *size > 0)
                .unwrap_or(defaults.max_size),
            timeout: std::env::var("ORDERFLOW_DB_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    /// Create a connection pool from this configuration.
    ///
    /// No connection is opened here; the first checkout connects.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_config = PoolConfig::new(self.max_size);
        pool_config.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_config);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    order_uid          TEXT PRIMARY KEY,
    ingest_seq         BIGSERIAL NOT NULL,
    track_number       TEXT NOT NULL,
    entry              TEXT NOT NULL,
    locale             TEXT NOT NULL,
    internal_signature TEXT NOT NULL,
    customer_id        TEXT NOT NULL,
    delivery_service   TEXT NOT NULL,
    shardkey           TEXT NOT NULL,
    sm_id              INTEGER NOT NULL,
    date_created       TIMESTAMPTZ NOT NULL,
    oof_shard          TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS orders_ingest_seq_idx ON orders (ingest_seq);

CREATE TABLE IF NOT EXISTS deliveries (
    order_uid TEXT PRIMARY KEY REFERENCES orders (order_uid) ON DELETE CASCADE,
    name      TEXT NOT NULL,
    phone     TEXT NOT NULL,
    zip       TEXT NOT NULL,
    city      TEXT NOT NULL,
    address   TEXT NOT NULL,
    region    TEXT NOT NULL,
    email     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS payments (
    order_uid     TEXT PRIMARY KEY REFERENCES orders (order_uid) ON DELETE CASCADE,
    "transaction" TEXT NOT NULL,
    request_id    TEXT NOT NULL,
    currency      TEXT NOT NULL,
    provider      TEXT NOT NULL,
    amount        BIGINT NOT NULL,
    payment_dt    BIGINT NOT NULL,
    bank          TEXT NOT NULL,
    delivery_cost BIGINT NOT NULL,
    goods_total   BIGINT NOT NULL,
    custom_fee    BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS order_items (
    order_uid    TEXT NOT NULL REFERENCES orders (order_uid) ON DELETE CASCADE,
    position     INTEGER NOT NULL,
    chrt_id      BIGINT NOT NULL,
    track_number TEXT NOT NULL,
    price        BIGINT NOT NULL,
    rid          TEXT NOT NULL,
    name         TEXT NOT NULL,
    sale         INTEGER NOT NULL,
    size         TEXT NOT NULL,
    total_price  BIGINT NOT NULL,
    nm_id        BIGINT NOT NULL,
    brand        TEXT NOT NULL,
    status       INTEGER NOT NULL,
    PRIMARY KEY (order_uid, position)
);
"#;

const ORDER_COLUMNS: &str = "order_uid, track_number, entry, locale, internal_signature, \
     customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard";

const INSERT_ORDER: &str = "INSERT INTO orders (order_uid, track_number, entry, locale, \
     internal_signature, customer_id, delivery_service, shardkey, sm_id, date_created, oof_shard) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)";

const INSERT_DELIVERY: &str = "INSERT INTO deliveries (order_uid, name, phone, zip, city, \
     address, region, email) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)";

const INSERT_PAYMENT: &str = "INSERT INTO payments (order_uid, \"transaction\", request_id, \
     currency, provider, amount, payment_dt, bank, delivery_cost, goods_total, custom_fee) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)";

const INSERT_ITEM: &str = "INSERT INTO order_items (order_uid, position, chrt_id, track_number, \
     price, rid, name, sale, size, total_price, nm_id, brand, status) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)";

// ============================================================================
// DATABASE CLIENT
// ============================================================================

/// PostgreSQL-backed order store.
#[derive(Clone)]
pub struct DbClient {
    pool: Pool,
}

impl DbClient {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a new database client from configuration.
    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> ApiResult<Object> {
        Ok(self.pool.get().await?)
    }

    async fn checkout(&self) -> StorageResult<Object> {
        self.pool.get().await.map_err(pool_failure)
    }

    /// Create the four order tables if they do not exist yet.
    pub async fn migrate(&self) -> ApiResult<()> {
        let conn = self.get_conn().await?;
        conn.batch_execute(SCHEMA_SQL).await?;
        tracing::info!("Database schema is up to date");
        Ok(())
    }
}

#[async_trait]
impl OrderStore for DbClient {
    async fn create_order(&self, order: &Order) -> StorageResult<()> {
        let mut conn = self.checkout().await?;
        let tx = conn.transaction().await.map_err(query_failure)?;

        tx.execute(
            INSERT_ORDER,
            &[
                &order.order_uid,
                &order.track_number,
                &order.entry,
                &order.locale,
                &order.internal_signature,
                &order.customer_id,
                &order.delivery_service,
                &order.shardkey,
                &order.sm_id,
                &order.date_created,
                &order.oof_shard,
            ],
        )
        .await
        .map_err(|e| insert_failure(e, &order.order_uid))?;

        let d = &order.delivery;
        tx.execute(
            INSERT_DELIVERY,
            &[
                &order.order_uid,
                &d.name,
                &d.phone,
                &d.zip,
                &d.city,
                &d.address,
                &d.region,
                &d.email,
            ],
        )
        .await
        .map_err(query_failure)?;

        let p = &order.payment;
        tx.execute(
            INSERT_PAYMENT,
            &[
                &order.order_uid,
                &p.transaction,
                &p.request_id,
                &p.currency,
                &p.provider,
                &p.amount,
                &p.payment_dt,
                &p.bank,
                &p.delivery_cost,
                &p.goods_total,
                &p.custom_fee,
            ],
        )
        .await
        .map_err(query_failure)?;

        let insert_item = tx.prepare(INSERT_ITEM).await.map_err(query_failure)?;
        for (position, item) in order.items.iter().enumerate() {
            let position = i32::try_from(position).map_err(|_| StorageError::Rejected {
                reason: format!("order {} has too many items", order.order_uid),
            })?;
            tx.execute(
                &insert_item,
                &[
                    &order.order_uid,
                    &position,
                    &item.chrt_id,
                    &item.track_number,
                    &item.price,
                    &item.rid,
                    &item.name,
                    &item.sale,
                    &item.size,
                    &item.total_price,
                    &item.nm_id,
                    &item.brand,
                    &item.status,
                ],
            )
            .await
            .map_err(query_failure)?;
        }

        tx.commit().await.map_err(query_failure)?;
        tracing::debug!(
            order_uid = %order.order_uid,
            items = order.items.len(),
            "Order committed"
        );
        Ok(())
    }

    async fn get_order(&self, order_uid: &str) -> StorageResult<Option<Order>> {
        let conn = self.checkout().await?;
        let query = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_uid = $1");
        let Some(row) = conn
            .query_opt(query.as_str(), &[&order_uid])
            .await
            .map_err(query_failure)?
        else {
            return Ok(None);
        };

        let uids = [order_uid.to_string()];
        let mut parts = OrderParts::fetch(&**conn, &uids).await?;
        parts.assemble(&row).map(Some)
    }

    async fn order_exists(&self, order_uid: &str) -> StorageResult<bool> {
        let conn = self.checkout().await?;
        let row = conn
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM orders WHERE order_uid = $1)",
                &[&order_uid],
            )
            .await
            .map_err(query_failure)?;
        column(&row, 0, order_uid)
    }

    async fn recent_orders(&self, limit: usize) -> StorageResult<Vec<Order>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.checkout().await?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let query =
            format!("SELECT {ORDER_COLUMNS} FROM orders ORDER BY ingest_seq DESC LIMIT $1");
        let rows = conn
            .query(query.as_str(), &[&limit])
            .await
            .map_err(query_failure)?;

        let uids: Vec<String> = rows
            .iter()
            .map(|row| column(row, "order_uid", "<unknown>"))
            .collect::<StorageResult<Vec<_>>>()?;
        let mut parts = OrderParts::fetch(&**conn, &uids).await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            match parts.assemble(row) {
                Ok(order) => orders.push(order),
                Err(e) => {
                    tracing::error!(error = %e, "Skipping incomplete order in recent listing");
                }
            }
        }
        Ok(orders)
    }

    async fn ping(&self) -> StorageResult<()> {
        let conn = self.checkout().await?;
        conn.query_one("SELECT 1", &[])
            .await
            .map_err(query_failure)?;
        Ok(())
    }
}

// ============================================================================
// ROW ASSEMBLY
// ============================================================================

/// Sub-rows of a batch of orders, loaded with one query per table.
#[derive(Default)]
struct OrderParts {
    deliveries: HashMap<String, Delivery>,
    payments: HashMap<String, Payment>,
    items: HashMap<String, Vec<OrderItem>>,
}

impl OrderParts {
    async fn fetch(client: &Client, uids: &[String]) -> StorageResult<Self> {
        let mut parts = Self::default();
        if uids.is_empty() {
            return Ok(parts);
        }

        let rows = client
            .query(
                "SELECT order_uid, name, phone, zip, city, address, region, email \
                 FROM deliveries WHERE order_uid = ANY($1)",
                &[&uids],
            )
            .await
            .map_err(query_failure)?;
        for row in &rows {
            let uid: String = column(row, "order_uid", "<unknown>")?;
            let delivery = Delivery {
                name: column(row, "name", &uid)?,
                phone: column(row, "phone", &uid)?,
                zip: column(row, "zip", &uid)?,
                city: column(row, "city", &uid)?,
                address: column(row, "address", &uid)?,
                region: column(row, "region", &uid)?,
                email: column(row, "email", &uid)?,
            };
            parts.deliveries.insert(uid, delivery);
        }

        let rows = client
            .query(
                "SELECT order_uid, \"transaction\", request_id, currency, provider, amount, \
                 payment_dt, bank, delivery_cost, goods_total, custom_fee \
                 FROM payments WHERE order_uid = ANY($1)",
                &[&uids],
            )
            .await
            .map_err(query_failure)?;
        for row in &rows {
            let uid: String = column(row, "order_uid", "<unknown>")?;
            let payment = Payment {
                transaction: column(row, "transaction", &uid)?,
                request_id: column(row, "request_id", &uid)?,
                currency: column(row, "currency", &uid)?,
                provider: column(row, "provider", &uid)?,
                amount: column(row, "amount", &uid)?,
                payment_dt: column(row, "payment_dt", &uid)?,
                bank: column(row, "bank", &uid)?,
                delivery_cost: column(row, "delivery_cost", &uid)?,
                goods_total: column(row, "goods_total", &uid)?,
                custom_fee: column(row, "custom_fee", &uid)?,
            };
            parts.payments.insert(uid, payment);
        }

        let rows = client
            .query(
                "SELECT order_uid, chrt_id, track_number, price, rid, name, sale, size, \
                 total_price, nm_id, brand, status \
                 FROM order_items WHERE order_uid = ANY($1) ORDER BY order_uid, position",
                &[&uids],
            )
            .await
            .map_err(query_failure)?;
        for row in &rows {
            let uid: String = column(row, "order_uid", "<unknown>")?;
            let item = OrderItem {
                chrt_id: column(row, "chrt_id", &uid)?,
                track_number: column(row, "track_number", &uid)?,
                price: column(row, "price", &uid)?,
                rid: column(row, "rid", &uid)?,
                name: column(row, "name", &uid)?,
                sale: column(row, "sale", &uid)?,
                size: column(row, "size", &uid)?,
                total_price: column(row, "total_price", &uid)?,
                nm_id: column(row, "nm_id", &uid)?,
                brand: column(row, "brand", &uid)?,
                status: column(row, "status", &uid)?,
            };
            parts.items.entry(uid).or_default().push(item);
        }

        Ok(parts)
    }

    /// Build the aggregate for one `orders` row, taking its sub-rows.
    fn assemble(&mut self, row: &Row) -> StorageResult<Order> {
        let order_uid: String = column(row, "order_uid", "<unknown>")?;

        let delivery = self
            .deliveries
            .remove(&order_uid)
            .ok_or_else(|| corrupt(&order_uid, "delivery row missing"))?;
        let payment = self
            .payments
            .remove(&order_uid)
            .ok_or_else(|| corrupt(&order_uid, "payment row missing"))?;
        let items = self.items.remove(&order_uid).unwrap_or_default();
        let date_created: Timestamp = column(row, "date_created", &order_uid)?;

        Ok(Order {
            track_number: column(row, "track_number", &order_uid)?,
            entry: column(row, "entry", &order_uid)?,
            delivery,
            payment,
            items,
            locale: column(row, "locale", &order_uid)?,
            internal_signature: column(row, "internal_signature", &order_uid)?,
            customer_id: column(row, "customer_id", &order_uid)?,
            delivery_service: column(row, "delivery_service", &order_uid)?,
            shardkey: column(row, "shardkey", &order_uid)?,
            sm_id: column(row, "sm_id", &order_uid)?,
            date_created,
            oof_shard: column(row, "oof_shard", &order_uid)?,
            order_uid,
        })
    }
}

fn column<'a, I, T>(row: &'a Row, idx: I, order_uid: &str) -> StorageResult<T>
where
    I: RowIndex + fmt::Display,
    T: FromSql<'a>,
{
    row.try_get(idx)
        .map_err(|e| corrupt(order_uid, &e.to_string()))
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

fn corrupt(order_uid: &str, reason: &str) -> StorageError {
    StorageError::Corrupt {
        order_uid: order_uid.to_string(),
        reason: reason.to_string(),
    }
}

fn pool_failure(err: PoolError) -> StorageError {
    StorageError::Unavailable {
        reason: err.to_string(),
    }
}

fn query_failure(err: tokio_postgres::Error) -> StorageError {
    let reason = err.to_string();
    match err.code() {
        Some(state) => classify_sqlstate(state.code(), reason),
        None if err.is_closed() => StorageError::Unavailable { reason },
        None => StorageError::TransactionFailed { reason },
    }
}

/// Map a SQLSTATE to how the caller may react to it.
///
/// Connection loss and server shutdown (08, 53, 57P01-57P03) mean the store
/// is down; rollbacks (40: serialization failure, deadlock) may succeed on
/// retry; data (22) and integrity (23) errors are properties of the order
/// itself and fail the same way every time.
fn classify_sqlstate(code: &str, reason: String) -> StorageError {
    let class = code.get(..2).unwrap_or_default();
    match class {
        "08" | "53" => StorageError::Unavailable { reason },
        "57" if matches!(code, "57P01" | "57P02" | "57P03") => {
            StorageError::Unavailable { reason }
        }
        "22" | "23" => StorageError::Rejected { reason },
        _ => StorageError::TransactionFailed { reason },
    }
}

fn insert_failure(err: tokio_postgres::Error, order_uid: &str) -> StorageError {
    if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        StorageError::AlreadyExists {
            order_uid: order_uid.to_string(),
        }
    } else {
        query_failure(err)
    }
}
