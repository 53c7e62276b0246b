//! PostgreSQL round-trip tests.
//!
//! Need a reachable database configured through `ORDERFLOW_DB_*`:
//!
//! ```text
//! cargo test -p orderflow-api --features db-tests --test db_roundtrip_tests
//! ```

#![cfg(feature = "db-tests")]

use chrono::Utc;
use orderflow_api::{DbClient, DbConfig};
use orderflow_core::{OrderItem, StorageError};
use orderflow_storage::OrderStore;
use orderflow_test_utils::fixtures::sample_order;

async fn client() -> Result<DbClient, String> {
    let db = DbClient::from_config(&DbConfig::from_env()).map_err(|e| e.message)?;
    db.migrate().await.map_err(|e| e.message)?;
    Ok(db)
}

/// Keys unique per run so reruns against the same database do not collide.
fn unique_uid(label: &str) -> String {
    format!(
        "{label}-{}",
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    )
}

#[tokio::test]
async fn test_create_then_get_returns_same_aggregate() -> Result<(), String> {
    let db = client().await?;
    let mut order = sample_order(&unique_uid("roundtrip"));
    let mut second: OrderItem = order.items[0].clone();
    second.chrt_id = 1;
    second.rid = "second-item".to_string();
    order.items.push(second);

    db.create_order(&order).await.map_err(|e| e.to_string())?;
    let loaded = db
        .get_order(&order.order_uid)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("order missing after insert")?;

    assert_eq!(loaded, order);
    assert_eq!(loaded.items[1].rid, "second-item");
    Ok(())
}

#[tokio::test]
async fn test_duplicate_insert_reports_already_exists() -> Result<(), String> {
    let db = client().await?;
    let order = sample_order(&unique_uid("dup"));

    db.create_order(&order).await.map_err(|e| e.to_string())?;
    let err = db.create_order(&order).await.err().ok_or("second insert succeeded")?;
    assert!(matches!(err, StorageError::AlreadyExists { .. }), "{err}");
    assert!(db
        .order_exists(&order.order_uid)
        .await
        .map_err(|e| e.to_string())?);
    Ok(())
}

#[tokio::test]
async fn test_missing_order_is_absent() -> Result<(), String> {
    let db = client().await?;
    let uid = unique_uid("absent");
    assert!(db.get_order(&uid).await.map_err(|e| e.to_string())?.is_none());
    assert!(!db.order_exists(&uid).await.map_err(|e| e.to_string())?);
    Ok(())
}

#[tokio::test]
async fn test_recent_orders_are_newest_first() -> Result<(), String> {
    let db = client().await?;
    let older = sample_order(&unique_uid("older"));
    let newer = sample_order(&unique_uid("newer"));
    db.create_order(&older).await.map_err(|e| e.to_string())?;
    db.create_order(&newer).await.map_err(|e| e.to_string())?;

    let recent = db.recent_orders(2).await.map_err(|e| e.to_string())?;
    let uids: Vec<&str> = recent.iter().map(|o| o.order_uid.as_str()).collect();
    // Other tests may insert concurrently; only relative order is checked.
    let newer_at = uids.iter().position(|uid| *uid == newer.order_uid);
    let older_at = uids.iter().position(|uid| *uid == older.order_uid);
    if let (Some(n), Some(o)) = (newer_at, older_at) {
        assert!(n < o);
    }
    assert!(recent.len() <= 2);
    assert!(db.recent_orders(0).await.map_err(|e| e.to_string())?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_ping_succeeds() -> Result<(), String> {
    let db = client().await?;
    db.ping().await.map_err(|e| e.to_string())
}
