//! Shared helpers for the orderflow-api integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use orderflow_api::{create_api_router, ApiConfig, AppState, OrderReader, ServiceMetrics};
use orderflow_ingest::IngestStats;
use orderflow_storage::{OrderCache, OrderStore, SharedLruCache};
use tower::ServiceExt; // for `oneshot`

pub const STORE_TIMEOUT: Duration = Duration::from_millis(500);

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub cache: Arc<SharedLruCache>,
}

/// Router over `store` with a fresh cache of `capacity` entries.
pub fn test_app(store: Arc<dyn OrderStore>, capacity: usize) -> Result<TestApp, String> {
    let cache = Arc::new(SharedLruCache::new(capacity));
    test_app_with_cache(store, Arc::clone(&cache), Arc::new(IngestStats::default()))
}

pub fn test_app_with_cache(
    store: Arc<dyn OrderStore>,
    cache: Arc<SharedLruCache>,
    ingest_stats: Arc<IngestStats>,
) -> Result<TestApp, String> {
    let metrics = Arc::new(ServiceMetrics::new().map_err(|e| e.message)?);
    let shared: Arc<dyn OrderCache> = cache.clone();
    let reader = Arc::new(OrderReader::new(store, shared, STORE_TIMEOUT));
    let state = AppState::new(reader, ingest_stats, metrics);
    let router = create_api_router(state.clone(), &ApiConfig::default());
    Ok(TestApp {
        router,
        state,
        cache,
    })
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TestResponse {
    pub fn json(&self) -> Result<serde_json::Value, String> {
        serde_json::from_str(&self.body).map_err(|e| format!("{e}: {}", self.body))
    }
}

pub async fn get(router: &Router, uri: &str) -> Result<TestResponse, String> {
    let request = Request::builder()
        .uri(uri)
        .body(Body::empty())
        .map_err(|e| e.to_string())?;

    let response = router
        .clone()
        .oneshot(request)
        .await
        .map_err(|e| format!("Request failed: {:?}", e))?;

    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .map_err(|e| e.to_string())?;

    Ok(TestResponse {
        status,
        headers,
        body: String::from_utf8_lossy(&bytes).into_owned(),
    })
}
