//! REST API Routes Module
//!
//! Includes:
//! - Order lookup and recency listing under /api/v1/orders
//! - Cache statistics under /api/v1/cache
//! - Health checks (liveness and readiness)
//! - Prometheus metrics and the OpenAPI document
//! - CORS support for browser-based clients

pub mod cache;
pub mod health;
pub mod orders;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::config::ApiConfig;
use crate::openapi::ApiDoc;
use crate::state::AppState;
use crate::telemetry::metrics_handler;

pub use cache::create_router as cache_router;
pub use health::create_router as health_router;
pub use orders::create_router as orders_router;

/// Handler for /openapi.json endpoint.
async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

/// Build the CORS layer from ApiConfig.
///
/// Empty origins allow every origin; otherwise only the configured ones.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([HeaderName::from_static(orders::ORDER_SOURCE_HEADER)]);

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: allowing all origins");
        cors.allow_origin(Any)
    } else {
        tracing::info!(origins = ?config.cors_origins, "CORS: restricting origins");
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}

/// Create the complete API router.
///
/// - /api/v1/orders, /api/v1/orders/{order_uid}
/// - /api/v1/cache/stats
/// - /api/v1/health (readiness)
/// - /health/ping, /health/ready
/// - /metrics
/// - /openapi.json
pub fn create_api_router(state: AppState, config: &ApiConfig) -> Router {
    let api_routes = Router::new()
        .nest("/orders", orders::create_router())
        .nest("/cache", cache::create_router())
        .route("/health", get(health::readiness));

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health::create_router())
        .route("/metrics", get(metrics_handler))
        .route("/openapi.json", get(openapi_json))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(config.request_timeout)),
        )
        .layer(build_cors_layer(config))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_layer_builds_for_both_modes() {
        let _ = build_cors_layer(&ApiConfig::default());
        let _ = build_cors_layer(&ApiConfig {
            cors_origins: vec!["https://orders.example".to_string(), "not a header\n".to_string()],
            ..ApiConfig::default()
        });
    }
}
