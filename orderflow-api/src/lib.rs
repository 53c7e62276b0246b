//! Orderflow API - HTTP Service and PostgreSQL Store
//!
//! Wires the storage and ingest crates into a running service:
//! - `DbClient`: PostgreSQL implementation of `OrderStore`, with migrations
//! - Axum routes for order lookup, recency listing, cache stats and health
//! - Tracing initialization and Prometheus metrics
//! - Configuration loaded from the environment
//!
//! The binary (`src/main.rs`) bootstraps the cache, spawns the ingest loop
//! and serves HTTP until a shutdown signal arrives.

pub mod config;
pub mod db;
pub mod error;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use config::{ApiConfig, CacheConfig, LogFormat, ServiceConfig, TelemetryConfig};
pub use db::{DbClient, DbConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use openapi::ApiDoc;
pub use routes::create_api_router;
pub use state::{AppState, OrderReader};
pub use telemetry::{init_tracing, metrics_handler, MeteredStore, ServiceMetrics};
