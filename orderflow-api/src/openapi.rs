//! OpenAPI document for the Orderflow HTTP API, generated with utoipa.

use orderflow_core::{Delivery, Order, OrderItem, Payment};
use utoipa::OpenApi;

use crate::error::{ApiError, ErrorCode};
use crate::routes::cache::{self, CacheStatsResponse};
use crate::routes::health::{self, ComponentHealth, HealthDetails, HealthResponse, HealthStatus};
use crate::routes::orders::{self, ListOrdersResponse};
use crate::telemetry::metrics;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Orderflow API",
        description = "Order lookup backed by an LRU cache in front of PostgreSQL",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:8081", description = "Local Development")
    ),
    tags(
        (name = "Orders", description = "Order lookup and recency listing"),
        (name = "Cache", description = "Order cache statistics"),
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Observability", description = "Prometheus metrics")
    ),
    paths(
        orders::get_order,
        orders::list_orders,
        cache::cache_stats,
        health::ping,
        health::readiness,
        metrics::metrics_handler,
    ),
    components(schemas(
        Order,
        Delivery,
        Payment,
        OrderItem,
        ListOrdersResponse,
        CacheStatsResponse,
        HealthResponse,
        HealthStatus,
        HealthDetails,
        ComponentHealth,
        ApiError,
        ErrorCode,
    ))
)]
pub struct ApiDoc;
