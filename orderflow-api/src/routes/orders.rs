//! Order REST API Routes
//!
//! Point lookups go through the read-through cache; the recency listing goes
//! straight to the store and leaves the cache alone.

use axum::{
    extract::{Path, Query, State},
    http::HeaderValue,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use orderflow_core::constants::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
use orderflow_core::Order;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Response header naming where a lookup was answered (`cache` or `store`).
pub const ORDER_SOURCE_HEADER: &str = "x-order-source";

// ============================================================================
// TYPES
// ============================================================================

/// Query parameters for the recency listing.
///
/// `limit` is kept as text so a malformed value yields a structured error.
#[derive(Debug, Clone, Default, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListOrdersParams {
    /// Maximum number of orders (default 50, capped at 1000)
    #[param(value_type = Option<u32>)]
    pub limit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ListOrdersResponse {
    /// Most recently created first
    pub orders: Vec<Order>,
    pub count: usize,
    /// Limit actually applied
    pub limit: usize,
}

/// Resolve the requested listing limit.
///
/// Missing or zero means the default; anything above the cap is clamped.
pub fn effective_limit(raw: Option<&str>) -> ApiResult<usize> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(DEFAULT_LIST_LIMIT);
    };

    let requested: u64 = raw.parse().map_err(|_| {
        ApiError::invalid_input(format!("limit must be a non-negative integer, got '{}'", raw))
            .with_details(serde_json::json!({ "limit": raw }))
    })?;

    Ok(match requested {
        0 => DEFAULT_LIST_LIMIT,
        n => usize::try_from(n).unwrap_or(MAX_LIST_LIMIT).min(MAX_LIST_LIMIT),
    })
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /api/v1/orders/{order_uid} - Get an order by key
#[utoipa::path(
    get,
    path = "/api/v1/orders/{order_uid}",
    tag = "Orders",
    params(
        ("order_uid" = String, Path, description = "Order key")
    ),
    responses(
        (status = 200, description = "Order aggregate", body = Order),
        (status = 400, description = "Blank order key", body = ApiError),
        (status = 404, description = "Order not found", body = ApiError),
        (status = 503, description = "Order store unavailable", body = ApiError),
        (status = 504, description = "Order store timed out", body = ApiError),
    )
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_uid): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let order_uid = order_uid.trim();
    if order_uid.is_empty() {
        return Err(ApiError::missing_field("order_uid"));
    }

    let read = state
        .reader
        .lookup(order_uid)
        .await?
        .ok_or_else(|| ApiError::order_not_found(order_uid))?;

    let source = HeaderValue::from_static(read.source().as_str());
    Ok(([(ORDER_SOURCE_HEADER, source)], Json(read.order().clone())))
}

/// GET /api/v1/orders - List the most recently created orders
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    tag = "Orders",
    params(ListOrdersParams),
    responses(
        (status = 200, description = "Most recently created orders", body = ListOrdersResponse),
        (status = 400, description = "Malformed limit", body = ApiError),
        (status = 503, description = "Order store unavailable", body = ApiError),
    )
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(params): Query<ListOrdersParams>,
) -> ApiResult<Json<ListOrdersResponse>> {
    let limit = effective_limit(params.limit.as_deref())?;
    let orders = state.reader.list_recent(limit).await?;

    Ok(Json(ListOrdersResponse {
        count: orders.len(),
        orders,
        limit,
    }))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:order_uid", get(get_order))
}
