//! Cache statistics route.

use axum::{extract::State, routing::get, Json, Router};
use orderflow_storage::CacheStats;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CacheStatsResponse {
    /// Orders currently cached
    pub size: usize,
    /// Maximum number of cached orders
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// hits / (hits + misses), 0 before the first lookup
    pub hit_rate: f64,
}

impl From<CacheStats> for CacheStatsResponse {
    fn from(stats: CacheStats) -> Self {
        Self {
            size: stats.size,
            capacity: stats.capacity,
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            hit_rate: stats.hit_rate(),
        }
    }
}

/// GET /api/v1/cache/stats - Cache size, capacity and counters
#[utoipa::path(
    get,
    path = "/api/v1/cache/stats",
    tag = "Cache",
    responses(
        (status = 200, description = "Cache statistics", body = CacheStatsResponse),
    )
)]
pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStatsResponse> {
    Json(state.reader.cache_stats().into())
}

pub fn create_router() -> Router<AppState> {
    Router::new().route("/stats", get(cache_stats))
}
