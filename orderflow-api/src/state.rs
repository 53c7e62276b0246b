//! Shared state handed to every route handler.

use std::sync::Arc;
use std::time::Instant;

use orderflow_ingest::IngestStats;
use orderflow_storage::{OrderCache, OrderStore, ReadThroughCache};

use crate::telemetry::ServiceMetrics;

/// Read path over type-erased store and cache capabilities.
pub type OrderReader = ReadThroughCache<dyn OrderStore, dyn OrderCache>;

#[derive(Clone)]
pub struct AppState {
    pub reader: Arc<OrderReader>,
    pub ingest_stats: Arc<IngestStats>,
    pub metrics: Arc<ServiceMetrics>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        reader: Arc<OrderReader>,
        ingest_stats: Arc<IngestStats>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            reader,
            ingest_stats,
            metrics,
            start_time: Instant::now(),
        }
    }
}
