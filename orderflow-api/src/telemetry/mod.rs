//! Telemetry: tracing subscriber setup and Prometheus metrics.

pub mod metrics;
pub mod tracer;

pub use metrics::{metrics_handler, MeteredStore, ServiceMetrics};
pub use tracer::init_tracing;
