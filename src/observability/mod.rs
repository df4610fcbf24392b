//! Observability: metrics and access logging
//!
//! Provides structured access logging and Prometheus-compatible metrics.

pub mod access_log;
pub mod metrics;

pub use access_log::{AccessLog, AccessLogEntry};
pub use metrics::{ConnectionGuard, GatewayMetrics, MetricsSnapshot, Outcome, Protocol};
