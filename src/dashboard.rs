//! Dashboard API: readiness, health and metrics endpoints
//!
//! Served on the health listener. The readiness probe is also answered on
//! the HTTP CONNECT listener.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::lifecycle::Lifecycle;
use crate::observability::GatewayMetrics;

/// Path probed by load balancers
pub const READY_PATH: &str = "/healthz/ready";

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Gateway version information
#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    pub name: &'static str,
    pub version: &'static str,
}

impl VersionInfo {
    pub(crate) fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Response from the dashboard API
#[derive(Debug, Clone)]
pub struct DashboardResponse {
    /// HTTP status code
    pub status: u16,
    /// Content-Type header
    pub content_type: String,
    /// Response body
    pub body: String,
}

impl DashboardResponse {
    pub(crate) fn json(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "application/json".to_string(),
            body,
        }
    }

    pub(crate) fn empty(status: u16) -> Self {
        Self {
            status,
            content_type: "text/plain".to_string(),
            body: String::new(),
        }
    }

    pub(crate) fn not_found(message: &str) -> Self {
        Self::json(404, format!(r#"{{"error":"{}"}}"#, message))
    }

    /// Convert into a hyper response
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(Bytes::from(self.body)));
        *response.status_mut() =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if let Ok(value) = HeaderValue::from_str(&self.content_type) {
            response.headers_mut().insert(CONTENT_TYPE, value);
        }
        response
    }
}

// ---------------------------------------------------------------------------
// Dashboard API handler
// ---------------------------------------------------------------------------

/// Dashboard API: serves readiness, health and metrics
#[derive(Clone)]
pub struct DashboardApi {
    lifecycle: Arc<Lifecycle>,
    metrics: Arc<GatewayMetrics>,
}

impl DashboardApi {
    pub fn new(lifecycle: Arc<Lifecycle>, metrics: Arc<GatewayMetrics>) -> Self {
        Self { lifecycle, metrics }
    }

    /// Readiness probe: 200 when ready, 500 otherwise
    pub fn readiness(&self) -> DashboardResponse {
        if self.lifecycle.is_ready() {
            DashboardResponse::empty(200)
        } else {
            DashboardResponse::empty(500)
        }
    }

    /// Handle a dashboard request
    pub fn handle(&self, path: &str) -> DashboardResponse {
        match path {
            READY_PATH => self.readiness(),
            "/health" | "/health/" => {
                let health = self.lifecycle.health();
                let body = serde_json::to_string_pretty(&health).unwrap_or_default();
                DashboardResponse::json(200, body)
            }
            "/metrics" | "/metrics/" => DashboardResponse {
                status: 200,
                content_type: "text/plain; version=0.0.4".to_string(),
                body: self.metrics.render_prometheus(),
            },
            "/version" | "/version/" => {
                let version = VersionInfo::current();
                let body = serde_json::to_string_pretty(&version).unwrap_or_default();
                DashboardResponse::json(200, body)
            }
            _ => DashboardResponse::not_found("Not found"),
        }
    }
}
