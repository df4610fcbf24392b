//! # Private Link Gateway
//!
//! An egress gateway for clusters reaching the outside world through a
//! private link service. Every connection arrives with a PROXY v2 header
//! naming the private endpoint it came through; the gateway only lets it
//! reach hostnames that endpoint is entitled to.
//!
//! ## Architecture
//!
//! ```text
//! Listener → PROXY v2 header → LinkID → Authorizer (Registry + allow-list) → Upstream
//! ```
//!
//! ## Core Features
//!
//! - **HTTPS passthrough**: SNI read from the Client Hello, TLS never terminated
//! - **HTTP CONNECT**: opaque tunnels to port 443
//! - **Registry refresh**: records pulled from a file or change feed in the background
//! - **Readiness and drain**: health endpoint tracks registry freshness
//! - **Observability**: structured access log and Prometheus-style metrics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use private_link_gateway::{Gateway, config::GatewayConfig};
//!
//! #[tokio::main]
//! async fn main() -> private_link_gateway::Result<()> {
//!     let config = GatewayConfig::from_file("gateway.hcl").await?;
//!     let gateway = Gateway::new(config)?;
//!     let source = gateway.source_from_config()?;
//!     gateway.run(source, async { let _ = tokio::signal::ctrl_c().await; }).await
//! }
//! ```

pub mod config;
pub mod dashboard;
pub(crate) mod entrypoint;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod observability;
pub mod provider;
pub mod proxy;
pub mod registry;
pub mod router;

// Re-export main types
pub use error::{GatewayError, Result};
pub use gateway::Gateway;
pub use provider::{GatewaySource, StaticSource};
pub use registry::{GatewayRecord, Registry};
pub use router::{Authorizer, Decision};

use serde::{Deserialize, Serialize};

/// Gateway runtime state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Default)]
pub enum GatewayState {
    /// Gateway has been created but not yet started
    #[default]
    Created,
    /// Gateway is binding listeners
    Starting,
    /// Gateway is accepting and proxying connections
    Running,
    /// Readiness has dropped; connections are still accepted until the drain ends
    Draining,
    /// Gateway has fully stopped
    Stopped,
}

impl std::fmt::Display for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Gateway health status snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Current gateway state
    pub state: GatewayState,
    /// Uptime in seconds since gateway started
    pub uptime_secs: u64,
    /// Whether the readiness probe currently passes
    pub ready: bool,
    /// Records held in the registry
    pub records: usize,
    /// RFC 3339 time of the last successful refresh
    pub last_refresh: Option<String>,
    /// Number of active connections
    pub active_connections: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_state_default() {
        let state = GatewayState::default();
        assert_eq!(state, GatewayState::Created);
    }

    #[test]
    fn test_gateway_state_display() {
        assert_eq!(GatewayState::Created.to_string(), "created");
        assert_eq!(GatewayState::Starting.to_string(), "starting");
        assert_eq!(GatewayState::Running.to_string(), "running");
        assert_eq!(GatewayState::Draining.to_string(), "draining");
        assert_eq!(GatewayState::Stopped.to_string(), "stopped");
    }

    #[test]
    fn test_gateway_state_serialization() {
        let state = GatewayState::Draining;
        let json = serde_json::to_string(&state).unwrap();
        let parsed: GatewayState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, GatewayState::Draining);
    }

    #[test]
    fn test_health_status_default() {
        let health = HealthStatus::default();
        assert_eq!(health.state, GatewayState::Created);
        assert_eq!(health.uptime_secs, 0);
        assert!(!health.ready);
        assert_eq!(health.records, 0);
        assert!(health.last_refresh.is_none());
    }

    #[test]
    fn test_health_status_serialization() {
        let health = HealthStatus {
            state: GatewayState::Running,
            uptime_secs: 3600,
            ready: true,
            records: 12,
            last_refresh: Some("2026-01-01T00:00:00+00:00".to_string()),
            active_connections: 42,
        };
        let json = serde_json::to_string(&health).unwrap();
        let parsed: HealthStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.state, GatewayState::Running);
        assert!(parsed.ready);
        assert_eq!(parsed.records, 12);
        assert_eq!(parsed.active_connections, 42);
    }
}
