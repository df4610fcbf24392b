//! Configuration types for the private link gateway
//!
//! Uses HCL (HashiCorp Configuration Language) as the configuration format.

mod environment;
mod listener;
mod refresh;

pub use environment::EnvironmentConfig;
pub use listener::ListenerConfig;
pub use refresh::{RefreshConfig, SourceConfig, SourceKind};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::error::{GatewayError, Result};

/// Top-level gateway configuration
///
/// # HCL Example
///
/// ```hcl
/// listeners {
///   https  = "0.0.0.0:8443"
///   http   = "0.0.0.0:8080"
///   health = "0.0.0.0:8081"
/// }
///
/// environment {
///   location = "eastus"
/// }
///
/// acr_resource_id = "/subscriptions/.../registries/arosvc"
/// gateway_domains = ["eastus.monitoring.example.com"]
///
/// refresh {
///   interval_secs = 10
///   source {
///     kind = "file"
///     path = "/etc/gateway/records.json"
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listener addresses
    #[serde(default)]
    pub listeners: ListenerConfig,

    /// Cloud endpoints and DNS suffixes
    #[serde(default)]
    pub environment: EnvironmentConfig,

    /// Resource id of the shared container registry, if any
    #[serde(default)]
    pub acr_resource_id: Option<String>,

    /// Extra hostnames every private endpoint may reach
    #[serde(default)]
    pub gateway_domains: Vec<String>,

    /// Registry refresh settings
    #[serde(default)]
    pub refresh: RefreshConfig,

    /// Seconds to keep accepting after readiness drops (default: 45)
    #[serde(default = "default_drain")]
    pub drain_secs: u64,

    /// Port dialed on the destination host (default: 443)
    #[serde(default = "default_upstream_port")]
    pub upstream_port: u16,

    /// Seconds between metrics snapshots and heartbeats (default: 60)
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    /// Seconds a client has to send its PROXY header and Client Hello (default: 10)
    #[serde(default = "default_sniff_timeout")]
    pub sniff_timeout_secs: u64,

    /// Seconds an HTTP client has to send request headers (default: 10)
    #[serde(default = "default_header_read_timeout")]
    pub header_read_timeout_secs: u64,

    /// Socket send/receive buffer size in bytes (default: 65536)
    #[serde(default = "default_socket_buffer_size")]
    pub socket_buffer_size: u32,
}

fn default_drain() -> u64 {
    45
}

fn default_upstream_port() -> u16 {
    443
}

fn default_metrics_interval() -> u64 {
    60
}

fn default_sniff_timeout() -> u64 {
    10
}

fn default_header_read_timeout() -> u64 {
    10
}

fn default_socket_buffer_size() -> u32 {
    65536
}

impl GatewayConfig {
    /// Load configuration from an HCL file.
    ///
    /// The file must contain valid HCL content regardless of extension.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            GatewayError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_hcl(&content)
    }

    /// Parse configuration from an HCL string
    pub fn from_hcl(content: &str) -> Result<Self> {
        hcl::from_str(content)
            .map_err(|e| GatewayError::Config(format!("Failed to parse HCL config: {}", e)))
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<()> {
        for (name, address) in self.listeners.iter() {
            if address.parse::<std::net::SocketAddr>().is_err() {
                return Err(GatewayError::Config(format!(
                    "Listener '{}' has invalid address '{}'",
                    name, address
                )));
            }
        }

        if self.environment.storage_endpoint_suffix.is_empty() {
            return Err(GatewayError::Config(
                "Environment storage_endpoint_suffix must not be empty".to_string(),
            ));
        }

        if self.acr_resource_id.is_some() && self.environment.location.is_empty() {
            return Err(GatewayError::Config(
                "Environment location is required when acr_resource_id is set".to_string(),
            ));
        }

        if self.refresh.interval_secs == 0 {
            return Err(GatewayError::Config(
                "Refresh interval_secs must be greater than zero".to_string(),
            ));
        }

        if self.refresh.staleness_secs < self.refresh.interval_secs {
            return Err(GatewayError::Config(format!(
                "Refresh staleness_secs ({}) must not be shorter than interval_secs ({})",
                self.refresh.staleness_secs, self.refresh.interval_secs
            )));
        }

        if let Some(source) = &self.refresh.source {
            source.validate()?;
        }

        self.allow_list().map(|_| ())
    }

    /// Build the set of hostnames every private endpoint may reach.
    ///
    /// Entries are lowercased and empty entries are dropped.
    pub fn allow_list(&self) -> Result<HashSet<String>> {
        let mut hosts: Vec<String> = self.gateway_domains.clone();
        hosts.extend(self.environment.endpoint_hosts()?);
        if let Some(acr) = &self.acr_resource_id {
            hosts.extend(self.environment.registry_hosts(acr)?);
        }

        Ok(hosts
            .into_iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect())
    }

    /// Registry data older than this makes the gateway unready
    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.refresh.staleness_secs)
    }

    /// Per-connection budget for the PROXY header and Client Hello
    pub fn sniff_timeout(&self) -> Duration {
        Duration::from_secs(self.sniff_timeout_secs)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listeners: ListenerConfig::default(),
            environment: EnvironmentConfig::default(),
            acr_resource_id: None,
            gateway_domains: vec![],
            refresh: RefreshConfig::default(),
            drain_secs: default_drain(),
            upstream_port: default_upstream_port(),
            metrics_interval_secs: default_metrics_interval(),
            sniff_timeout_secs: default_sniff_timeout(),
            header_read_timeout_secs: default_header_read_timeout(),
            socket_buffer_size: default_socket_buffer_size(),
        }
    }
}
