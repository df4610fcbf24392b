//! Listener configuration: the three network sockets the gateway binds

use serde::{Deserialize, Serialize};

/// Listener addresses
///
/// The HTTPS and HTTP listeners sit behind the private link service and
/// expect a PROXY protocol v2 header on every connection. The health
/// listener is probed directly by the load balancer.
///
/// # Example
///
/// ```hcl
/// listeners {
///   https  = "0.0.0.0:8443"
///   http   = "0.0.0.0:8080"
///   health = "0.0.0.0:8081"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Raw TLS passthrough listener
    #[serde(default = "default_https")]
    pub https: String,

    /// HTTP CONNECT proxy listener
    #[serde(default = "default_http")]
    pub http: String,

    /// Readiness and metrics listener
    #[serde(default = "default_health")]
    pub health: String,
}

fn default_https() -> String {
    "0.0.0.0:8443".to_string()
}

fn default_http() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_health() -> String {
    "0.0.0.0:8081".to_string()
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            https: default_https(),
            http: default_http(),
            health: default_health(),
        }
    }
}

impl ListenerConfig {
    /// All listeners as `(name, address)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("https", self.https.as_str()),
            ("http", self.http.as_str()),
            ("health", self.health.as_str()),
        ]
        .into_iter()
    }
}
