//! Authorizer: decides whether a private endpoint may reach a hostname
//!
//! Resolution order:
//! 1. The LinkID must map to a live record in the registry
//! 2. The hostname is checked against the ordered [`HostRule`]s
//! 3. No rule matched means denied

pub mod rule;

pub use rule::{HostRule, RuleContext};

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{GatewayError, Result};
use crate::observability::GatewayMetrics;
use crate::registry::Registry;

/// Outcome of an authorization check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Record id owning the private endpoint
    pub owner: String,
    /// Whether the connection may proceed
    pub allowed: bool,
    /// Rule that admitted the host
    pub rule: Option<HostRule>,
}

/// Authorization engine shared by both proxy paths
pub struct Authorizer {
    allow_list: HashSet<String>,
    storage_endpoint_suffix: String,
    registry: Arc<Registry>,
    metrics: Arc<GatewayMetrics>,
}

impl Authorizer {
    /// Create an authorizer. Allow-list entries are lowercased.
    pub fn new(
        allow_list: HashSet<String>,
        storage_endpoint_suffix: impl Into<String>,
        registry: Arc<Registry>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            allow_list: allow_list
                .into_iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            storage_endpoint_suffix: storage_endpoint_suffix.into(),
            registry,
            metrics,
        }
    }

    /// Decide whether the private endpoint `link_id` may reach `host`.
    ///
    /// Errors with [`GatewayError::RecordNotFound`] when the endpoint has no
    /// live record, regardless of the host.
    pub fn decide(&self, link_id: &str, host: &str) -> Result<Decision> {
        let record = self
            .registry
            .get(link_id)
            .filter(|r| !r.deleting)
            .ok_or_else(|| GatewayError::RecordNotFound {
                link_id: link_id.to_string(),
            })?;

        let host = host.to_ascii_lowercase();
        if host.is_empty() {
            tracing::info!(link_id, "no host supplied");
            self.metrics.record_nohost(&record.id);
        }

        let ctx = RuleContext {
            allow_list: &self.allow_list,
            storage_endpoint_suffix: &self.storage_endpoint_suffix,
            record: &record,
        };
        let rule = HostRule::first_match(&host, &ctx);

        Ok(Decision {
            owner: record.id.clone(),
            allowed: rule.is_some(),
            rule,
        })
    }

    /// The registry consulted for records
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}
