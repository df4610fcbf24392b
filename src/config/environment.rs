//! Cloud environment: well-known endpoints of the hosting cloud

use http::Uri;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// Endpoints and DNS suffixes of the cloud the gateway runs in
///
/// Defaults describe the public cloud. Sovereign clouds override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Identity provider endpoint URL
    #[serde(default = "default_active_directory_endpoint")]
    pub active_directory_endpoint: String,

    /// Resource manager endpoint URL
    #[serde(default = "default_resource_manager_endpoint")]
    pub resource_manager_endpoint: String,

    /// DNS suffix of container registries (e.g. `azurecr.io`)
    #[serde(default = "default_container_registry_dns_suffix")]
    pub container_registry_dns_suffix: String,

    /// DNS suffix of storage accounts (e.g. `core.windows.net`)
    #[serde(default = "default_storage_endpoint_suffix")]
    pub storage_endpoint_suffix: String,

    /// Region of the gateway, used for regional registry data endpoints
    #[serde(default)]
    pub location: String,
}

fn default_active_directory_endpoint() -> String {
    "https://login.microsoftonline.com/".to_string()
}

fn default_resource_manager_endpoint() -> String {
    "https://management.azure.com/".to_string()
}

fn default_container_registry_dns_suffix() -> String {
    "azurecr.io".to_string()
}

fn default_storage_endpoint_suffix() -> String {
    "core.windows.net".to_string()
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            active_directory_endpoint: default_active_directory_endpoint(),
            resource_manager_endpoint: default_resource_manager_endpoint(),
            container_registry_dns_suffix: default_container_registry_dns_suffix(),
            storage_endpoint_suffix: default_storage_endpoint_suffix(),
            location: String::new(),
        }
    }
}

impl EnvironmentConfig {
    /// Hostnames of the identity and resource manager endpoints
    pub fn endpoint_hosts(&self) -> Result<[String; 2]> {
        match (
            endpoint_host(&self.active_directory_endpoint),
            endpoint_host(&self.resource_manager_endpoint),
        ) {
            (Some(ad), Some(rm)) => Ok([ad, rm]),
            _ => Err(GatewayError::Config(
                "missing required domain. Ensure the environment has both \
                 ActiveDirectoryEndpoint and ResourceManagerEndpoint"
                    .to_string(),
            )),
        }
    }

    /// Registry hostnames for the registry named in `acr_resource_id`:
    /// the login server and its regional data endpoint.
    pub fn registry_hosts(&self, acr_resource_id: &str) -> Result<[String; 2]> {
        let name = resource_name(acr_resource_id)?;
        let suffix = &self.container_registry_dns_suffix;
        Ok([
            format!("{}.{}", name, suffix),
            format!("{}.{}.data.{}", name, self.location, suffix),
        ])
    }
}

fn endpoint_host(url: &str) -> Option<String> {
    url.parse::<Uri>()
        .ok()
        .and_then(|uri| uri.host().map(str::to_string))
        .filter(|host| !host.is_empty())
}

/// Extract the resource name from an ARM resource id of the form
/// `/subscriptions/<s>/resourceGroups/<g>/providers/<ns>/<type>/<name>`.
pub(crate) fn resource_name(resource_id: &str) -> Result<&str> {
    let invalid = || {
        GatewayError::Config(format!(
            "parsing failed for {}. Invalid resource Id format",
            resource_id
        ))
    };

    let parts: Vec<&str> = resource_id.split('/').collect();
    if parts.len() != 9 || !parts[0].is_empty() {
        return Err(invalid());
    }
    let keywords_ok = parts[1].eq_ignore_ascii_case("subscriptions")
        && parts[3].eq_ignore_ascii_case("resourceGroups")
        && parts[5].eq_ignore_ascii_case("providers");
    if !keywords_ok || parts.iter().skip(1).any(|p| p.is_empty()) {
        return Err(invalid());
    }
    Ok(parts[8])
}
