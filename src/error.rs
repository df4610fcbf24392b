//! Centralized error types for the private link gateway

use thiserror::Error;

/// Gateway error types
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// The connection carried no usable private endpoint identifier
    #[error("link id not found")]
    LinkIdNotFound,

    /// The registry holds no live record for the private endpoint
    #[error("record not found for endpoint {link_id}")]
    RecordNotFound { link_id: String },

    /// PROXY protocol header was present but malformed
    #[error("Malformed PROXY header: {0}")]
    ProxyHeader(String),

    /// Registry source failed to produce a batch
    #[error("Registry source error: {0}")]
    Source(String),

    /// Dialing the upstream destination failed
    #[error("Upstream connection to {address} failed: {source}")]
    UpstreamConnect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_id_not_found_message() {
        assert_eq!(GatewayError::LinkIdNotFound.to_string(), "link id not found");
    }

    #[test]
    fn test_record_not_found_message() {
        let err = GatewayError::RecordNotFound {
            link_id: "notinthemap".to_string(),
        };
        assert_eq!(err.to_string(), "record not found for endpoint notinthemap");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: GatewayError = io.into();
        assert!(err.to_string().contains("boom"));
    }
}
