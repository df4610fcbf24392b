//! Registry refresh configuration: poll cadence and record source

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// Kind of record source feeding the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// JSON snapshot file re-read every cycle
    File,
    /// HTTP incremental change feed
    ChangeFeed,
}

/// Record source configuration
///
/// # Example
///
/// ```hcl
/// source {
///   kind       = "change_feed"
///   endpoint   = "https://db.example.com"
///   database   = "ARO"
///   collection = "Gateway"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source type
    pub kind: SourceKind,

    /// Snapshot path (for `file`)
    #[serde(default)]
    pub path: Option<String>,

    /// Feed base URL (for `change_feed`)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Database name (for `change_feed`)
    #[serde(default)]
    pub database: Option<String>,

    /// Collection name (for `change_feed`)
    #[serde(default)]
    pub collection: Option<String>,

    /// Pre-computed `authorization` header value (for `change_feed`)
    #[serde(default)]
    pub authorization: Option<String>,
}

impl SourceConfig {
    /// Check that the fields required by `kind` are present
    pub fn validate(&self) -> Result<()> {
        let missing = |field: &str| {
            GatewayError::Config(format!(
                "Registry source '{:?}' requires '{}'",
                self.kind, field
            ))
        };
        match self.kind {
            SourceKind::File => {
                if self.path.as_deref().unwrap_or("").is_empty() {
                    return Err(missing("path"));
                }
            }
            SourceKind::ChangeFeed => {
                for (field, value) in [
                    ("endpoint", &self.endpoint),
                    ("database", &self.database),
                    ("collection", &self.collection),
                ] {
                    if value.as_deref().unwrap_or("").is_empty() {
                        return Err(missing(field));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Registry refresh loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Seconds between refresh cycles (default: 10)
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Maximum records per fetched batch (default: 100)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Registry data older than this makes the gateway unready (default: 60)
    #[serde(default = "default_staleness")]
    pub staleness_secs: u64,

    /// Where records come from. Without a source, records must be
    /// supplied programmatically.
    #[serde(default)]
    pub source: Option<SourceConfig>,
}

fn default_interval() -> u64 {
    10
}

fn default_batch_size() -> usize {
    100
}

fn default_staleness() -> u64 {
    60
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            batch_size: default_batch_size(),
            staleness_secs: default_staleness(),
            source: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_defaults() {
        let r = RefreshConfig::default();
        assert_eq!(r.interval_secs, 10);
        assert_eq!(r.batch_size, 100);
        assert_eq!(r.staleness_secs, 60);
        assert!(r.source.is_none());
    }

    #[test]
    fn test_parse_file_source() {
        let hcl = r#"
            interval_secs = 5
            source {
                kind = "file"
                path = "/etc/gateway/records.json"
            }
        "#;
        let r: RefreshConfig = hcl::from_str(hcl).unwrap();
        assert_eq!(r.interval_secs, 5);
        let source = r.source.unwrap();
        assert_eq!(source.kind, SourceKind::File);
        assert!(source.validate().is_ok());
    }

    #[test]
    fn test_change_feed_requires_collection() {
        let source = SourceConfig {
            kind: SourceKind::ChangeFeed,
            path: None,
            endpoint: Some("https://db.example.com".to_string()),
            database: Some("ARO".to_string()),
            collection: None,
            authorization: None,
        };
        let err = source.validate().unwrap_err();
        assert!(err.to_string().contains("collection"));
    }

    #[test]
    fn test_file_source_requires_path() {
        let source = SourceConfig {
            kind: SourceKind::File,
            path: Some(String::new()),
            endpoint: None,
            database: None,
            collection: None,
            authorization: None,
        };
        assert!(source.validate().is_err());
    }
}
