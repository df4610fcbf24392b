//! File source: records from a JSON snapshot on disk
//!
//! The file holds a JSON array of records and is re-read every refresh
//! cycle. Records that disappear from the snapshot are reported as deleted.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;

use super::GatewaySource;
use crate::error::{GatewayError, Result};
use crate::registry::GatewayRecord;

/// Snapshot file source
pub struct FileSource {
    path: PathBuf,
    known: HashSet<String>,
    served: bool,
}

impl FileSource {
    /// Create a source reading `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            known: HashSet::new(),
            served: false,
        }
    }

    async fn read_snapshot(&self) -> Result<Vec<GatewayRecord>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            GatewayError::Source(format!(
                "Failed to read record file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl GatewaySource for FileSource {
    async fn next_batch(&mut self) -> Result<Option<Vec<GatewayRecord>>> {
        // One batch per cycle
        if self.served {
            self.served = false;
            return Ok(None);
        }

        let mut records = self.read_snapshot().await?;
        let live: HashSet<String> = records
            .iter()
            .filter(|r| !r.deleting)
            .map(|r| r.id.clone())
            .collect();

        let removed: Vec<GatewayRecord> = self
            .known
            .difference(&live)
            .filter(|id| !records.iter().any(|r| &r.id == *id))
            .map(|id| GatewayRecord {
                id: id.clone(),
                deleting: true,
                ..Default::default()
            })
            .collect();
        records.extend(removed);
        self.known = live;

        if records.is_empty() {
            return Ok(None);
        }
        self.served = true;
        Ok(Some(records))
    }
}
