//! Record providers: where the registry's private endpoint records come from
//!
//! A source hands out batches of changes. Each refresh cycle keeps asking
//! for batches until the source reports it has nothing more for now.

pub mod change_feed;
pub mod file;

pub use change_feed::ChangeFeedSource;
pub use file::FileSource;

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::{SourceConfig, SourceKind};
use crate::error::{GatewayError, Result};
use crate::registry::GatewayRecord;

/// A pull-based stream of record changes
#[async_trait]
pub trait GatewaySource: Send {
    /// Fetch the next batch of changes.
    ///
    /// `Ok(None)` or an empty batch ends the current refresh cycle.
    async fn next_batch(&mut self) -> Result<Option<Vec<GatewayRecord>>>;
}

/// Build the source described by `config`
pub fn from_config(config: &SourceConfig, batch_size: usize) -> Result<Box<dyn GatewaySource>> {
    config.validate()?;
    match config.kind {
        SourceKind::File => Ok(Box::new(FileSource::new(
            config.path.clone().unwrap_or_default(),
        ))),
        SourceKind::ChangeFeed => Ok(Box::new(ChangeFeedSource::new(config, batch_size)?)),
    }
}

#[derive(Debug, Default)]
struct StaticState {
    batches: VecDeque<Vec<GatewayRecord>>,
    failure: Option<GatewayError>,
}

/// In-memory source, for embedding and tests
///
/// Clones share the same queue, so one handle can keep pushing batches
/// while another is owned by the refresh loop.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    state: Arc<Mutex<StaticState>>,
}

impl StaticSource {
    /// Create a source that yields `batches` in order
    pub fn new(batches: Vec<Vec<GatewayRecord>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StaticState {
                batches: batches.into(),
                failure: None,
            })),
        }
    }

    /// Fail once with `error` after the queued batches are drained
    pub fn fail_after(self, error: GatewayError) -> Self {
        self.lock().failure = Some(error);
        self
    }

    /// Queue another batch for the next refresh cycle
    pub fn push(&self, batch: Vec<GatewayRecord>) {
        self.lock().batches.push_back(batch);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StaticState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl GatewaySource for StaticSource {
    async fn next_batch(&mut self) -> Result<Option<Vec<GatewayRecord>>> {
        let mut state = self.lock();
        if let Some(batch) = state.batches.pop_front() {
            return Ok(Some(batch));
        }
        match state.failure.take() {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> GatewayRecord {
        GatewayRecord {
            id: id.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_static_source_drains_in_order() {
        let mut source = StaticSource::new(vec![vec![record("1")], vec![record("2")]]);
        assert_eq!(source.next_batch().await.unwrap().unwrap()[0].id, "1");
        assert_eq!(source.next_batch().await.unwrap().unwrap()[0].id, "2");
        assert!(source.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_static_source_shared_push() {
        let handle = StaticSource::default();
        let mut source = handle.clone();
        assert!(source.next_batch().await.unwrap().is_none());

        handle.push(vec![record("9")]);
        assert_eq!(source.next_batch().await.unwrap().unwrap()[0].id, "9");
    }

    #[tokio::test]
    async fn test_static_source_fails_once() {
        let mut source =
            StaticSource::new(vec![]).fail_after(GatewayError::Source("down".to_string()));
        assert!(source.next_batch().await.is_err());
        assert!(source.next_batch().await.unwrap().is_none());
    }

    #[test]
    fn test_from_config_rejects_incomplete() {
        let config = SourceConfig {
            kind: SourceKind::File,
            path: None,
            endpoint: None,
            database: None,
            collection: None,
            authorization: None,
        };
        assert!(from_config(&config, 10).is_err());
    }

    #[test]
    fn test_from_config_file() {
        let config = SourceConfig {
            kind: SourceKind::File,
            path: Some("/tmp/records.json".to_string()),
            endpoint: None,
            database: None,
            collection: None,
            authorization: None,
        };
        assert!(from_config(&config, 10).is_ok());
    }
}
