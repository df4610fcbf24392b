//! Registry: in-memory authorization cache of private endpoint records
//!
//! Records are keyed by private endpoint LinkID and kept current by a
//! background refresh loop that pulls batches from a [`GatewaySource`].
//! Reads take a brief shared lock; each refresh cycle applies everything
//! it fetched under a single exclusive lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::error::Result;
use crate::observability::GatewayMetrics;
use crate::provider::GatewaySource;

/// Authorization data for one private endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRecord {
    /// Private endpoint LinkID, in decimal
    #[serde(default)]
    pub id: String,

    /// The owning cluster is being torn down
    #[serde(default)]
    pub deleting: bool,

    /// Suffix of the cluster storage account name (`cluster<suffix>`)
    #[serde(default)]
    pub storage_suffix: String,

    /// Storage account backing the cluster's image registry
    #[serde(default)]
    pub image_registry_storage_account_name: String,
}

/// LinkID → record map plus the time of the last successful refresh
#[derive(Debug, Default)]
pub struct Registry {
    records: RwLock<HashMap<String, GatewayRecord>>,
    last_refreshed: RwLock<Option<DateTime<Utc>>>,
}

impl Registry {
    /// Create an empty registry that has never been refreshed
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the live record for `id`
    pub fn get(&self, id: &str) -> Option<GatewayRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Apply a set of changes under one exclusive lock.
    ///
    /// Records marked `deleting` are removed, all others are upserted.
    /// Returns the number of records applied.
    pub fn apply(&self, records: Vec<GatewayRecord>) -> usize {
        let count = records.len();
        let mut map = self.records.write().unwrap_or_else(PoisonError::into_inner);
        for record in records {
            if record.deleting {
                map.remove(&record.id);
            } else {
                map.insert(record.id.clone(), record);
            }
        }
        count
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the registry holds no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Time of the last successful refresh cycle
    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        *self
            .last_refreshed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a successful refresh cycle
    pub fn mark_refreshed(&self, at: DateTime<Utc>) {
        *self
            .last_refreshed
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(at);
    }

    /// Run one refresh cycle: drain `source`, apply, stamp the time.
    ///
    /// On a fetch error, batches already fetched are still applied but the
    /// refresh time is left unchanged.
    pub async fn refresh_once<S>(&self, source: &mut S) -> Result<usize>
    where
        S: GatewaySource + ?Sized,
    {
        let mut fetched = Vec::new();
        let outcome = loop {
            match source.next_batch().await {
                Ok(Some(batch)) if !batch.is_empty() => fetched.extend(batch),
                Ok(_) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        let applied = self.apply(fetched);
        outcome?;
        self.mark_refreshed(Utc::now());
        Ok(applied)
    }
}

/// Spawn the background refresh loop.
///
/// Runs a cycle immediately, then every `interval`, until `shutdown` flips.
pub fn spawn_refresh_loop(
    registry: Arc<Registry>,
    mut source: Box<dyn GatewaySource>,
    interval: Duration,
    metrics: Arc<GatewayMetrics>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            match registry.refresh_once(source.as_mut()).await {
                Ok(applied) => {
                    if let Some(at) = registry.last_refreshed() {
                        metrics.record_refresh(at);
                    }
                    tracing::debug!(
                        applied,
                        records = registry.len(),
                        "Registry refresh completed"
                    );
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Registry refresh failed, keeping last known state");
                }
            }
        }

        tracing::debug!("Registry refresh loop stopped");
    })
}
