//! Lifecycle: runtime state, readiness and health snapshots
//!
//! Readiness combines three conditions:
//! - the gateway has not begun draining
//! - the registry has completed at least one refresh
//! - that refresh is younger than the staleness threshold

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::observability::GatewayMetrics;
use crate::registry::Registry;
use crate::{GatewayState, HealthStatus};

/// Shared lifecycle tracker consulted by the health endpoints
pub struct Lifecycle {
    state: RwLock<GatewayState>,
    ready: AtomicBool,
    start_time: Instant,
    staleness: Duration,
    registry: Arc<Registry>,
    metrics: Arc<GatewayMetrics>,
}

impl Lifecycle {
    pub fn new(registry: Arc<Registry>, metrics: Arc<GatewayMetrics>, staleness: Duration) -> Self {
        Self {
            state: RwLock::new(GatewayState::Created),
            ready: AtomicBool::new(true),
            start_time: Instant::now(),
            staleness,
            registry,
            metrics,
        }
    }

    /// Current runtime state
    pub fn state(&self) -> GatewayState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_state(&self, new_state: GatewayState) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(from = %*state, to = %new_state, "State transition");
        *state = new_state;
    }

    /// Drop readiness so load balancers stop sending new connections
    pub fn mark_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    /// Whether the gateway should receive traffic right now
    pub fn is_ready(&self) -> bool {
        self.is_ready_at(Utc::now())
    }

    /// Readiness evaluated at `now`
    pub fn is_ready_at(&self, now: DateTime<Utc>) -> bool {
        if !self.ready.load(Ordering::SeqCst) {
            return false;
        }
        let Some(last) = self.registry.last_refreshed() else {
            return false;
        };
        match chrono::Duration::from_std(self.staleness) {
            Ok(limit) => now.signed_duration_since(last) < limit,
            Err(_) => true,
        }
    }

    /// Point-in-time health summary
    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            state: self.state(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            ready: self.is_ready(),
            records: self.registry.len(),
            last_refresh: self.registry.last_refreshed().map(|t| t.to_rfc3339()),
            active_connections: self.metrics.total_active_connections().max(0) as usize,
        }
    }
}
