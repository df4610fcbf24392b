//! Structured access log: one JSON record per admission decision
//!
//! Produces structured log entries for each proxied connection,
//! suitable for ingestion by log aggregation systems.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::metrics::{Outcome, Protocol};

/// A single access log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogEntry {
    /// ISO 8601 timestamp
    pub timestamp: String,
    /// Proxy code path
    pub protocol: Protocol,
    /// Original client address from the PROXY header
    pub client: Option<String>,
    /// Private endpoint LinkID
    pub link_id: Option<String>,
    /// Owning record id, when the LinkID resolved
    pub owner: Option<String>,
    /// Destination hostname requested by the client
    pub hostname: String,
    /// Admission outcome
    pub outcome: Outcome,
    /// Host rule that admitted the destination
    pub rule: Option<String>,
    /// Why the connection was denied
    pub reason: Option<String>,
    /// Milliseconds from accept to decision
    pub duration_ms: u64,
}

/// Access log manager: tracks and emits structured log entries
pub struct AccessLog {
    total_entries: Arc<AtomicU64>,
}

impl AccessLog {
    /// Create a new access log manager
    pub fn new() -> Self {
        Self {
            total_entries: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start tracking a connection. Returns a tracker to measure duration.
    pub fn start(&self, protocol: Protocol) -> ConnectionTracker {
        ConnectionTracker {
            start: Instant::now(),
            protocol,
        }
    }

    /// Record and emit a log entry
    pub fn record(&self, entry: &AccessLogEntry) {
        self.total_entries.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            target: "access_log",
            protocol = entry.protocol.as_str(),
            link_id = entry.link_id.as_deref().unwrap_or("-"),
            owner = entry.owner.as_deref().unwrap_or("-"),
            hostname = %entry.hostname,
            outcome = entry.outcome.as_str(),
            rule = entry.rule.as_deref().unwrap_or("-"),
            duration_ms = entry.duration_ms,
            "{}",
            serde_json::to_string(entry).unwrap_or_default()
        );
    }

    /// Get total number of logged entries
    pub fn total_entries(&self) -> u64 {
        self.total_entries.load(Ordering::Relaxed)
    }
}

impl Default for AccessLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the time from accept to decision
pub struct ConnectionTracker {
    start: Instant,
    protocol: Protocol,
}

impl ConnectionTracker {
    /// Get elapsed time in milliseconds since the connection was accepted
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Build an access log entry for the tracked connection
    pub fn build_entry(
        &self,
        client: Option<String>,
        link_id: Option<String>,
        owner: Option<String>,
        hostname: impl Into<String>,
        outcome: Outcome,
        reason: Option<String>,
    ) -> AccessLogEntry {
        AccessLogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            protocol: self.protocol,
            client,
            link_id,
            owner,
            hostname: hostname.into(),
            outcome,
            rule: None,
            reason,
            duration_ms: self.elapsed_ms(),
        }
    }
}

impl AccessLogEntry {
    /// Name the host rule behind an allowed decision
    pub fn with_rule(mut self, rule: Option<&str>) -> Self {
        self.rule = rule.map(str::to_string);
        self
    }
}
