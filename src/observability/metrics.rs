//! Gateway metrics: lightweight counters and gauges
//!
//! Provides in-process metrics tracking without external dependencies.
//! Metrics can be exported as JSON or rendered as Prometheus text format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;

/// Proxy code path a connection came through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// HTTP CONNECT listener
    Http,
    /// Raw TLS passthrough listener
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission outcome of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Allowed,
    Denied,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Denied => "denied",
        }
    }
}

/// Metrics snapshot: a point-in-time view of all metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Currently open connections per protocol
    pub active_connections: HashMap<String, i64>,
    /// Admission decisions per `protocol/outcome`
    pub connections_total: HashMap<String, u64>,
    /// Unix timestamp of the last successful registry refresh (0 if never)
    pub last_refresh_timestamp: i64,
    /// Connections without a destination hostname, per record id
    pub nohost_total: HashMap<String, u64>,
    /// Failed upstream dials
    pub upstream_failures: u64,
    /// Bytes relayed client → upstream
    pub bytes_sent: u64,
    /// Bytes relayed upstream → client
    pub bytes_received: u64,
    /// Heartbeats emitted while ready
    pub heartbeats: u64,
}

/// RAII guard that decrements the active connection gauge on drop
#[derive(Debug)]
pub struct ConnectionGuard {
    counter: Arc<AtomicI64>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Gateway metrics collector
pub struct GatewayMetrics {
    active_http: Arc<AtomicI64>,
    active_https: Arc<AtomicI64>,
    http_allowed: AtomicU64,
    http_denied: AtomicU64,
    https_allowed: AtomicU64,
    https_denied: AtomicU64,
    last_refresh_timestamp: AtomicI64,
    nohost_total: RwLock<HashMap<String, u64>>,
    upstream_failures: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    heartbeats: AtomicU64,
}

impl GatewayMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            active_http: Arc::new(AtomicI64::new(0)),
            active_https: Arc::new(AtomicI64::new(0)),
            http_allowed: AtomicU64::new(0),
            http_denied: AtomicU64::new(0),
            https_allowed: AtomicU64::new(0),
            https_denied: AtomicU64::new(0),
            last_refresh_timestamp: AtomicI64::new(0),
            nohost_total: RwLock::new(HashMap::new()),
            upstream_failures: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            heartbeats: AtomicU64::new(0),
        }
    }

    fn active(&self, protocol: Protocol) -> &Arc<AtomicI64> {
        match protocol {
            Protocol::Http => &self.active_http,
            Protocol::Https => &self.active_https,
        }
    }

    /// Count an open connection until the returned guard is dropped
    pub fn track_connection(&self, protocol: Protocol) -> ConnectionGuard {
        let counter = self.active(protocol).clone();
        counter.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard { counter }
    }

    /// Current open connections for `protocol`
    pub fn active_connections(&self, protocol: Protocol) -> i64 {
        self.active(protocol).load(Ordering::Relaxed)
    }

    /// Open connections across both protocols
    pub fn total_active_connections(&self) -> i64 {
        self.active_connections(Protocol::Http) + self.active_connections(Protocol::Https)
    }

    /// Record an admission decision
    pub fn record_decision(&self, protocol: Protocol, outcome: Outcome) {
        let counter = match (protocol, outcome) {
            (Protocol::Http, Outcome::Allowed) => &self.http_allowed,
            (Protocol::Http, Outcome::Denied) => &self.http_denied,
            (Protocol::Https, Outcome::Allowed) => &self.https_allowed,
            (Protocol::Https, Outcome::Denied) => &self.https_denied,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection that supplied no destination hostname
    pub fn record_nohost(&self, record_id: &str) {
        let mut map = self
            .nohost_total
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *map.entry(record_id.to_string()).or_insert(0) += 1;
    }

    /// Record the time of a successful registry refresh
    pub fn record_refresh(&self, at: DateTime<Utc>) {
        self.last_refresh_timestamp
            .store(at.timestamp(), Ordering::Relaxed);
    }

    /// Record a failed upstream dial
    pub fn record_upstream_failure(&self) {
        self.upstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record bytes relayed by a finished connection
    pub fn record_bytes(&self, sent: u64, received: u64) {
        self.bytes_sent.fetch_add(sent, Ordering::Relaxed);
        self.bytes_received.fetch_add(received, Ordering::Relaxed);
    }

    /// Record a liveness heartbeat
    pub fn record_heartbeat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut active_connections = HashMap::new();
        active_connections.insert("http".to_string(), self.active_connections(Protocol::Http));
        active_connections.insert("https".to_string(), self.active_connections(Protocol::Https));

        let mut connections_total = HashMap::new();
        for (key, counter) in [
            ("http/allowed", &self.http_allowed),
            ("http/denied", &self.http_denied),
            ("https/allowed", &self.https_allowed),
            ("https/denied", &self.https_denied),
        ] {
            connections_total.insert(key.to_string(), counter.load(Ordering::Relaxed));
        }

        MetricsSnapshot {
            active_connections,
            connections_total,
            last_refresh_timestamp: self.last_refresh_timestamp.load(Ordering::Relaxed),
            nohost_total: self
                .nohost_total
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
        }
    }

    /// Render metrics in Prometheus text exposition format
    pub fn render_prometheus(&self) -> String {
        let snap = self.snapshot();
        let mut output = String::new();

        output.push_str("# HELP gateway_active_connections Current open connections\n");
        output.push_str("# TYPE gateway_active_connections gauge\n");
        for protocol in ["http", "https"] {
            output.push_str(&format!(
                "gateway_active_connections{{protocol=\"{}\"}} {}\n",
                protocol,
                snap.active_connections.get(protocol).unwrap_or(&0)
            ));
        }

        output.push_str("# HELP gateway_connections_total Admission decisions by protocol and outcome\n");
        output.push_str("# TYPE gateway_connections_total counter\n");
        for protocol in ["http", "https"] {
            for outcome in ["allowed", "denied"] {
                let key = format!("{}/{}", protocol, outcome);
                output.push_str(&format!(
                    "gateway_connections_total{{protocol=\"{}\",outcome=\"{}\"}} {}\n",
                    protocol,
                    outcome,
                    snap.connections_total.get(&key).unwrap_or(&0)
                ));
            }
        }

        output.push_str(
            "# HELP gateway_last_refresh_timestamp_seconds Unix time of the last successful registry refresh\n",
        );
        output.push_str("# TYPE gateway_last_refresh_timestamp_seconds gauge\n");
        output.push_str(&format!(
            "gateway_last_refresh_timestamp_seconds {}\n",
            snap.last_refresh_timestamp
        ));

        if !snap.nohost_total.is_empty() {
            output.push_str(
                "# HELP gateway_nohost_total Connections without a destination hostname per record\n",
            );
            output.push_str("# TYPE gateway_nohost_total counter\n");
            for (id, count) in &snap.nohost_total {
                output.push_str(&format!("gateway_nohost_total{{id=\"{}\"}} {}\n", id, count));
            }
        }

        output.push_str("# HELP gateway_upstream_failures_total Failed upstream dials\n");
        output.push_str("# TYPE gateway_upstream_failures_total counter\n");
        output.push_str(&format!(
            "gateway_upstream_failures_total {}\n",
            snap.upstream_failures
        ));

        output.push_str("# HELP gateway_relayed_bytes_total Bytes relayed by direction\n");
        output.push_str("# TYPE gateway_relayed_bytes_total counter\n");
        output.push_str(&format!(
            "gateway_relayed_bytes_total{{direction=\"sent\"}} {}\n",
            snap.bytes_sent
        ));
        output.push_str(&format!(
            "gateway_relayed_bytes_total{{direction=\"received\"}} {}\n",
            snap.bytes_received
        ));

        output.push_str("# HELP gateway_heartbeat_total Heartbeats emitted while ready\n");
        output.push_str("# TYPE gateway_heartbeat_total counter\n");
        output.push_str(&format!("gateway_heartbeat_total {}\n", snap.heartbeats));

        output
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the periodic metrics emitter.
///
/// Every `interval` the loop logs a snapshot and, while `is_ready` holds,
/// records a heartbeat. Stops when `shutdown` flips.
pub fn spawn_metrics_loop<F>(
    metrics: Arc<GatewayMetrics>,
    interval: Duration,
    is_ready: F,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()>
where
    F: Fn() -> bool + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            if is_ready() {
                metrics.record_heartbeat();
                tracing::debug!("gateway_heartbeat");
            }

            let snap = metrics.snapshot();
            tracing::info!(
                active_http = snap.active_connections.get("http").copied().unwrap_or(0),
                active_https = snap.active_connections.get("https").copied().unwrap_or(0),
                last_refresh = snap.last_refresh_timestamp,
                upstream_failures = snap.upstream_failures,
                "Gateway metrics"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- Connection tracking ---

    #[test]
    fn test_initial_state() {
        let m = GatewayMetrics::new();
        assert_eq!(m.total_active_connections(), 0);
        let snap = m.snapshot();
        assert_eq!(snap.last_refresh_timestamp, 0);
        assert_eq!(snap.connections_total["https/allowed"], 0);
    }

    #[test]
    fn test_connection_guard() {
        let m = GatewayMetrics::new();
        let a = m.track_connection(Protocol::Https);
        let b = m.track_connection(Protocol::Https);
        let c = m.track_connection(Protocol::Http);
        assert_eq!(m.active_connections(Protocol::Https), 2);
        assert_eq!(m.active_connections(Protocol::Http), 1);
        drop(a);
        drop(c);
        assert_eq!(m.active_connections(Protocol::Https), 1);
        assert_eq!(m.active_connections(Protocol::Http), 0);
        drop(b);
        assert_eq!(m.total_active_connections(), 0);
    }

    // --- Counters ---

    #[test]
    fn test_record_decision() {
        let m = GatewayMetrics::new();
        m.record_decision(Protocol::Https, Outcome::Allowed);
        m.record_decision(Protocol::Https, Outcome::Denied);
        m.record_decision(Protocol::Https, Outcome::Denied);
        m.record_decision(Protocol::Http, Outcome::Allowed);
        let snap = m.snapshot();
        assert_eq!(snap.connections_total["https/allowed"], 1);
        assert_eq!(snap.connections_total["https/denied"], 2);
        assert_eq!(snap.connections_total["http/allowed"], 1);
        assert_eq!(snap.connections_total["http/denied"], 0);
    }

    #[test]
    fn test_record_nohost_per_id() {
        let m = GatewayMetrics::new();
        m.record_nohost("1");
        m.record_nohost("1");
        m.record_nohost("2");
        let snap = m.snapshot();
        assert_eq!(snap.nohost_total["1"], 2);
        assert_eq!(snap.nohost_total["2"], 1);
    }

    #[test]
    fn test_record_refresh() {
        let m = GatewayMetrics::new();
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        m.record_refresh(at);
        assert_eq!(m.snapshot().last_refresh_timestamp, 1_700_000_000);
    }

    #[test]
    fn test_record_bytes() {
        let m = GatewayMetrics::new();
        m.record_bytes(100, 2000);
        m.record_bytes(1, 2);
        let snap = m.snapshot();
        assert_eq!(snap.bytes_sent, 101);
        assert_eq!(snap.bytes_received, 2002);
    }

    // --- Prometheus rendering ---

    #[test]
    fn test_render_prometheus() {
        let m = GatewayMetrics::new();
        let _guard = m.track_connection(Protocol::Https);
        m.record_decision(Protocol::Https, Outcome::Denied);
        m.record_nohost("1234");
        m.record_upstream_failure();

        let text = m.render_prometheus();
        assert!(text.contains("# TYPE gateway_active_connections gauge"));
        assert!(text.contains("gateway_active_connections{protocol=\"https\"} 1"));
        assert!(text.contains("gateway_connections_total{protocol=\"https\",outcome=\"denied\"} 1"));
        assert!(text.contains("gateway_nohost_total{id=\"1234\"} 1"));
        assert!(text.contains("gateway_upstream_failures_total 1"));
        assert!(text.contains("gateway_last_refresh_timestamp_seconds 0"));
    }

    #[test]
    fn test_render_prometheus_omits_empty_nohost() {
        let m = GatewayMetrics::new();
        assert!(!m.render_prometheus().contains("gateway_nohost_total"));
    }

    #[test]
    fn test_snapshot_serializes() {
        let m = GatewayMetrics::new();
        m.record_heartbeat();
        let json = serde_json::to_string(&m.snapshot()).unwrap();
        assert!(json.contains("\"heartbeats\":1"));
    }

    // --- Emission loop ---

    #[tokio::test]
    async fn test_metrics_loop_heartbeat_only_when_ready() {
        let ready = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let m = Arc::new(GatewayMetrics::new());
        let (tx, rx) = watch::channel(false);

        let flag = ready.clone();
        let handle = spawn_metrics_loop(
            m.clone(),
            Duration::from_millis(10),
            move || flag.load(Ordering::Relaxed),
            rx,
        );

        tokio::time::sleep(Duration::from_millis(35)).await;
        assert_eq!(m.snapshot().heartbeats, 0);

        ready.store(true, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(35)).await;
        assert!(m.snapshot().heartbeats > 0);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
