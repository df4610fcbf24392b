//! Gateway orchestrator: high-level coordinator for all gateway components
//!
//! Ties together configuration, the registry and its refresh loop, the
//! authorizer, listeners and observability into a single manageable unit.
//!
//! Shutdown sequence: readiness drops first, connections keep being
//! accepted for the drain period so load balancers can move away, then the
//! listeners and background loops stop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::GatewayConfig;
use crate::dashboard::DashboardApi;
use crate::entrypoint::{self, Listeners};
use crate::error::{GatewayError, Result};
use crate::lifecycle::Lifecycle;
use crate::observability::metrics::spawn_metrics_loop;
use crate::observability::{AccessLog, GatewayMetrics};
use crate::provider::{self, GatewaySource};
use crate::proxy::ProxyContext;
use crate::registry::{spawn_refresh_loop, Registry};
use crate::router::Authorizer;
use crate::{GatewayState, HealthStatus};

/// The main Gateway: coordinates all components
pub struct Gateway {
    config: GatewayConfig,
    registry: Arc<Registry>,
    metrics: Arc<GatewayMetrics>,
    lifecycle: Arc<Lifecycle>,
    context: Arc<ProxyContext>,
}

impl Gateway {
    /// Create a new gateway from configuration
    pub fn new(config: GatewayConfig) -> Result<Self> {
        config.validate()?;

        let allow_list = config.allow_list()?;
        tracing::info!(hosts = allow_list.len(), "Allow-list built");

        let registry = Arc::new(Registry::new());
        let metrics = Arc::new(GatewayMetrics::new());
        let lifecycle = Arc::new(Lifecycle::new(
            registry.clone(),
            metrics.clone(),
            config.staleness(),
        ));
        let authorizer = Arc::new(Authorizer::new(
            allow_list,
            config.environment.storage_endpoint_suffix.clone(),
            registry.clone(),
            metrics.clone(),
        ));
        let context = Arc::new(ProxyContext {
            authorizer,
            metrics: metrics.clone(),
            access_log: AccessLog::new(),
            dashboard: DashboardApi::new(lifecycle.clone(), metrics.clone()),
            upstream_port: config.upstream_port,
            sniff_timeout: config.sniff_timeout(),
            header_read_timeout: Duration::from_secs(config.header_read_timeout_secs),
        });

        Ok(Self {
            config,
            registry,
            metrics,
            lifecycle,
            context,
        })
    }

    /// Build the record source named in the configuration
    pub fn source_from_config(&self) -> Result<Box<dyn GatewaySource>> {
        let source = self.config.refresh.source.as_ref().ok_or_else(|| {
            GatewayError::Config("No registry source configured".to_string())
        })?;
        provider::from_config(source, self.config.refresh.batch_size)
    }

    /// Bind the listeners and serve until `shutdown` resolves and the drain
    /// period has passed.
    ///
    /// Returns an error if a listener cannot be bound or an accept fails.
    pub async fn run<F>(&self, source: Box<dyn GatewaySource>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.lifecycle.set_state(GatewayState::Starting);

        let listeners = match Listeners::bind(&self.config) {
            Ok(listeners) => listeners,
            Err(e) => {
                self.lifecycle.set_state(GatewayState::Stopped);
                return Err(e);
            }
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        let refresh = spawn_refresh_loop(
            self.registry.clone(),
            source,
            Duration::from_secs(self.config.refresh.interval_secs),
            self.metrics.clone(),
            stop_rx.clone(),
        );
        let lifecycle = self.lifecycle.clone();
        let heartbeat = spawn_metrics_loop(
            self.metrics.clone(),
            Duration::from_secs(self.config.metrics_interval_secs),
            move || lifecycle.is_ready(),
            stop_rx,
        );

        let result = {
            let accept = entrypoint::serve(listeners, self.context.clone());
            tokio::pin!(accept);
            tokio::pin!(shutdown);

            self.lifecycle.set_state(GatewayState::Running);
            tracing::info!(
                https = %self.config.listeners.https,
                http = %self.config.listeners.http,
                health = %self.config.listeners.health,
                "Gateway is running"
            );

            tokio::select! {
                res = &mut accept => res,
                _ = &mut shutdown => {
                    self.lifecycle.set_state(GatewayState::Draining);
                    self.lifecycle.mark_not_ready();
                    tracing::info!(drain_secs = self.config.drain_secs, "Shutdown requested, draining");
                    tokio::select! {
                        res = &mut accept => res,
                        _ = tokio::time::sleep(Duration::from_secs(self.config.drain_secs)) => Ok(()),
                    }
                }
            }
        };

        let _ = stop_tx.send(true);
        let _ = refresh.await;
        let _ = heartbeat.await;

        self.lifecycle.set_state(GatewayState::Stopped);
        match &result {
            Ok(()) => tracing::info!("Gateway stopped"),
            Err(e) => tracing::error!(error = %e, "Gateway stopped on listener failure"),
        }
        result
    }

    /// Get the current gateway state
    pub fn state(&self) -> GatewayState {
        self.lifecycle.state()
    }

    /// Get a health status snapshot
    pub fn health(&self) -> HealthStatus {
        self.lifecycle.health()
    }

    /// Whether load balancers should send traffic here
    pub fn is_ready(&self) -> bool {
        self.lifecycle.is_ready()
    }

    /// Get the record registry
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Get the metrics collector
    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    /// Get the current configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}
