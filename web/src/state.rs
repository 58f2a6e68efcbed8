//! Application state for Axum handlers.

use taskflow_analytics_core::AggregateResolver;
use taskflow_analytics_runtime::{ConnectorState, PrometheusMetrics};
use tokio::sync::watch;

/// Shared state handed to every handler.
///
/// Cloning is cheap: the resolver shares its cache and store through `Arc`s, and the
/// watch receiver is a handle onto the connector's state channel.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Cache-first aggregate reads
    pub resolver: AggregateResolver,
    /// Latest transport connector state
    pub transport: watch::Receiver<ConnectorState>,
    /// Prometheus handle for `GET /metrics`
    pub metrics: PrometheusMetrics,
}

impl AppState {
    /// Create application state.
    #[must_use]
    pub const fn new(
        resolver: AggregateResolver,
        transport: watch::Receiver<ConnectorState>,
        metrics: PrometheusMetrics,
    ) -> Self {
        Self {
            resolver,
            transport,
            metrics,
        }
    }

    /// Current connector state.
    #[must_use]
    pub fn transport_state(&self) -> ConnectorState {
        *self.transport.borrow()
    }
}
