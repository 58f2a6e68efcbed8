//! Prometheus metrics for the analytics service.
//!
//! Metrics are recorded with the `metrics` facade throughout the workspace:
//! - Change events received, decode failures by severity, invalidations, ack failures
//! - Transport dial failures and connection state
//! - Cache lookups by result, store errors by kind, store read latency
//!
//! [`PrometheusMetrics::install`] installs the global recorder; the HTTP layer renders it
//! at `GET /metrics`.
//!
//! # Example
//!
//! ```rust,no_run
//! use taskflow_analytics_runtime::metrics::PrometheusMetrics;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let metrics = PrometheusMetrics::install()?;
//! if let Some(text) = metrics.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build the Prometheus recorder
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Handle to the installed Prometheus recorder.
#[derive(Clone, Default)]
pub struct PrometheusMetrics {
    handle: Option<PrometheusHandle>,
}

impl PrometheusMetrics {
    /// Describe all metrics and install the Prometheus recorder globally.
    ///
    /// If another recorder is already installed (tests creating several instances),
    /// a warning is logged and the returned value renders nothing.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] if the bucket configuration is rejected.
    pub fn install() -> Result<Self, MetricsError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build_recorder();
        let handle = recorder.handle();

        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(Self::disabled());
        }

        register_metrics();
        tracing::info!("Prometheus metrics recorder installed");
        Ok(Self {
            handle: Some(handle),
        })
    }

    /// A handle that renders nothing (metrics disabled).
    #[must_use]
    pub const fn disabled() -> Self {
        Self { handle: None }
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if no recorder was installed by this handle.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetrics")
            .field("installed", &self.handle.is_some())
            .finish()
    }
}

fn register_metrics() {
    // Consumer
    describe_counter!(
        "analytics_events_received_total",
        "Total number of change events received from the transport"
    );
    describe_counter!(
        "analytics_events_decode_failed_total",
        "Change events that failed to decode, by severity (hard, soft)"
    );
    describe_counter!(
        "analytics_cache_invalidations_total",
        "Total number of cache invalidations triggered by change events"
    );
    describe_counter!(
        "analytics_ack_failures_total",
        "Total number of rejected message acknowledgements"
    );

    // Transport
    describe_counter!(
        "analytics_transport_dial_failures_total",
        "Total number of failed transport dial attempts"
    );
    describe_gauge!(
        "analytics_transport_connected",
        "Whether a transport session is currently live (0 or 1)"
    );

    // Resolver
    describe_counter!(
        "analytics_cache_lookups_total",
        "Aggregate lookups by result (hit, miss)"
    );
    describe_counter!(
        "analytics_store_errors_total",
        "Record store failures by kind (timeout, unavailable, other)"
    );
    describe_histogram!(
        "analytics_store_read_duration_seconds",
        "Time taken to read both counts for an owner"
    );
}

/// Consumption loop metrics recorder.
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    /// Record a received message.
    pub fn record_received() {
        counter!("analytics_events_received_total").increment(1);
    }

    /// Record a decode failure of the given severity.
    pub fn record_decode_failure(severity: &'static str) {
        counter!("analytics_events_decode_failed_total", "severity" => severity).increment(1);
    }

    /// Record a cache invalidation.
    pub fn record_invalidation() {
        counter!("analytics_cache_invalidations_total").increment(1);
    }

    /// Record a rejected acknowledgement.
    pub fn record_ack_failure() {
        counter!("analytics_ack_failures_total").increment(1);
    }
}

/// Transport connector metrics recorder.
pub struct TransportMetrics;

impl TransportMetrics {
    /// Record a failed dial.
    pub fn record_dial_failure() {
        counter!("analytics_transport_dial_failures_total").increment(1);
    }

    /// Record whether a session is live.
    pub fn record_connected(connected: bool) {
        gauge!("analytics_transport_connected").set(if connected { 1.0 } else { 0.0 });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn disabled_metrics_render_nothing() {
        assert!(PrometheusMetrics::disabled().render().is_none());
    }

    #[test]
    fn install_and_render() {
        let metrics = PrometheusMetrics::install().unwrap();

        ConsumerMetrics::record_received();
        ConsumerMetrics::record_decode_failure("hard");
        TransportMetrics::record_connected(true);

        // Another test in this binary may have installed the recorder first.
        if let Some(rendered) = metrics.render() {
            assert!(rendered.contains("analytics_events_received_total"));
            assert!(rendered.contains("analytics_transport_connected"));
        }
    }
}
