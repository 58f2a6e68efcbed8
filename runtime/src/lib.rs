//! # Taskflow Analytics Runtime
//!
//! The long-lived background machinery that keeps the aggregate cache fresh.
//!
//! ## Core Components
//!
//! - **Transport Connector**: dials the transport, supervises the session, reconnects
//!   with backoff and reports its state on a watch channel
//! - **Consumption Loop**: receive → decode → invalidate → acknowledge, one message at a
//!   time
//! - **Backoff Policy**: capped exponential delays between dial attempts
//!
//! ## Example
//!
//! ```ignore
//! use taskflow_analytics_runtime::TransportConnector;
//! use tokio_util::sync::CancellationToken;
//!
//! let shutdown = CancellationToken::new();
//! let connector = TransportConnector::new(transport, cache, shutdown.clone());
//! let state = connector.state();
//! let handle = connector.spawn();
//!
//! // Later
//! shutdown.cancel();
//! handle.await?;
//! ```

/// Exponential backoff between dial attempts
pub mod backoff;

/// Session supervision and reconnection
pub mod connector;

/// The per-session receive/invalidate/ack loop
pub mod consumer;

/// Prometheus metrics for observability
pub mod metrics;

pub use backoff::BackoffPolicy;
pub use connector::{ConnectorState, TransportConnector};
pub use consumer::{ConsumerStats, ConsumptionLoop, LoopExit};
pub use metrics::PrometheusMetrics;
