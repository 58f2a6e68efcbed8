//! Transport connector: owns the session lifecycle and reconnects with backoff.
//!
//! # State Machine
//!
//! ```text
//!              dial ok                 session lost
//! Connecting ──────────▶ Connected ───────────────▶ Disconnected
//!     ▲  │ dial failed                                   │
//!     │  └──────────────▶ Disconnected ── backoff ───────┘
//!     │                                                  │
//!     └──────────────────────────────────────────────────┘
//!
//! shutdown (from any state) ──▶ ShuttingDown ──▶ Terminated
//! ```
//!
//! The current state is published on a [`watch`] channel so the readiness probe can
//! report it without touching the connector.
//!
//! # Reconnect Policy
//!
//! - A failed dial waits [`BackoffPolicy::delay_for_attempt`] and retries, forever.
//! - After `degraded_after` consecutive failures an error is logged once; retries go on.
//! - A session that delivered at least one message resets the failure count and is
//!   redialed immediately when lost.
//! - A session lost before delivering anything counts as a failure and goes through
//!   backoff, so a broker that accepts connections and drops them at once cannot cause
//!   a hot loop.
//!
//! Every session is closed exactly once, whether the loop ended by shutdown, session
//! loss or a panic while handling a message.

use crate::backoff::BackoffPolicy;
use crate::consumer::{ConsumerStats, ConsumptionLoop, LoopExit};
use crate::metrics::TransportMetrics;
use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use taskflow_analytics_core::{AnalyticsCache, ConsumerSession, Transport, TransportError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle state of the transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    /// No session; waiting to dial.
    Disconnected,
    /// Dial in progress.
    Connecting,
    /// A session is live and being drained.
    Connected,
    /// Shutdown signalled; closing the session.
    ShuttingDown,
    /// The connector has stopped.
    Terminated,
}

impl ConnectorState {
    /// Lowercase name for logs and the readiness payload.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ShuttingDown => "shutting_down",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supervises the transport session and feeds it to a [`ConsumptionLoop`].
pub struct TransportConnector {
    transport: Arc<dyn Transport>,
    cache: Arc<AnalyticsCache>,
    policy: BackoffPolicy,
    shutdown: CancellationToken,
    state: watch::Sender<ConnectorState>,
}

impl TransportConnector {
    /// Create a connector that invalidates entries in `cache` until `shutdown` fires.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: Arc<AnalyticsCache>,
        shutdown: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ConnectorState::Disconnected);
        Self {
            transport,
            cache,
            policy: BackoffPolicy::default(),
            shutdown,
            state,
        }
    }

    /// Use a custom reconnect policy.
    #[must_use]
    pub fn with_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Subscribe to state changes. Take this before [`spawn`](Self::spawn).
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnectorState> {
        self.state.subscribe()
    }

    /// Run the connector as a background task.
    ///
    /// The task resolves to the counters accumulated over all sessions.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<ConsumerStats> {
        tokio::spawn(self.run())
    }

    /// Run until shutdown is signalled.
    pub async fn run(self) -> ConsumerStats {
        let endpoint = self.transport.describe();
        info!(transport = %endpoint, "Transport connector started");

        let mut totals = ConsumerStats::default();
        let mut failures: u32 = 0;
        let mut degradation_reported = false;

        while !self.shutdown.is_cancelled() {
            self.set_state(ConnectorState::Connecting);

            let dialed = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                dialed = self.transport.connect() => dialed,
            };

            let mut session = match dialed {
                Ok(session) => session,
                Err(error) => {
                    TransportMetrics::record_dial_failure();
                    self.set_state(ConnectorState::Disconnected);
                    failures = failures.saturating_add(1);
                    warn!(
                        transport = %endpoint,
                        attempt = failures,
                        error = %error,
                        "Transport dial failed"
                    );
                    self.report_degradation(failures, &mut degradation_reported, &endpoint);
                    if !self.backoff(failures).await {
                        break;
                    }
                    continue;
                }
            };

            info!(transport = %endpoint, previous_failures = failures, "Transport session established");
            self.set_state(ConnectorState::Connected);
            TransportMetrics::record_connected(true);

            let (exit, stats) = self.drain(session.as_mut()).await;
            totals.absorb(stats);

            if exit == LoopExit::Cancelled {
                self.set_state(ConnectorState::ShuttingDown);
            }
            session.close().await;
            drop(session);
            TransportMetrics::record_connected(false);
            debug!(transport = %endpoint, received = stats.received, "Transport session closed");

            let LoopExit::SessionLost(error) = exit else {
                break;
            };
            self.set_state(ConnectorState::Disconnected);

            if stats.received > 0 {
                failures = 0;
                degradation_reported = false;
                info!(
                    transport = %endpoint,
                    error = %error,
                    received = stats.received,
                    "Transport session lost, reconnecting"
                );
            } else {
                failures = failures.saturating_add(1);
                warn!(
                    transport = %endpoint,
                    attempt = failures,
                    error = %error,
                    "Transport session lost before delivering any message"
                );
                self.report_degradation(failures, &mut degradation_reported, &endpoint);
                if !self.backoff(failures).await {
                    break;
                }
            }
        }

        self.set_state(ConnectorState::ShuttingDown);
        self.set_state(ConnectorState::Terminated);
        info!(
            transport = %endpoint,
            received = totals.received,
            invalidated = totals.invalidated,
            hard_failures = totals.hard_failures,
            "Transport connector terminated"
        );
        totals
    }

    /// Drive one session, turning a panic in message handling into a session loss.
    async fn drain(&self, session: &mut dyn ConsumerSession) -> (LoopExit, ConsumerStats) {
        let mut consumer = ConsumptionLoop::new(Arc::clone(&self.cache), self.shutdown.clone());
        let exit = AssertUnwindSafe(consumer.run(session)).catch_unwind().await;

        let exit = exit.unwrap_or_else(|payload| {
            let reason = payload
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(reason = %reason, "Consumption loop panicked, discarding session");
            LoopExit::SessionLost(TransportError::SessionLost(format!(
                "consumer panicked: {reason}"
            )))
        });

        (exit, consumer.stats())
    }

    /// Sleep before the next attempt. Returns `false` if shutdown interrupted the wait.
    async fn backoff(&self, failures: u32) -> bool {
        let delay = self.policy.delay_for_attempt(failures.saturating_sub(1));
        debug!(delay_ms = duration_millis(delay), attempt = failures, "Backing off before redial");

        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }

    fn report_degradation(&self, failures: u32, reported: &mut bool, endpoint: &str) {
        if !*reported && self.policy.is_degraded(failures) {
            *reported = true;
            error!(
                transport = %endpoint,
                consecutive_failures = failures,
                "Transport unavailable, cache invalidation is degraded; still retrying"
            );
        }
    }

    fn set_state(&self, next: ConnectorState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Connector state changed");
        }
    }
}

impl fmt::Debug for TransportConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConnector")
            .field("transport", &self.transport.describe())
            .field("policy", &self.policy)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
