//! The consumption loop: drain one live session into cache invalidations.
//!
//! ```text
//! loop {
//!     recv (raced against shutdown)
//!     decode
//!         Ok / soft failure  -> invalidate(owner)
//!         hard failure       -> log and skip
//!     ack
//! }
//! ```
//!
//! Messages of one session are handled strictly one after another, so the order the
//! transport delivers them in (per partition) is the order invalidations happen in.
//! Acknowledgement happens after invalidation was attempted, for every outcome. A crash
//! in between means redelivery, which is harmless because invalidation is idempotent.
//! A rejected acknowledgement is counted and skipped; one that reports the session as
//! lost ends the loop.
//!
//! The loop never returns an error. It ends with [`LoopExit::Cancelled`] on shutdown or
//! [`LoopExit::SessionLost`] when the session can no longer deliver; the connector
//! decides what happens next.

use crate::metrics::ConsumerMetrics;
use std::sync::Arc;
use taskflow_analytics_core::{
    AnalyticsCache, ConsumerSession, DecodeError, Delivery, DeliveryTag, TransportError, decode,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Why a [`ConsumptionLoop`] stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// Shutdown was signalled.
    Cancelled,
    /// The session failed and must be discarded.
    SessionLost(TransportError),
}

/// Counters for one run of the loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Messages received from the session
    pub received: u64,
    /// Invalidations performed (including soft decode failures)
    pub invalidated: u64,
    /// Messages dropped as malformed
    pub hard_failures: u64,
    /// Messages decoded with a missing optional field
    pub soft_failures: u64,
    /// Acknowledgements the transport rejected
    pub ack_failures: u64,
}

impl ConsumerStats {
    /// Add another run's counters to these.
    pub const fn absorb(&mut self, other: Self) {
        self.received += other.received;
        self.invalidated += other.invalidated;
        self.hard_failures += other.hard_failures;
        self.soft_failures += other.soft_failures;
        self.ack_failures += other.ack_failures;
    }
}

/// Receives, decodes, invalidates and acknowledges messages from one session.
#[derive(Debug)]
pub struct ConsumptionLoop {
    cache: Arc<AnalyticsCache>,
    shutdown: CancellationToken,
    stats: ConsumerStats,
}

impl ConsumptionLoop {
    /// Create a loop that invalidates entries in `cache` until `shutdown` fires.
    #[must_use]
    pub const fn new(cache: Arc<AnalyticsCache>, shutdown: CancellationToken) -> Self {
        Self {
            cache,
            shutdown,
            stats: ConsumerStats {
                received: 0,
                invalidated: 0,
                hard_failures: 0,
                soft_failures: 0,
                ack_failures: 0,
            },
        }
    }

    /// Counters accumulated so far.
    #[must_use]
    pub const fn stats(&self) -> ConsumerStats {
        self.stats
    }

    /// Drain `session` until shutdown or session loss.
    ///
    /// The session is not closed here; the caller owns it.
    pub async fn run(&mut self, session: &mut dyn ConsumerSession) -> LoopExit {
        loop {
            let delivery = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    debug!("Consumption loop cancelled");
                    return LoopExit::Cancelled;
                }
                received = session.recv() => match received {
                    Ok(delivery) => delivery,
                    Err(error) => {
                        warn!(error = %error, received = self.stats.received, "Session lost");
                        return LoopExit::SessionLost(error);
                    }
                },
            };

            if let Err(error) = self.process(session, delivery).await {
                warn!(error = %error, received = self.stats.received, "Session lost on acknowledgement");
                return LoopExit::SessionLost(error);
            }
        }
    }

    /// Handle one delivery. Fails only when acknowledging revealed a dead session.
    async fn process(
        &mut self,
        session: &mut dyn ConsumerSession,
        delivery: Delivery,
    ) -> Result<(), TransportError> {
        let Delivery { payload, key, tag } = delivery;
        self.stats.received += 1;
        ConsumerMetrics::record_received();

        match decode(&payload) {
            Ok(event) => {
                trace!(tag = %tag, kind = %event.kind(), owner = %event.owner(), "Change event decoded");
                self.invalidate(event.owner(), &tag);
            }
            Err(DecodeError::Hard { reason }) => {
                self.stats.hard_failures += 1;
                ConsumerMetrics::record_decode_failure("hard");
                warn!(
                    tag = %tag,
                    key = ?key,
                    reason = %reason,
                    "Dropping malformed change event"
                );
            }
            Err(error @ DecodeError::SoftFieldMissing { .. }) => {
                self.stats.soft_failures += 1;
                ConsumerMetrics::record_decode_failure("soft");
                debug!(tag = %tag, error = %error, "Change event partially decoded");
                if let Some(owner) = error.owner() {
                    self.invalidate(owner, &tag);
                }
            }
        }

        match session.ack(tag.clone()).await {
            Ok(()) => Ok(()),
            Err(error @ TransportError::SessionLost(_)) => Err(error),
            Err(error) => {
                self.stats.ack_failures += 1;
                ConsumerMetrics::record_ack_failure();
                warn!(tag = %tag, error = %error, "Failed to acknowledge message");
                Ok(())
            }
        }
    }

    fn invalidate(&mut self, owner: &str, tag: &DeliveryTag) {
        let removed = self.cache.invalidate(owner);
        self.stats.invalidated += 1;
        ConsumerMetrics::record_invalidation();
        debug!(tag = %tag, owner = %owner, removed, "Cache invalidated");
    }
}
