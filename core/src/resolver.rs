//! Cache-aside lookup of per-owner aggregates.

use crate::cache::{Aggregate, AnalyticsCache};
use crate::record_store::{RecordStore, StoreError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Whether a lookup was served from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from the cache, no store read.
    Hit,
    /// Recomputed from the store.
    Miss,
}

impl CacheStatus {
    /// Header value (`HIT` / `MISS`).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answers aggregate queries from the cache, falling back to the [`RecordStore`].
///
/// On a miss the completed and pending counts are read concurrently and the result is
/// written back through a [`FillTicket`](crate::cache::FillTicket), so a change event
/// arriving mid-read is never overwritten by the stale result. Failures are returned to
/// the caller and never cached.
#[derive(Clone)]
pub struct AggregateResolver {
    cache: Arc<AnalyticsCache>,
    store: Arc<dyn RecordStore>,
    timeout: Duration,
}

impl AggregateResolver {
    /// Bound on the whole miss path unless overridden.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a resolver over `cache` backed by `store`.
    #[must_use]
    pub fn new(cache: Arc<AnalyticsCache>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            cache,
            store,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Override the store read bound.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The cache this resolver fills.
    #[must_use]
    pub const fn cache(&self) -> &Arc<AnalyticsCache> {
        &self.cache
    }

    /// Aggregate for `owner`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the store read fails or exceeds the timeout.
    pub async fn resolve(&self, owner: &str) -> Result<Aggregate, StoreError> {
        self.resolve_with_status(owner)
            .await
            .map(|(aggregate, _)| aggregate)
    }

    /// Aggregate for `owner`, together with whether it came from the cache.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the store read fails or exceeds the timeout.
    pub async fn resolve_with_status(
        &self,
        owner: &str,
    ) -> Result<(Aggregate, CacheStatus), StoreError> {
        if let Some(aggregate) = self.cache.get(owner) {
            metrics::counter!("analytics_cache_lookups_total", "result" => "hit").increment(1);
            tracing::debug!(owner = %owner, "Cache hit");
            return Ok((aggregate, CacheStatus::Hit));
        }

        metrics::counter!("analytics_cache_lookups_total", "result" => "miss").increment(1);
        let ticket = self.cache.ticket(owner);

        let aggregate = match self.read_counts(owner).await {
            Ok(aggregate) => aggregate,
            Err(error) => {
                metrics::counter!("analytics_store_errors_total", "kind" => error.kind())
                    .increment(1);
                tracing::warn!(owner = %owner, error = %error, "Aggregate read failed");
                return Err(error);
            }
        };

        let stored = self.cache.put_if_fresh(ticket, aggregate.clone());
        tracing::debug!(
            owner = %owner,
            completed = aggregate.completed,
            pending = aggregate.pending,
            stored,
            "Cache miss resolved"
        );

        Ok((aggregate, CacheStatus::Miss))
    }

    async fn read_counts(&self, owner: &str) -> Result<Aggregate, StoreError> {
        let reads = futures::future::try_join(
            self.store.count_by_owner(owner, true),
            self.store.count_by_owner(owner, false),
        );

        let started = Instant::now();
        let (completed, pending) = tokio::time::timeout(self.timeout, reads)
            .await
            .map_err(|_| StoreError::Timeout {
                after: self.timeout,
            })??;
        metrics::histogram!("analytics_store_read_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        Ok(Aggregate::new(owner, completed, pending))
    }
}

impl fmt::Debug for AggregateResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateResolver")
            .field("cached_owners", &self.cache.len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
