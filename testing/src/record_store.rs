//! In-memory [`RecordStore`] for fast, deterministic tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use taskflow_analytics_core::{RecordStore, StoreError};

/// HashMap-backed record store.
///
/// Clones share state, so a test can keep one handle for scripting while the resolver
/// holds another.
///
/// # Example
///
/// ```
/// use taskflow_analytics_testing::InMemoryRecordStore;
/// use taskflow_analytics_core::RecordStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryRecordStore::new();
/// store.set_counts("alice", 3, 2);
///
/// assert_eq!(store.count_by_owner("alice", true).await?, 3);
/// assert_eq!(store.count_by_owner("alice", false).await?, 2);
/// assert_eq!(store.calls(), 2);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryRecordStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    counts: RwLock<HashMap<(String, bool), i64>>,
    failure: RwLock<Option<StoreError>>,
    latency: RwLock<Option<Duration>>,
    calls: AtomicUsize,
}

impl InMemoryRecordStore {
    /// Create an empty store. Unknown owners count as zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set both counts for `owner`.
    pub fn set_counts(&self, owner: &str, completed: i64, pending: i64) {
        let mut counts = self.inner.counts.write().unwrap();
        counts.insert((owner.to_string(), true), completed);
        counts.insert((owner.to_string(), false), pending);
    }

    /// Make every subsequent read fail with `error`.
    pub fn fail_with(&self, error: StoreError) {
        *self.inner.failure.write().unwrap() = Some(error);
    }

    /// Stop injecting failures.
    pub fn recover(&self) {
        *self.inner.failure.write().unwrap() = None;
    }

    /// Delay every read by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.write().unwrap() = Some(latency);
    }

    /// Number of `count_by_owner` calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }
}

impl RecordStore for InMemoryRecordStore {
    fn count_by_owner(
        &self,
        owner: &str,
        completed: bool,
    ) -> Pin<Box<dyn Future<Output = Result<i64, StoreError>> + Send + '_>> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);

        let latency = *self.inner.latency.read().unwrap();
        let failure = self.inner.failure.read().unwrap().clone();
        let count = self
            .inner
            .counts
            .read()
            .unwrap()
            .get(&(owner.to_string(), completed))
            .copied()
            .unwrap_or(0);

        Box::pin(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            failure.map_or(Ok(count), Err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_owner_counts_zero() {
        let store = InMemoryRecordStore::new();

        assert_eq!(store.count_by_owner("nobody", true).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn injected_failure_and_recovery() {
        let store = InMemoryRecordStore::new();
        store.set_counts("alice", 1, 0);
        store.fail_with(StoreError::Unavailable("down".into()));

        assert_eq!(
            store.count_by_owner("alice", true).await,
            Err(StoreError::Unavailable("down".into()))
        );

        store.recover();
        assert_eq!(store.count_by_owner("alice", true).await, Ok(1));
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn latency_delays_reads() {
        let store = InMemoryRecordStore::new();
        store.set_latency(Duration::from_secs(2));
        let started = tokio::time::Instant::now();

        store.count_by_owner("alice", true).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
