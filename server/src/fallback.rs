//! Stand-ins for collaborators whose configuration is unusable.
//!
//! A bad broker or database setting must not take the HTTP surface down with it. The
//! service starts with these in place and stays degraded until it is reconfigured:
//! the connector keeps backing off against an [`UnconfiguredTransport`], and every miss
//! against an [`UnconfiguredRecordStore`] answers 503.

use std::future::Future;
use std::pin::Pin;
use taskflow_analytics_core::transport::TransportFuture;
use taskflow_analytics_core::{ConsumerSession, RecordStore, StoreError, Transport, TransportError};

/// Transport whose every dial fails with the configuration error.
#[derive(Debug, Clone)]
pub struct UnconfiguredTransport {
    reason: String,
}

impl UnconfiguredTransport {
    /// Wrap the reason the real transport could not be built.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Transport for UnconfiguredTransport {
    fn connect(&self) -> TransportFuture<'_, Box<dyn ConsumerSession>> {
        let error = TransportError::DialFailed(format!("Transport not configured: {}", self.reason));
        Box::pin(async move { Err(error) })
    }

    fn describe(&self) -> String {
        "unconfigured".to_string()
    }
}

/// Record store whose every read fails as unavailable.
#[derive(Debug, Clone)]
pub struct UnconfiguredRecordStore {
    reason: String,
}

impl UnconfiguredRecordStore {
    /// Wrap the reason the real store could not be built.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl RecordStore for UnconfiguredRecordStore {
    fn count_by_owner(
        &self,
        _owner: &str,
        _completed: bool,
    ) -> Pin<Box<dyn Future<Output = Result<i64, StoreError>> + Send + '_>> {
        let error = StoreError::Unavailable(format!("Record store not configured: {}", self.reason));
        Box::pin(async move { Err(error) })
    }
}
