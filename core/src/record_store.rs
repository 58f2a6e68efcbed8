//! The narrow read capability the resolver needs from the backing store.
//!
//! The analytics service never writes todos. All it needs is "how many todos does this
//! owner have with this completion status", so that is the whole trait.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Errors a [`RecordStore`] read can fail with.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The read did not finish within the configured bound.
    #[error("Store read timed out after {after:?}")]
    Timeout {
        /// The bound that was exceeded
        after: Duration,
    },

    /// The store could not be reached (connection refused, pool exhausted, ...).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Any other failure reported by the store.
    #[error("Store error: {0}")]
    Other(String),
}

impl StoreError {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Unavailable(_) => "unavailable",
            Self::Other(_) => "other",
        }
    }
}

/// Read access to the todo records shared with the rest of the application.
///
/// # Dyn Compatibility
///
/// Returns `Pin<Box<dyn Future>>` instead of using `async fn` so the resolver can hold an
/// `Arc<dyn RecordStore>` and tests can swap in an in-memory store.
pub trait RecordStore: Send + Sync {
    /// Count the records owned by `owner` whose completion flag equals `completed`.
    ///
    /// Must be idempotent and side-effect free; the resolver may issue it concurrently
    /// for both values of `completed`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store cannot answer.
    fn count_by_owner(
        &self,
        owner: &str,
        completed: bool,
    ) -> Pin<Box<dyn Future<Output = Result<i64, StoreError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_are_stable_labels() {
        assert_eq!(
            StoreError::Timeout {
                after: Duration::from_secs(5)
            }
            .kind(),
            "timeout"
        );
        assert_eq!(StoreError::Unavailable("down".into()).kind(), "unavailable");
        assert_eq!(StoreError::Other("boom".into()).kind(), "other");
    }

    #[test]
    fn timeout_message_names_the_bound() {
        let err = StoreError::Timeout {
            after: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "Store read timed out after 250ms");
    }
}
