//! Exponential backoff between transport dial attempts.
//!
//! The connector retries forever, so the policy has no attempt limit. Instead it carries
//! a `degraded_after` threshold: once that many consecutive dials have failed the
//! connector reports permanent degradation (once) and keeps retrying at the ceiling.
//!
//! # Example
//!
//! ```rust
//! use taskflow_analytics_runtime::backoff::BackoffPolicy;
//! use std::time::Duration;
//!
//! let policy = BackoffPolicy::builder()
//!     .initial_delay(Duration::from_secs(1))
//!     .max_delay(Duration::from_secs(30))
//!     .multiplier(2.0)
//!     .degraded_after(5)
//!     .build();
//!
//! assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
//! assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
//! assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(30));
//! ```

use std::time::Duration;

/// Backoff configuration for reconnect attempts.
///
/// # Default Values
///
/// - `initial_delay`: 1 second
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0 (delay doubles each attempt)
/// - `degraded_after`: 5 consecutive failures
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
    /// Growth factor between attempts (never below 1.0)
    pub multiplier: f64,
    /// Consecutive failures before the transport is reported as degraded
    pub degraded_after: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl BackoffPolicy {
    /// Floor for `initial_delay`. A zero delay would redial a dead broker in a busy loop.
    pub const MIN_INITIAL_DELAY: Duration = Duration::from_millis(1);

    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> BackoffPolicyBuilder {
        BackoffPolicyBuilder {
            initial_delay: None,
            max_delay: None,
            multiplier: None,
            degraded_after: None,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (zero-based).
    ///
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`. Non-decreasing in
    /// `attempt`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether `consecutive_failures` has reached the degradation threshold.
    #[must_use]
    pub const fn is_degraded(&self, consecutive_failures: u32) -> bool {
        consecutive_failures >= self.degraded_after
    }
}

/// Builder for [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct BackoffPolicyBuilder {
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
    degraded_after: Option<u32>,
}

impl BackoffPolicyBuilder {
    /// Set the delay after the first failure.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set the delay ceiling.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set the growth factor.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Set the consecutive-failure count that triggers the degradation warning.
    #[must_use]
    pub const fn degraded_after(mut self, attempts: u32) -> Self {
        self.degraded_after = Some(attempts);
        self
    }

    /// Build the [`BackoffPolicy`].
    ///
    /// An initial delay below [`MIN_INITIAL_DELAY`](BackoffPolicy::MIN_INITIAL_DELAY) is
    /// raised to it, a ceiling below the initial delay is raised to it, and a multiplier
    /// below 1.0 (or not finite) is treated as 1.0, so delays never shrink.
    #[must_use]
    pub fn build(self) -> BackoffPolicy {
        let initial_delay = self
            .initial_delay
            .unwrap_or(Duration::from_secs(1))
            .max(BackoffPolicy::MIN_INITIAL_DELAY);
        let max_delay = self
            .max_delay
            .unwrap_or(Duration::from_secs(30))
            .max(initial_delay);
        let multiplier = self
            .multiplier
            .filter(|m| m.is_finite() && *m >= 1.0)
            .unwrap_or(if self.multiplier.is_some() { 1.0 } else { 2.0 });

        BackoffPolicy {
            initial_delay,
            max_delay,
            multiplier,
            degraded_after: self.degraded_after.unwrap_or(5).max(1),
        }
    }
}
