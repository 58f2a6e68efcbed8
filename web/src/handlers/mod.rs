//! HTTP request handlers.

pub mod analytics;
pub mod health;
pub mod metrics;

pub use analytics::owner_analytics;
pub use health::{health_check, readiness_check};
pub use metrics::prometheus_metrics;
