//! Axum HTTP facade for Taskflow Analytics.
//!
//! Every request is a stateless read through the
//! [`AggregateResolver`](taskflow_analytics_core::AggregateResolver): a cached aggregate
//! is returned as is, a miss is recomputed from the record store and cached. The
//! background connector keeps the cache fresh; this crate only reads it.
//!
//! # Routes
//!
//! - `GET /health`: liveness
//! - `GET /ready`: transport state and cache size
//! - `GET /analytics/:owner`: `{owner, completed, pending}` with `X-Cache: HIT|MISS`
//! - `GET /metrics`: Prometheus text
//!
//! # Example
//!
//! ```ignore
//! use taskflow_analytics_web::{AppState, router};
//!
//! let state = AppState::new(resolver, connector.state(), metrics);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8003").await?;
//! axum::serve(listener, router(state)).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

// Re-export key types for convenience
pub use error::AppError;
pub use router::router;
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
