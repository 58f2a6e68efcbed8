//! Health and readiness endpoints.
//!
//! Used by load balancers and orchestrators. Neither endpoint touches the record
//! store; transport loss is reported but never makes the service unready, since
//! aggregates are still served by reading through to the store.

use crate::state::AppState;
use axum::{Json, extract::State};
use serde::Serialize;

/// Liveness payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"`
    pub status: &'static str,
    /// Service name
    pub service: &'static str,
}

/// Simple health check endpoint (for basic liveness).
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
///
/// # Response
///
/// ```json
/// { "status": "ok", "service": "Analytics Service" }
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "Analytics Service",
    })
}

/// Readiness payload.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Always `true` once the listener is up
    pub ready: bool,
    /// Transport connector state, e.g. `"connected"`
    pub transport: &'static str,
    /// Owners with a cached aggregate
    pub cached_owners: usize,
}

/// Readiness check with transport and cache diagnostics.
///
/// # Endpoint
///
/// ```text
/// GET /ready
/// ```
///
/// # Response
///
/// ```json
/// { "ready": true, "transport": "connected", "cached_owners": 12 }
/// ```
#[allow(clippy::unused_async)]
pub async fn readiness_check(State(state): State<AppState>) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        ready: true,
        transport: state.transport_state().as_str(),
        cached_owners: state.resolver.cache().len(),
    })
}
