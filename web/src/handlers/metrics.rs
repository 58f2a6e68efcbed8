//! Prometheus scrape endpoint.

use crate::WebResult;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};

/// Render metrics in Prometheus text format.
///
/// # Errors
///
/// Returns 404 when no recorder was installed (`METRICS_ENABLED=false`).
#[allow(clippy::unused_async)]
pub async fn prometheus_metrics(State(state): State<AppState>) -> WebResult<Response> {
    let body = state
        .metrics
        .render()
        .ok_or_else(|| AppError::not_found("Metrics are disabled"))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}
