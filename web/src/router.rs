//! Route table and middleware stack.

use crate::error::AppError;
use crate::handlers;
use crate::middleware;
use crate::state::AppState;
use axum::{Router, http::Uri, routing::get};
use tower_http::trace::TraceLayer;

/// Build the service router.
///
/// | Method | Path                | Handler                            |
/// |--------|---------------------|------------------------------------|
/// | GET    | `/health`           | [`handlers::health_check`]         |
/// | GET    | `/ready`            | [`handlers::readiness_check`]      |
/// | GET    | `/analytics/:owner` | [`handlers::owner_analytics`]      |
/// | GET    | `/metrics`          | [`handlers::prometheus_metrics`]   |
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/analytics/:owner", get(handlers::owner_analytics))
        .route("/metrics", get(handlers::prometheus_metrics))
        .fallback(route_not_found)
        .layer(TraceLayer::new_for_http().make_span_with(middleware::make_request_span))
        .layer(middleware::cors_layer())
        .layer(middleware::propagate_request_id_layer())
        .layer(middleware::set_request_id_layer())
        .with_state(state)
}

#[allow(clippy::unused_async)]
async fn route_not_found(uri: Uri) -> AppError {
    AppError::not_found(format!("No route for {}", uri.path()))
}
