//! Axum middleware for cross-origin access, request ids and request tracing.
//!
//! Layer order, outermost first:
//!
//! 1. **Set request id**: generate a UUID `x-request-id` unless the caller sent one
//! 2. **Propagate request id**: copy it onto the response
//! 3. **CORS**: any origin, method and header; `Content-Length` exposed
//! 4. **Trace**: one span per request carrying the request id
//!
//! The CORS layer answers every `OPTIONS` request itself with an empty 200, so handlers
//! never see one.

use axum::{
    extract::Request,
    http::{HeaderName, header},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::Span;

/// Header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Permissive CORS: browsers on any origin may call the API.
///
/// Credentials are not allowed, as browsers reject them alongside a wildcard origin.
#[must_use]
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::CONTENT_LENGTH])
}

/// Assign a UUID request id to requests that arrive without one.
#[must_use]
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(HeaderName::from_static(REQUEST_ID_HEADER), MakeRequestUuid)
}

/// Echo the request id on the response.
#[must_use]
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(HeaderName::from_static(REQUEST_ID_HEADER))
}

/// Span for one HTTP request, tagged with its request id.
pub fn make_request_span(request: &Request) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");

    tracing::info_span!(
        "http_request",
        method = %request.method(),
        uri = %request.uri(),
        request_id = %request_id,
    )
}
