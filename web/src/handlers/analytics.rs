//! Per-owner analytics.

use crate::WebResult;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use taskflow_analytics_core::Aggregate;

/// Response header telling the caller whether the aggregate came from the cache.
pub const X_CACHE: &str = "x-cache";

/// Completed and pending counts for one owner.
///
/// # Endpoint
///
/// ```text
/// GET /analytics/{owner}
/// ```
///
/// # Response
///
/// ```json
/// { "owner": "alice", "completed": 3, "pending": 2 }
/// ```
///
/// with `X-Cache: HIT` or `X-Cache: MISS`.
///
/// # Errors
///
/// Store failures map to 504 (timeout), 503 (unavailable) or 500; see
/// [`AppError`](crate::AppError)'s `From<StoreError>`.
#[tracing::instrument(skip(state))]
pub async fn owner_analytics(
    State(state): State<AppState>,
    Path(owner): Path<String>,
) -> WebResult<([(&'static str, &'static str); 1], Json<Aggregate>)> {
    let (aggregate, status) = state.resolver.resolve_with_status(&owner).await?;

    Ok(([(X_CACHE, status.as_str())], Json(aggregate)))
}
