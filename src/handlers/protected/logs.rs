use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Extension,
};

use crate::app::AppState;
use crate::auth::SCOPE_READ;
use crate::error::ApiError;
use crate::logs::{ErrorLogEntry, ErrorQuery};
use crate::middleware::{ApiResponse, ApiResult, AuthUser};

/// GET /api/logs/errors - Recorded request failures, newest first
///
/// Query: `code`, `user`, `since`, `until` (RFC 3339), `limit`, `offset`
pub async fn errors(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    query: Result<Query<ErrorQuery>, QueryRejection>,
) -> ApiResult<Vec<ErrorLogEntry>> {
    user.require(SCOPE_READ)?;
    let Query(query) = query?;

    if let (Some(since), Some(until)) = (query.since, query.until) {
        if since > until {
            return Err(ApiError::bad_request("'since' must not be after 'until'"));
        }
    }

    let entries = state.errors.query(query).await?;
    Ok(ApiResponse::success(entries))
}
