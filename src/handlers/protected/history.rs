use axum::{
    extract::{Path, State},
    Extension,
};

use crate::app::AppState;
use crate::auth::SCOPE_READ;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::registry::HistoryEntry;

/// GET /api/modules/:name/history - Audit trail, oldest first. Still
/// answers after the module has been deleted.
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(name): Path<String>,
) -> ApiResult<Vec<HistoryEntry>> {
    user.require(SCOPE_READ)?;
    Ok(ApiResponse::success(state.registry.history(&name).await?))
}
