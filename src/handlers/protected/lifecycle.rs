use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Extension, Json,
};
use serde::Deserialize;

use crate::app::AppState;
use crate::auth::SCOPE_WRITE;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::registry::Module;

/// Body of activate, deactivate and rollback. A malformed body is answered
/// with the usual error envelope rather than axum's plain text rejection.
#[derive(Debug, Deserialize)]
pub struct VersionRequest {
    pub version: String,
}

/// POST /api/modules/:name/activate - `{ "version": "1.1.0" }`
pub async fn activate(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(name): Path<String>,
    body: Result<Json<VersionRequest>, JsonRejection>,
) -> ApiResult<Module> {
    user.require(SCOPE_WRITE)?;
    let Json(request) = body?;
    let module = state
        .registry
        .activate(&name, &request.version, &user.username)
        .await?;
    Ok(ApiResponse::success(module))
}

/// POST /api/modules/:name/deactivate
pub async fn deactivate(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(name): Path<String>,
    body: Result<Json<VersionRequest>, JsonRejection>,
) -> ApiResult<Module> {
    user.require(SCOPE_WRITE)?;
    let Json(request) = body?;
    let module = state
        .registry
        .deactivate(&name, &request.version, &user.username)
        .await?;
    Ok(ApiResponse::success(module))
}

/// POST /api/modules/:name/rollback
pub async fn rollback(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(name): Path<String>,
    body: Result<Json<VersionRequest>, JsonRejection>,
) -> ApiResult<Module> {
    user.require(SCOPE_WRITE)?;
    let Json(request) = body?;
    let module = state
        .registry
        .rollback(&name, &request.version, &user.username)
        .await?;
    Ok(ApiResponse::success(module))
}
