use axum::{
    extract::{Path, State},
    Extension,
};

use crate::app::AppState;
use crate::auth::SCOPE_WRITE;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::registry::Module;

/// POST /api/modules/:name/deploy - Start the current version
///
/// If the client disconnects while the runner call is pending, the attempt
/// is recorded as cancelled and the module keeps its previous deployed
/// state. A call that already finished is committed regardless.
pub async fn deploy(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(name): Path<String>,
) -> ApiResult<Module> {
    user.require(SCOPE_WRITE)?;
    Ok(ApiResponse::success(state.registry.deploy(&name, &user.username).await?))
}

/// DELETE /api/modules/:name/deploy - Stop the standing deployment
pub async fn undeploy(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(name): Path<String>,
) -> ApiResult<Module> {
    user.require(SCOPE_WRITE)?;
    Ok(ApiResponse::success(state.registry.undeploy(&name, &user.username).await?))
}
