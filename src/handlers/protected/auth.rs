use axum::Extension;
use serde::Serialize;

use crate::middleware::{ApiResponse, ApiResult, AuthUser};

#[derive(Debug, Serialize)]
pub struct WhoAmI {
    pub username: String,
    pub scopes: Vec<String>,
}

/// GET /api/auth/whoami - Operator behind the current token
pub async fn whoami(Extension(user): Extension<AuthUser>) -> ApiResult<WhoAmI> {
    Ok(ApiResponse::success(WhoAmI {
        username: user.username,
        scopes: user.scopes,
    }))
}
