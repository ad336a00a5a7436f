use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::app::AppState;
use crate::auth::{validate_jwt, Claims};
use crate::error::ApiError;

/// Authenticated operator extracted from JWT
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub username: String,
    pub scopes: Vec<String>,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            username: claims.sub,
            scopes: claims.scopes,
        }
    }
}

impl AuthUser {
    pub fn can(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// 403 unless the token carries `scope`
    pub fn require(&self, scope: &str) -> Result<(), ApiError> {
        if self.can(scope) {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!(
                "Not enough permissions. Required scope: {}",
                scope
            )))
        }
    }
}

/// JWT authentication middleware that validates tokens and extracts operator context
pub async fn jwt_auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // Extract JWT from Authorization header
    let token = extract_jwt_from_headers(&headers).map_err(ApiError::unauthorized)?;

    // Validate and decode JWT
    let claims = validate_jwt(&token, &state.config.security.jwt_secret)
        .map_err(|e| ApiError::unauthorized(e.to_string()))?;

    // Tokens outlive account removal; re-check the operator still exists
    if state.config.operator(&claims.sub).is_none() {
        return Err(ApiError::unauthorized("Unknown operator"));
    }

    let auth_user = AuthUser::from(claims);
    request.extensions_mut().insert(auth_user.clone());

    let mut response = next.run(request).await;
    // Expose the operator to outer layers (error log)
    response.extensions_mut().insert(auth_user);
    Ok(response)
}

/// Extract JWT token from Authorization header
fn extract_jwt_from_headers(headers: &HeaderMap) -> Result<String, String> {
    let auth_header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| "Missing Authorization header".to_string())?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| "Invalid Authorization header format".to_string())?;

    if let Some(token) = auth_str.strip_prefix("Bearer ") {
        if token.trim().is_empty() {
            return Err("Empty JWT token".to_string());
        }
        Ok(token.trim().to_string())
    } else {
        Err("Authorization header must use Bearer token format".to_string())
    }
}
