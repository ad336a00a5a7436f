// handlers/public/auth.rs - POST /auth/login handler

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::auth::{generate_jwt, verify_password, Claims};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub username: String,
    pub scopes: Vec<String>,
    pub expires_in: u64,
}

/// POST /auth/login - Exchange operator credentials for a JWT
///
/// Expected Input:
/// ```json
/// { "username": "admin", "password": "..." }
/// ```
///
/// Unknown users and wrong passwords get the same 401.
pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<LoginResponse> {
    let Json(request) = body?;
    let username = request.username.trim();
    if username.is_empty() || request.password.is_empty() {
        return Err(ApiError::bad_request("username and password are required"));
    }

    let security = &state.config.security;
    let account = state
        .config
        .operator(username)
        .filter(|account| verify_password(&account.password_hash, &request.password))
        .ok_or_else(|| {
            tracing::warn!(username, "Rejected login");
            ApiError::unauthorized("Invalid username or password")
        })?;

    let claims = Claims::new(account.username.clone(), account.scopes.clone(), security.jwt_expiry_hours);
    let token = generate_jwt(&claims, &security.jwt_secret).map_err(|e| {
        tracing::error!("Token generation failed: {}", e);
        ApiError::internal_server_error("Could not issue token")
    })?;

    tracing::info!(username, "Operator logged in");
    Ok(ApiResponse::success(LoginResponse {
        token,
        username: account.username.clone(),
        scopes: account.scopes.clone(),
        expires_in: security.jwt_expiry_hours * 3600,
    }))
}
