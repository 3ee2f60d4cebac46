//! Authentication handlers.
//!
//! POST /auth/register — create a base-role user
//! POST /auth/login    — verify credentials, mint a bearer token
//! POST /auth/refresh  — renew a token close to expiry (auth)
//! GET  /auth/me       — the verified caller (auth)

use std::sync::Arc;

use axum::{Extension, Json};
use openpenpal_core::identity::Identity;
use openpenpal_core::ports::UserStore;
use openpenpal_core::user::User;
use serde::{Deserialize, Serialize};

use crate::api::error::AppError;
use crate::api::middleware::BearerToken;
use crate::api::response::ApiResponse;
use crate::api::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub school_code: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

pub async fn register(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<ApiResponse<User>>, AppError> {
    let user = state
        .auth
        .register(&req.username, &req.email, &req.password, &req.school_code)
        .await?;
    Ok(Json(ApiResponse::ok(user)))
}

pub async fn login(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiResponse<LoginResponse>>, AppError> {
    let (token, user) = state.auth.login(&req.username, &req.password).await?;
    Ok(Json(ApiResponse::ok(LoginResponse { token, user })))
}

pub async fn refresh(
    Extension(state): Extension<Arc<AppState>>,
    Extension(BearerToken(token)): Extension<BearerToken>,
) -> Result<Json<ApiResponse<TokenResponse>>, AppError> {
    let token = state.auth.refresh(&token)?;
    Ok(Json(ApiResponse::ok(TokenResponse { token })))
}

pub async fn me(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<ApiResponse<User>>, AppError> {
    let user = state.stores.users.get_user(identity.user_id).await?;
    Ok(Json(ApiResponse::ok(user)))
}
