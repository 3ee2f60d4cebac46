//! Bearer-token middleware. Validates the token, resolves the identity,
//! and injects it into request extensions. Handlers extract
//! `Extension<Identity>`; core logic never sees a raw token.

use std::sync::Arc;

use axum::{
    extract::Request,
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use openpenpal_core::error::CoreError;
use openpenpal_core::identity::Identity;

use crate::api::error::AppError;
use crate::api::state::AppState;

/// The raw bearer string, kept around for the refresh endpoint.
#[derive(Clone)]
pub struct BearerToken(pub String);

pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, Response> {
    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .cloned()
        .ok_or_else(|| {
            AppError(CoreError::Internal(anyhow::anyhow!(
                "app state not initialized"
            )))
            .into_response()
        })?;

    let token = bearer_from(&req).map_err(|e| AppError(e).into_response())?;
    let claims = state
        .auth
        .verify(&token)
        .map_err(|e| AppError(e).into_response())?;

    let identity: Identity = claims.identity();
    req.extensions_mut().insert(identity);
    req.extensions_mut().insert(claims);
    req.extensions_mut().insert(BearerToken(token));
    Ok(next.run(req).await)
}

fn bearer_from(req: &Request) -> Result<String, CoreError> {
    let header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| CoreError::Unauthorized("missing Authorization header".into()))?;
    header
        .strip_prefix("Bearer ")
        .map(|t| t.to_string())
        .ok_or_else(|| {
            CoreError::Unauthorized("expected 'Authorization: Bearer <token>'".into())
        })
}
