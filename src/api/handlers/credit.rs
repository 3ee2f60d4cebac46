//! Credit handlers.
//!
//! GET /credit/balance      — account snapshot
//! GET /credit/transactions — ledger entries, newest first
//! GET /credit/tasks        — the caller's queued/completed reward tasks

use std::sync::Arc;

use axum::{
    extract::Query,
    Extension, Json,
};
use openpenpal_core::credit::{CreditAccount, CreditTask, CreditTransaction};
use openpenpal_core::identity::Identity;
use openpenpal_core::ports::CreditTaskStore;
use serde::Deserialize;

use crate::api::error::AppError;
use crate::api::response::ApiResponse;
use crate::api::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    pub limit: Option<i64>,
}

pub async fn balance(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<ApiResponse<CreditAccount>>, AppError> {
    let account = state.ledger.balance(identity.user_id).await?;
    Ok(Json(ApiResponse::ok(account)))
}

pub async fn transactions(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<TransactionsQuery>,
) -> Result<Json<ApiResponse<Vec<CreditTransaction>>>, AppError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let txns = state.ledger.transactions(identity.user_id, limit).await?;
    Ok(Json(ApiResponse::ok(txns)))
}

pub async fn tasks(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<ApiResponse<Vec<CreditTask>>>, AppError> {
    let tasks = state
        .stores
        .credit_tasks
        .list_credit_tasks(identity.user_id)
        .await?;
    Ok(Json(ApiResponse::ok(tasks)))
}
