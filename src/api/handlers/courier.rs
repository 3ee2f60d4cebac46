//! Courier handlers.
//!
//! GET  /courier/tasks                    — tasks visible to the caller
//! PUT  /courier/tasks/:id/accept|reject  — assignment responses
//! PUT  /courier/tasks/:id/collect        — pickup scan for the task
//! PUT  /courier/tasks/:id/deliver        — delivery scan for the task
//! GET  /courier/subordinates             — one level below, same scope
//! GET  /courier/stats                    — aggregate counters
//! POST /courier/register                 — sponsor a new courier
//! POST /courier/approve/:id              — approve a pending courier

use std::sync::Arc;

use axum::{
    extract::Path,
    Extension, Json,
};
use openpenpal_core::courier::{Courier, CourierStats};
use openpenpal_core::identity::Identity;
use openpenpal_core::letter::LetterCode;
use openpenpal_core::opcode::Prefix;
use openpenpal_core::scan::ScanType;
use openpenpal_core::task::CourierTask;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::AppError;
use crate::api::response::ApiResponse;
use crate::api::state::AppState;
use crate::barcode::ScanRequest;

#[derive(Debug, Deserialize)]
pub struct RegisterCourierRequest {
    pub user_id: Uuid,
    pub level: u8,
    pub prefix: String,
}

pub async fn register(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<RegisterCourierRequest>,
) -> Result<Json<ApiResponse<Courier>>, AppError> {
    let prefix = Prefix::parse(&req.prefix)?;
    let courier = state
        .couriers
        .register_courier(&identity, req.user_id, req.level, prefix)
        .await?;
    Ok(Json(ApiResponse::ok_with_message(
        courier,
        "courier registered, awaiting approval",
    )))
}

pub async fn approve(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Courier>>, AppError> {
    let courier = state.couriers.approve_courier(&identity, id).await?;
    Ok(Json(ApiResponse::ok(courier)))
}

pub async fn subordinates(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<ApiResponse<Vec<Courier>>>, AppError> {
    let subs = state.couriers.list_subordinates(&identity).await?;
    Ok(Json(ApiResponse::ok(subs)))
}

pub async fn stats(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<ApiResponse<CourierStats>>, AppError> {
    let stats = state.couriers.stats(&identity).await?;
    Ok(Json(ApiResponse::ok(stats)))
}

pub async fn tasks(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<ApiResponse<Vec<CourierTask>>>, AppError> {
    let courier = state.couriers.courier_for(&identity).await?;
    let tasks = state.dispatcher.list_visible(&courier).await?;
    Ok(Json(ApiResponse::ok(tasks)))
}

pub async fn accept(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CourierTask>>, AppError> {
    let courier = state.couriers.courier_for(&identity).await?;
    let task = state.dispatcher.accept(&courier, id).await?;
    Ok(Json(ApiResponse::ok(task)))
}

pub async fn reject(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<CourierTask>>, AppError> {
    let courier = state.couriers.courier_for(&identity).await?;
    let task = state.dispatcher.reject(&courier, id).await?;
    Ok(Json(ApiResponse::ok(task)))
}

/// Collect = pickup scan at the task's pickup point. Task state follows
/// through the `letter.status.changed` projection.
pub async fn collect(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<LetterCode>>, AppError> {
    scan_for_task(&state, &identity, id, ScanType::Pickup).await
}

/// Deliver = delivery scan against the bound recipient code.
pub async fn deliver(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<LetterCode>>, AppError> {
    scan_for_task(&state, &identity, id, ScanType::Deliver).await
}

async fn scan_for_task(
    state: &Arc<AppState>,
    identity: &Identity,
    task_id: Uuid,
    scan_type: ScanType,
) -> Result<Json<ApiResponse<LetterCode>>, AppError> {
    let courier = state.couriers.courier_for(identity).await?;
    let task = state
        .dispatcher
        .get_task_for(identity, &courier, task_id)
        .await?;
    let op_code = match scan_type {
        ScanType::Deliver => task.delivery_op_code.clone(),
        _ => task.pickup_op_code.clone(),
    };
    let (updated, _event) = state
        .barcodes
        .scan(
            identity,
            Some(&courier),
            ScanRequest {
                code: task.letter_code.clone(),
                scan_type,
                op_code,
                location: None,
                note: None,
                device: None,
                ip: None,
            },
        )
        .await?;
    Ok(Json(ApiResponse::ok(updated)))
}
