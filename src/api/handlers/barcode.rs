//! Barcode handlers.
//!
//! POST /barcode/bind           — bind a code to a letter, open a task
//! POST /barcode/scan           — courier/admin scan
//! GET  /barcode/:code          — current barcode state
//! GET  /barcode/:code/timeline — ordered scan events
//! POST /envelopes              — provision an envelope (admin)

use std::sync::Arc;

use axum::{
    extract::Path,
    http::HeaderMap,
    Extension, Json,
};
use openpenpal_core::error::CoreError;
use openpenpal_core::identity::Identity;
use openpenpal_core::letter::{Envelope, LetterCode};
use openpenpal_core::opcode::OpCode;
use openpenpal_core::ports::LetterStore;
use openpenpal_core::scan::{ScanEvent, ScanType};
use openpenpal_core::task::TaskPriority;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::AppError;
use crate::api::response::ApiResponse;
use crate::api::state::AppState;
use crate::barcode::ScanRequest;

#[derive(Debug, Deserialize)]
pub struct BindRequest {
    pub barcode_id: String,
    pub letter_id: Uuid,
    pub recipient_op_code: String,
    pub envelope_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ScanBody {
    pub barcode_id: String,
    pub scan_type: String,
    pub op_code: String,
    pub location: Option<String>,
    pub note: Option<String>,
}

pub async fn bind(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<BindRequest>,
) -> Result<Json<ApiResponse<LetterCode>>, AppError> {
    let recipient = OpCode::parse(&req.recipient_op_code)?;
    let bound = state
        .barcodes
        .bind(
            &identity,
            &req.barcode_id,
            req.letter_id,
            recipient.clone(),
            req.envelope_id,
        )
        .await?;

    // A letter with a known sender point gets a delivery task straight
    // away; otherwise the letter waits at a drop point for a direct scan.
    let letter = state.stores.letters.get_letter(req.letter_id).await?;
    if let Some(pickup) = letter.sender_op_code {
        state
            .dispatcher
            .create_task(&req.barcode_id, pickup, recipient, TaskPriority::Normal)
            .await?;
    }
    Ok(Json(ApiResponse::ok(bound)))
}

pub async fn scan(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    Json(req): Json<ScanBody>,
) -> Result<Json<ApiResponse<LetterCode>>, AppError> {
    let scan_type = ScanType::from_str(&req.scan_type)
        .filter(|t| *t != ScanType::Bind)
        .ok_or_else(|| {
            CoreError::Validation(format!(
                "scan_type must be one of pickup|transit|deliver|fail|cancel, got {}",
                req.scan_type
            ))
        })?;
    let courier = state.couriers.courier_for(&identity).await.ok();

    let request = ScanRequest {
        code: req.barcode_id.clone(),
        scan_type,
        op_code: OpCode::parse(&req.op_code)?,
        location: req.location,
        note: req.note,
        device: header_string(&headers, "x-device-id"),
        ip: header_string(&headers, "x-forwarded-for"),
    };
    let (updated, _event) = state
        .barcodes
        .scan(&identity, courier.as_ref(), request)
        .await?;
    Ok(Json(ApiResponse::ok(updated)))
}

pub async fn get_barcode(
    Extension(state): Extension<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<ApiResponse<LetterCode>>, AppError> {
    Ok(Json(ApiResponse::ok(state.barcodes.get(&code).await?)))
}

pub async fn timeline(
    Extension(state): Extension<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<ApiResponse<Vec<ScanEvent>>>, AppError> {
    Ok(Json(ApiResponse::ok(state.barcodes.timeline(&code).await?)))
}

#[derive(Debug, Deserialize)]
pub struct ProvisionEnvelopeRequest {
    pub user_id: Uuid,
    pub design: String,
}

pub async fn provision_envelope(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<ProvisionEnvelopeRequest>,
) -> Result<Json<ApiResponse<Envelope>>, AppError> {
    let envelope = state
        .barcodes
        .provision_envelope(&identity, req.user_id, &req.design)
        .await?;
    Ok(Json(ApiResponse::ok(envelope)))
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}
