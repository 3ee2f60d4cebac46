//! Letter handlers.
//!
//! POST /letters     — create a draft
//! GET  /letters     — list the caller's letters
//! GET  /letters/:id — one letter (owner or admin)

use std::sync::Arc;

use axum::{
    extract::Path,
    Extension, Json,
};
use openpenpal_core::error::CoreError;
use openpenpal_core::identity::Identity;
use openpenpal_core::letter::{Letter, LetterVisibility};
use openpenpal_core::opcode::OpCode;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::AppError;
use crate::api::response::ApiResponse;
use crate::api::state::AppState;
use crate::letters::CreateLetter;

#[derive(Debug, Deserialize)]
pub struct CreateLetterRequest {
    pub title: Option<String>,
    pub content: String,
    pub style: Option<String>,
    #[serde(default)]
    pub visibility: Option<LetterVisibility>,
    pub sender_op_code: Option<String>,
    pub recipient_op_code: Option<String>,
}

fn parse_op_code(field: &str, value: Option<String>) -> Result<Option<OpCode>, CoreError> {
    value
        .map(|s| {
            OpCode::parse(&s)
                .map_err(|_| CoreError::Validation(format!("{field} is not a valid op-code: {s}")))
        })
        .transpose()
}

pub async fn create(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateLetterRequest>,
) -> Result<Json<ApiResponse<Letter>>, AppError> {
    let input = CreateLetter {
        title: req.title,
        content: req.content,
        style: req.style,
        visibility: req.visibility.unwrap_or(LetterVisibility::Private),
        sender_op_code: parse_op_code("sender_op_code", req.sender_op_code)?,
        recipient_op_code: parse_op_code("recipient_op_code", req.recipient_op_code)?,
    };
    let letter = state.letters.create_draft(&identity, input).await?;
    Ok(Json(ApiResponse::ok(letter)))
}

pub async fn list(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<ApiResponse<Vec<Letter>>>, AppError> {
    let letters = state.letters.list_own(&identity).await?;
    Ok(Json(ApiResponse::ok(letters)))
}

pub async fn get_letter(
    Extension(state): Extension<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Letter>>, AppError> {
    let letter = state.letters.get(&identity, id).await?;
    Ok(Json(ApiResponse::ok(letter)))
}
