//! Maps `CoreError` onto HTTP responses in the standard envelope.
//! Internal errors get a correlation id: the caller sees the id, the log
//! line carries the cause.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use openpenpal_core::error::CoreError;
use serde_json::json;
use uuid::Uuid;

pub struct AppError(pub CoreError);

impl From<CoreError> for AppError {
    fn from(e: CoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = self.0.app_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            let correlation = Uuid::new_v4();
            tracing::error!("internal error [{correlation}]: {}", self.0);
            format!("internal error (correlation {correlation})")
        } else {
            self.0.to_string()
        };
        let body = json!({
            "success": false,
            "error": message,
            "code": code,
        });
        (status, Json(body)).into_response()
    }
}
