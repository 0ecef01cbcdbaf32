//! The single translation point from [`CoreError`] to wire responses.
//!
//! Business errors keep HTTP 200 on the send path and carry their stable
//! code in the response envelope; system errors surface as HTTP 500 and
//! never leak a business code.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use courier_core::CoreError;

use super::dto::SendNotificationResponse;

/// Send-path failure: business errors ride the response envelope.
pub fn send_error_response(err: CoreError) -> axum::response::Response {
    match err.code() {
        Some(code) => (
            StatusCode::OK,
            Json(SendNotificationResponse::failed(code.as_str(), err.to_string())),
        )
            .into_response(),
        None => internal_error(err),
    }
}

/// Non-send endpoints: business errors are 4xx with the code in the body.
pub fn json_error_response(err: CoreError) -> axum::response::Response {
    match err.code() {
        Some(code) => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error_code": code.as_str(),
                "error_message": err.to_string(),
            })),
        )
            .into_response(),
        None => internal_error(err),
    }
}

pub fn internal_error(err: CoreError) -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": "internal",
            "message": err.to_string(),
        })),
    )
        .into_response()
}

pub fn not_found() -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error_code": "NOTIFICATION_NOT_FOUND",
            "error_message": "notification not found",
        })),
    )
        .into_response()
}
