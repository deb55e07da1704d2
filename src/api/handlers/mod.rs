//! Route handlers.
//!
//! Every handler answers with JSON: `{"message": ...}` on success,
//! `{"error": ...}` on failure, or the user record where one is returned.

pub mod account;
pub mod health;
pub mod send_reset_email;

use axum::{
    http::{header::ALLOW, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

pub(crate) fn message_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

pub(crate) fn error_response(status: StatusCode, error: &str) -> Response {
    (status, Json(json!({ "error": error }))).into_response()
}

/// `405` for POST-only routes, with the matching `Allow` header.
pub(crate) fn method_not_allowed_response() -> Response {
    let mut response = error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    response
        .headers_mut()
        .insert(ALLOW, HeaderValue::from_static("POST"));
    response
}
