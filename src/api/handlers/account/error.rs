use crate::api::handlers::{error_response, method_not_allowed_response};
use crate::api::email::DeliveryError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

/// Fixed message returned for store and mail failures.
const INTERNAL_ERROR: &str = "Internal server error";

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// Body is not JSON, has no `type`, or names an unknown one.
    #[error("Invalid request type")]
    InvalidType,

    /// Known `type` with missing or mistyped fields.
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Invalid credentials")]
    AuthMismatch,

    #[error("User already exists")]
    Conflict,

    #[error("user store failure: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("email delivery failure: {0}")]
    Delivery(#[from] DeliveryError),
}

impl AccountError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::InvalidType | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::AuthMismatch => StatusCode::UNAUTHORIZED,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Store(_) | Self::Delivery(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AccountError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::Store(_) | Self::Delivery(_) => {
                // Details stay in the log; callers get a generic message.
                error!("{}", self);
                error_response(status, INTERNAL_ERROR)
            }
            Self::MethodNotAllowed => method_not_allowed_response(),
            _ => error_response(status, &self.to_string()),
        }
    }
}
