//! Standalone mailer endpoint: relays one caller-supplied HTML email.

use super::{error_response, message_response, method_not_allowed_response};
use crate::api::email::{EmailMessage, EmailSender};
use axum::{
    extract::Extension,
    http::{Method, StatusCode},
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResetEmail {
    email: String,
    subject: String,
    /// HTML body.
    body: String,
}

#[utoipa::path(
    post,
    path= "/send-reset-email",
    request_body = ResetEmail,
    responses (
        (status = 200, description = "Email sent", content_type = "application/json"),
        (status = 405, description = "Method other than POST"),
        (status = 500, description = "Body is not a valid email request or delivery failed"),
    ),
    tag= "email"
)]
#[instrument(skip(mailer, payload))]
pub async fn send_reset_email(
    method: Method,
    mailer: Extension<Arc<dyn EmailSender>>,
    payload: Option<Json<ResetEmail>>,
) -> Response {
    if method != Method::POST {
        return method_not_allowed_response();
    }

    let Some(Json(request)) = payload else {
        error!("Error sending email: invalid payload");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to send email");
    };

    let message = EmailMessage {
        to: request.email,
        subject: request.subject,
        html_body: request.body,
    };

    match mailer.send(&message).await {
        Ok(()) => {
            info!(to = %message.to, "email sent");
            message_response(StatusCode::OK, "Email sent")
        }
        Err(err) => {
            error!("Error sending email: {}", err);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to send email")
        }
    }
}
