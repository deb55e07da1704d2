//! `POST /account`: every account operation behind one endpoint.
//!
//! The body's `type` field selects the operation; each operation touches the
//! user store once (twice for password reset, which also reads the record)
//! and only `requestPasswordReset` sends email. Requests are independent and
//! nothing is cached between them.

mod error;
mod reset_code;
#[cfg(test)]
mod tests;

pub use self::error::AccountError;
pub use self::reset_code::{RESET_CODE_LEN, RESET_SUBJECT};

use super::message_response;
use crate::api::{
    email::EmailSender,
    store::{InsertOutcome, UserRecord, UserStore},
};
use axum::{
    body::Bytes,
    extract::Extension,
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, field, info, instrument, warn, Span};
use utoipa::ToSchema;

const REQUEST_TYPES: [&str; 6] = [
    "login",
    "createUser",
    "changePassword",
    "changeEmail",
    "saveFrequencies",
    "requestPasswordReset",
];

/// Request body, tagged by `type`.
#[derive(ToSchema, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AccountRequest {
    Login {
        qra: String,
        password: String,
    },
    CreateUser {
        qra: String,
        password: String,
    },
    ChangePassword {
        qra: String,
        password: String,
        #[serde(rename = "newPassword")]
        new_password: String,
    },
    /// Unauthenticated: no password check.
    ChangeEmail {
        qra: String,
        #[serde(rename = "newEmail")]
        new_email: String,
    },
    SaveFrequencies {
        qra: String,
        #[schema(value_type = Object)]
        frequencies: Value,
    },
    RequestPasswordReset {
        qra: String,
        #[serde(default)]
        email: String,
    },
}

impl AccountRequest {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::CreateUser { .. } => "createUser",
            Self::ChangePassword { .. } => "changePassword",
            Self::ChangeEmail { .. } => "changeEmail",
            Self::SaveFrequencies { .. } => "saveFrequencies",
            Self::RequestPasswordReset { .. } => "requestPasswordReset",
        }
    }

    #[must_use]
    pub fn qra(&self) -> &str {
        match self {
            Self::Login { qra, .. }
            | Self::CreateUser { qra, .. }
            | Self::ChangePassword { qra, .. }
            | Self::ChangeEmail { qra, .. }
            | Self::SaveFrequencies { qra, .. }
            | Self::RequestPasswordReset { qra, .. } => qra,
        }
    }
}

/// Successful outcome of a request.
#[derive(Debug, PartialEq, Eq)]
pub enum AccountResponse {
    Record(StatusCode, UserRecord),
    Message(&'static str),
}

impl IntoResponse for AccountResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Record(status, record) => (status, Json(record)).into_response(),
            Self::Message(message) => message_response(StatusCode::OK, message),
        }
    }
}

/// Decode the body, telling an unknown discriminator apart from bad fields.
///
/// # Errors
/// `InvalidType` when the body has no known `type`, `Validation` otherwise.
pub fn parse_request(body: &[u8]) -> Result<AccountRequest, AccountError> {
    let value: Value = serde_json::from_slice(body).map_err(|_| AccountError::InvalidType)?;

    let known = value
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|kind| REQUEST_TYPES.contains(&kind));
    if !known {
        return Err(AccountError::InvalidType);
    }

    serde_json::from_value(value).map_err(|err| AccountError::Validation(err.to_string()))
}

/// Frequencies are opaque: strings are kept verbatim, anything else is stored
/// as compact JSON.
fn serialize_frequencies(frequencies: Value) -> String {
    match frequencies {
        Value::String(raw) => raw,
        other => other.to_string(),
    }
}

/// Run one request against the store (and mailer, for password reset).
///
/// # Errors
/// Returns the `AccountError` matching the failed precondition or dependency.
pub async fn dispatch(
    store: &dyn UserStore,
    mailer: &dyn EmailSender,
    request: AccountRequest,
) -> Result<AccountResponse, AccountError> {
    match request {
        AccountRequest::Login { qra, password } => login(store, &qra, &password).await,
        AccountRequest::CreateUser { qra, password } => create_user(store, qra, password).await,
        AccountRequest::ChangePassword {
            qra,
            password,
            new_password,
        } => change_password(store, &qra, &password, &new_password).await,
        AccountRequest::ChangeEmail { qra, new_email } => {
            change_email(store, &qra, &new_email).await
        }
        AccountRequest::SaveFrequencies { qra, frequencies } => {
            save_frequencies(store, &qra, &serialize_frequencies(frequencies)).await
        }
        AccountRequest::RequestPasswordReset { qra, email } => {
            request_password_reset(store, mailer, &qra, &email).await
        }
    }
}

async fn login(
    store: &dyn UserStore,
    qra: &str,
    password: &str,
) -> Result<AccountResponse, AccountError> {
    match store.find(qra).await? {
        Some(record) if record.password == password => {
            Ok(AccountResponse::Record(StatusCode::OK, record))
        }
        _ => Err(AccountError::AuthMismatch),
    }
}

async fn create_user(
    store: &dyn UserStore,
    qra: String,
    password: String,
) -> Result<AccountResponse, AccountError> {
    match store.insert(UserRecord::new(qra, password)).await? {
        InsertOutcome::Created(record) => {
            info!(qra = %record.qra, "user created");
            Ok(AccountResponse::Record(StatusCode::CREATED, record))
        }
        InsertOutcome::Conflict => Err(AccountError::Conflict),
    }
}

async fn change_password(
    store: &dyn UserStore,
    qra: &str,
    current: &str,
    new: &str,
) -> Result<AccountResponse, AccountError> {
    if store.change_password(qra, current, new).await? {
        Ok(AccountResponse::Message("Password changed"))
    } else {
        Err(AccountError::AuthMismatch)
    }
}

async fn change_email(
    store: &dyn UserStore,
    qra: &str,
    email: &str,
) -> Result<AccountResponse, AccountError> {
    if !store.set_email(qra, email).await? {
        warn!(qra, "email change matched no user");
    }
    Ok(AccountResponse::Message("Email changed"))
}

async fn save_frequencies(
    store: &dyn UserStore,
    qra: &str,
    frequencies: &str,
) -> Result<AccountResponse, AccountError> {
    if !store.set_frequencies(qra, frequencies).await? {
        warn!(qra, "frequency save matched no user");
    }
    Ok(AccountResponse::Message("Frequencies saved"))
}

async fn request_password_reset(
    store: &dyn UserStore,
    mailer: &dyn EmailSender,
    qra: &str,
    email: &str,
) -> Result<AccountResponse, AccountError> {
    if email.is_empty() {
        return Err(AccountError::AuthMismatch);
    }

    match store.find(qra).await? {
        Some(record) if record.email == email => {}
        _ => return Err(AccountError::AuthMismatch),
    }

    let code = reset_code::generate();
    if !store.set_password(qra, &code).await? {
        return Err(AccountError::AuthMismatch);
    }

    // The password is already replaced; a failed send leaves the account on
    // a code the operator never received.
    mailer
        .send(&reset_code::reset_email(email, qra, &code))
        .await
        .map_err(|err| {
            error!(qra, "password replaced but reset email failed");
            AccountError::Delivery(err)
        })?;

    info!(qra, "password reset code sent");

    Ok(AccountResponse::Message("Reset code sent"))
}

#[utoipa::path(
    post,
    path= "/account",
    request_body = AccountRequest,
    responses (
        (status = 200, description = "Login succeeded (user record) or update applied", body = UserRecord, content_type = "application/json"),
        (status = 201, description = "User created", body = UserRecord, content_type = "application/json"),
        (status = 400, description = "Unknown request type or missing fields"),
        (status = 401, description = "Credential or email check failed"),
        (status = 405, description = "Method other than POST"),
        (status = 409, description = "A user with this QRA already exists"),
        (status = 500, description = "User store or email delivery failed"),
    ),
    tag= "account"
)]
#[instrument(skip_all, fields(request_type = field::Empty, qra = field::Empty))]
pub async fn account(
    method: Method,
    store: Extension<Arc<dyn UserStore>>,
    mailer: Extension<Arc<dyn EmailSender>>,
    body: Bytes,
) -> Response {
    if method != Method::POST {
        return AccountError::MethodNotAllowed.into_response();
    }

    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(err) => return err.into_response(),
    };

    let span = Span::current();
    span.record("request_type", request.kind());
    span.record("qra", request.qra());

    match dispatch(store.0.as_ref(), mailer.0.as_ref(), request).await {
        Ok(response) => response.into_response(),
        Err(err) => err.into_response(),
    }
}
