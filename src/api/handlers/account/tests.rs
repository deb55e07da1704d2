//! Account dispatcher tests against in-memory doubles.

use super::{parse_request, AccountError, RESET_CODE_LEN, RESET_SUBJECT};
use crate::api::{
    email::{DeliveryError, EmailMessage, EmailSender},
    router,
    store::{InsertOutcome, UserRecord, UserStore},
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header::CONTENT_TYPE, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use tower::ServiceExt;

#[derive(Default)]
struct MemoryStore {
    users: Mutex<HashMap<String, UserRecord>>,
    calls: AtomicUsize,
    fail_updates: bool,
}

impl MemoryStore {
    fn with_user(record: UserRecord) -> Self {
        let store = Self::default();
        store.put(record);
        store
    }

    /// Lookups succeed but every update fails.
    fn with_failing_updates(record: UserRecord) -> Self {
        let store = Self {
            fail_updates: true,
            ..Self::default()
        };
        store.put(record);
        store
    }

    fn put(&self, record: UserRecord) {
        if let Ok(mut users) = self.users.lock() {
            users.insert(record.qra.clone(), record);
        }
    }

    fn get(&self, qra: &str) -> Option<UserRecord> {
        self.users.lock().ok()?.get(qra).cloned()
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn update(&self, qra: &str, apply: impl FnOnce(&mut UserRecord) -> bool) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_updates {
            return Err(anyhow!("connection reset"));
        }
        let mut users = self.users.lock().map_err(|_| anyhow!("poisoned"))?;
        Ok(users.get_mut(qra).is_some_and(apply))
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find(&self, qra: &str) -> Result<Option<UserRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let users = self.users.lock().map_err(|_| anyhow!("poisoned"))?;
        Ok(users.get(qra).cloned())
    }

    async fn insert(&self, record: UserRecord) -> Result<InsertOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut users = self.users.lock().map_err(|_| anyhow!("poisoned"))?;
        if users.contains_key(&record.qra) {
            return Ok(InsertOutcome::Conflict);
        }
        users.insert(record.qra.clone(), record.clone());
        Ok(InsertOutcome::Created(record))
    }

    async fn change_password(&self, qra: &str, current: &str, new: &str) -> Result<bool> {
        self.update(qra, |record| {
            if record.password == current {
                record.password = new.to_string();
                true
            } else {
                false
            }
        })
    }

    async fn set_password(&self, qra: &str, password: &str) -> Result<bool> {
        self.update(qra, |record| {
            record.password = password.to_string();
            true
        })
    }

    async fn set_email(&self, qra: &str, email: &str) -> Result<bool> {
        self.update(qra, |record| {
            record.email = email.to_string();
            true
        })
    }

    async fn set_frequencies(&self, qra: &str, frequencies: &str) -> Result<bool> {
        self.update(qra, |record| {
            record.frequencies = frequencies.to_string();
            true
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Store whose every call fails, as an unreachable database would.
struct BrokenStore;

#[async_trait]
impl UserStore for BrokenStore {
    async fn find(&self, _qra: &str) -> Result<Option<UserRecord>> {
        Err(anyhow!("connection refused"))
    }

    async fn insert(&self, _record: UserRecord) -> Result<InsertOutcome> {
        Err(anyhow!("connection refused"))
    }

    async fn change_password(&self, _qra: &str, _current: &str, _new: &str) -> Result<bool> {
        Err(anyhow!("connection refused"))
    }

    async fn set_password(&self, _qra: &str, _password: &str) -> Result<bool> {
        Err(anyhow!("connection refused"))
    }

    async fn set_email(&self, _qra: &str, _email: &str) -> Result<bool> {
        Err(anyhow!("connection refused"))
    }

    async fn set_frequencies(&self, _qra: &str, _frequencies: &str) -> Result<bool> {
        Err(anyhow!("connection refused"))
    }

    async fn ping(&self) -> Result<()> {
        Err(anyhow!("connection refused"))
    }
}

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<EmailMessage>>,
    fail: bool,
}

impl RecordingSender {
    fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EmailSender for RecordingSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), DeliveryError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.clone());
        }
        if self.fail {
            Err(DeliveryError::NotConfigured)
        } else {
            Ok(())
        }
    }
}

fn app(store: Arc<dyn UserStore>, mailer: Arc<dyn EmailSender>) -> Router {
    router(store, mailer)
}

fn record(qra: &str, password: &str, email: &str) -> UserRecord {
    UserRecord {
        qra: qra.to_string(),
        password: password.to_string(),
        email: email.to_string(),
        frequencies: "[]".to_string(),
    }
}

async fn post(app: Router, body: Value) -> Result<(StatusCode, Value)> {
    post_raw(app, body.to_string()).await
}

async fn post_raw(app: Router, body: String) -> Result<(StatusCode, Value)> {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/account")
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body))?,
        )
        .await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let payload: Value = serde_json::from_slice(&bytes)?;
    Ok((status, payload))
}

#[test]
fn parse_request_rejects_unknown_type() {
    let result = parse_request(br#"{"type":"deleteUser","qra":"PY2ABC"}"#);
    assert!(matches!(result, Err(AccountError::InvalidType)));
}

#[test]
fn parse_request_rejects_missing_type_and_non_json() {
    assert!(matches!(
        parse_request(br#"{"qra":"PY2ABC"}"#),
        Err(AccountError::InvalidType)
    ));
    assert!(matches!(
        parse_request(b"qra=PY2ABC"),
        Err(AccountError::InvalidType)
    ));
    assert!(matches!(
        parse_request(br#"{"type":42}"#),
        Err(AccountError::InvalidType)
    ));
}

#[test]
fn parse_request_reports_missing_fields() {
    let result = parse_request(br#"{"type":"login","qra":"PY2ABC"}"#);
    assert!(matches!(result, Err(AccountError::Validation(ref msg)) if msg.contains("password")));
}

#[test]
fn parse_request_accepts_camel_case_fields() {
    let result = parse_request(
        br#"{"type":"changePassword","qra":"PY2ABC","password":"old","newPassword":"new"}"#,
    );
    assert!(matches!(result, Ok(ref request) if request.kind() == "changePassword"));
}

#[tokio::test]
async fn create_then_login_round_trip() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    let mailer = Arc::new(RecordingSender::default());

    let (status, body) = post(
        app(store.clone(), mailer.clone()),
        json!({"type": "createUser", "qra": "PY2ABC", "password": "s3cr3t"}),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        body,
        json!({"qra": "PY2ABC", "password": "s3cr3t", "email": "", "frequencies": "[]"})
    );

    let (status, body) = post(
        app(store.clone(), mailer.clone()),
        json!({"type": "login", "qra": "PY2ABC", "password": "s3cr3t"}),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"qra": "PY2ABC", "password": "s3cr3t", "email": "", "frequencies": "[]"})
    );

    let (status, body) = post(
        app(store, mailer),
        json!({"type": "login", "qra": "PY2ABC", "password": "wrong"}),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.get("qra").is_none());
    assert_eq!(body, json!({"error": "Invalid credentials"}));
    Ok(())
}

#[tokio::test]
async fn login_unknown_qra_is_unauthorized() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    let (status, _) = post(
        app(store, Arc::new(RecordingSender::default())),
        json!({"type": "login", "qra": "PY9ZZZ", "password": "x"}),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn duplicate_create_conflicts_and_keeps_record() -> Result<()> {
    let store = Arc::new(MemoryStore::with_user(record(
        "PY2ABC",
        "original",
        "op@example.com",
    )));

    let (status, body) = post(
        app(store.clone(), Arc::new(RecordingSender::default())),
        json!({"type": "createUser", "qra": "PY2ABC", "password": "other"}),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body, json!({"error": "User already exists"}));
    assert_eq!(
        store.get("PY2ABC"),
        Some(record("PY2ABC", "original", "op@example.com"))
    );
    Ok(())
}

#[tokio::test]
async fn change_password_requires_current_password() -> Result<()> {
    let store = Arc::new(MemoryStore::with_user(record("PY2ABC", "old", "")));
    let mailer = Arc::new(RecordingSender::default());

    let (status, _) = post(
        app(store.clone(), mailer.clone()),
        json!({"type": "changePassword", "qra": "PY2ABC", "password": "bad", "newPassword": "new"}),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(store.get("PY2ABC").map(|r| r.password), Some("old".to_string()));

    let (status, body) = post(
        app(store.clone(), mailer),
        json!({"type": "changePassword", "qra": "PY2ABC", "password": "old", "newPassword": "new"}),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "Password changed"}));
    assert_eq!(store.get("PY2ABC").map(|r| r.password), Some("new".to_string()));
    Ok(())
}

#[tokio::test]
async fn change_email_needs_no_password() -> Result<()> {
    let store = Arc::new(MemoryStore::with_user(record("PY2ABC", "pw", "")));

    let (status, body) = post(
        app(store.clone(), Arc::new(RecordingSender::default())),
        json!({"type": "changeEmail", "qra": "PY2ABC", "newEmail": "op@example.com"}),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "Email changed"}));
    assert_eq!(
        store.get("PY2ABC").map(|r| r.email),
        Some("op@example.com".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn save_frequencies_stores_payload_verbatim() -> Result<()> {
    let store = Arc::new(MemoryStore::with_user(record("PY2ABC", "pw", "")));
    let mailer = Arc::new(RecordingSender::default());

    let (status, _) = post(
        app(store.clone(), mailer.clone()),
        json!({"type": "saveFrequencies", "qra": "PY2ABC", "frequencies": "[7.074,\"14.074\"]"}),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        store.get("PY2ABC").map(|r| r.frequencies),
        Some("[7.074,\"14.074\"]".to_string())
    );

    let (status, body) = post(
        app(store.clone(), mailer),
        json!({"type": "saveFrequencies", "qra": "PY2ABC", "frequencies": [7.074, "14.074"]}),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "Frequencies saved"}));
    assert_eq!(
        store.get("PY2ABC").map(|r| r.frequencies),
        Some("[7.074,\"14.074\"]".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn password_reset_replaces_password_and_mails_code() -> Result<()> {
    let store = Arc::new(MemoryStore::with_user(record(
        "PY2ABC",
        "forgotten",
        "op@example.com",
    )));
    let mailer = Arc::new(RecordingSender::default());

    let (status, body) = post(
        app(store.clone(), mailer.clone()),
        json!({"type": "requestPasswordReset", "qra": "PY2ABC", "email": "op@example.com"}),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "Reset code sent"}));

    let code = store
        .get("PY2ABC")
        .map(|r| r.password)
        .ok_or_else(|| anyhow!("record missing"))?;
    assert_ne!(code, "forgotten");
    assert_eq!(code.len(), RESET_CODE_LEN);
    assert!(code
        .chars()
        .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "op@example.com");
    assert_eq!(sent[0].subject, RESET_SUBJECT);
    assert!(sent[0].html_body.contains(&code));
    Ok(())
}

#[tokio::test]
async fn password_reset_rejects_wrong_or_empty_email() -> Result<()> {
    let store = Arc::new(MemoryStore::with_user(record(
        "PY2ABC",
        "keep",
        "op@example.com",
    )));
    let mailer = Arc::new(RecordingSender::default());

    for email in [json!("other@example.com"), json!(""), Value::Null] {
        let mut request = json!({"type": "requestPasswordReset", "qra": "PY2ABC"});
        if !email.is_null() {
            request["email"] = email;
        }
        let (status, _) = post(app(store.clone(), mailer.clone()), request).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    assert_eq!(store.get("PY2ABC").map(|r| r.password), Some("keep".to_string()));
    assert!(mailer.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn password_reset_with_empty_stored_email_is_unauthorized() -> Result<()> {
    let store = Arc::new(MemoryStore::with_user(record("PY2ABC", "keep", "")));
    let mailer = Arc::new(RecordingSender::default());

    let (status, _) = post(
        app(store.clone(), mailer.clone()),
        json!({"type": "requestPasswordReset", "qra": "PY2ABC", "email": ""}),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(store.get("PY2ABC").map(|r| r.password), Some("keep".to_string()));
    assert!(mailer.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn password_reset_mail_failure_is_internal_error() -> Result<()> {
    let store = Arc::new(MemoryStore::with_user(record(
        "PY2ABC",
        "forgotten",
        "op@example.com",
    )));
    let mailer = Arc::new(RecordingSender::failing());

    let (status, body) = post(
        app(store.clone(), mailer.clone()),
        json!({"type": "requestPasswordReset", "qra": "PY2ABC", "email": "op@example.com"}),
    )
    .await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "Internal server error"}));

    // Known inconsistency: the stored password already holds the unsent code.
    let password = store.get("PY2ABC").map(|r| r.password);
    assert_ne!(password, Some("forgotten".to_string()));
    assert_eq!(mailer.sent().len(), 1);
    Ok(())
}

#[tokio::test]
async fn unknown_type_touches_nothing() -> Result<()> {
    let store = Arc::new(MemoryStore::with_user(record("PY2ABC", "pw", "op@example.com")));
    let mailer = Arc::new(RecordingSender::default());

    let (status, body) = post(
        app(store.clone(), mailer.clone()),
        json!({"type": "deleteUser", "qra": "PY2ABC"}),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "Invalid request type"}));
    assert_eq!(store.calls(), 0);
    assert!(mailer.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn malformed_body_is_bad_request() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    let (status, _) = post_raw(
        app(store.clone(), Arc::new(RecordingSender::default())),
        "not json".to_string(),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(store.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn non_post_is_rejected_before_body() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    let response = app(store.clone(), Arc::new(RecordingSender::default()))
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/account")
                .body(Body::from(
                    json!({"type": "login", "qra": "PY2ABC", "password": "x"}).to_string(),
                ))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(store.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn store_failure_is_generic_internal_error() -> Result<()> {
    let (status, body) = post(
        app(Arc::new(BrokenStore), Arc::new(RecordingSender::default())),
        json!({"type": "login", "qra": "PY2ABC", "password": "x"}),
    )
    .await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "Internal server error"}));
    assert!(!body.to_string().contains("connection refused"));
    Ok(())
}

#[tokio::test]
async fn store_failure_is_generic_for_every_store_backed_type() -> Result<()> {
    let requests = [
        json!({"type": "createUser", "qra": "PY2ABC", "password": "x"}),
        json!({"type": "changePassword", "qra": "PY2ABC", "password": "x", "newPassword": "y"}),
        json!({"type": "changeEmail", "qra": "PY2ABC", "newEmail": "op@example.com"}),
        json!({"type": "saveFrequencies", "qra": "PY2ABC", "frequencies": [7.074]}),
        json!({"type": "requestPasswordReset", "qra": "PY2ABC", "email": "op@example.com"}),
    ];

    for request in requests {
        let kind = request["type"].clone();
        let mailer = Arc::new(RecordingSender::default());
        let (status, body) = post(app(Arc::new(BrokenStore), mailer.clone()), request).await?;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "type {kind}");
        assert_eq!(body, json!({"error": "Internal server error"}), "type {kind}");
        assert!(mailer.sent().is_empty());
    }
    Ok(())
}

#[tokio::test]
async fn change_password_unknown_qra_is_unauthorized() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    let (status, body) = post(
        app(store.clone(), Arc::new(RecordingSender::default())),
        json!({"type": "changePassword", "qra": "PY9ZZZ", "password": "x", "newPassword": "y"}),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"error": "Invalid credentials"}));
    assert_eq!(store.get("PY9ZZZ"), None);
    Ok(())
}

#[tokio::test]
async fn profile_updates_for_unknown_qra_still_succeed() -> Result<()> {
    let store = Arc::new(MemoryStore::default());
    let mailer = Arc::new(RecordingSender::default());

    let (status, body) = post(
        app(store.clone(), mailer.clone()),
        json!({"type": "changeEmail", "qra": "PY9ZZZ", "newEmail": "op@example.com"}),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "Email changed"}));

    let (status, body) = post(
        app(store.clone(), mailer),
        json!({"type": "saveFrequencies", "qra": "PY9ZZZ", "frequencies": [7.074]}),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "Frequencies saved"}));

    assert_eq!(store.get("PY9ZZZ"), None);
    assert_eq!(store.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn password_reset_update_failure_is_internal_error() -> Result<()> {
    let store = Arc::new(MemoryStore::with_failing_updates(record(
        "PY2ABC",
        "forgotten",
        "op@example.com",
    )));
    let mailer = Arc::new(RecordingSender::default());

    let (status, body) = post(
        app(store.clone(), mailer.clone()),
        json!({"type": "requestPasswordReset", "qra": "PY2ABC", "email": "op@example.com"}),
    )
    .await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "Internal server error"}));
    assert_eq!(
        store.get("PY2ABC").map(|r| r.password),
        Some("forgotten".to_string())
    );
    assert!(mailer.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn password_reset_accepts_any_non_empty_email() -> Result<()> {
    let store = Arc::new(MemoryStore::with_user(record("PY2ABC", "forgotten", " ")));
    let mailer = Arc::new(RecordingSender::default());

    let (status, _) = post(
        app(store.clone(), mailer.clone()),
        json!({"type": "requestPasswordReset", "qra": "PY2ABC", "email": " "}),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(
        store.get("PY2ABC").map(|r| r.password),
        Some("forgotten".to_string())
    );
    assert_eq!(mailer.sent().len(), 1);
    Ok(())
}

#[tokio::test]
async fn health_reports_store_status() -> Result<()> {
    let response = app(
        Arc::new(MemoryStore::default()),
        Arc::new(RecordingSender::default()),
    )
    .oneshot(Request::builder().uri("/health").body(Body::empty())?)
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("X-App").is_some());
    assert!(response.headers().get("x-request-id").is_some());
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let payload: Value = serde_json::from_slice(&bytes)?;
    assert_eq!(payload.get("database"), Some(&json!("ok")));

    let response = app(Arc::new(BrokenStore), Arc::new(RecordingSender::default()))
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    Ok(())
}
