//! User-record persistence.
//!
//! The `users` table belongs to the external store; this module only reads and
//! updates rows keyed by `qra`. Uniqueness of `qra` is enforced by the table's
//! primary key, and a duplicate insert comes back as `InsertOutcome::Conflict`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgPool, Row};
use tracing::{info_span, Instrument};
use utoipa::ToSchema;

/// Serialized empty frequency list stored on account creation.
pub const EMPTY_FREQUENCIES: &str = "[]";

#[derive(ToSchema, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    pub qra: String,
    pub password: String,
    pub email: String,
    pub frequencies: String,
}

impl UserRecord {
    /// Fresh record: empty email, empty frequency list.
    #[must_use]
    pub fn new(qra: String, password: String) -> Self {
        Self {
            qra,
            password,
            email: String::new(),
            frequencies: EMPTY_FREQUENCIES.to_string(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Created(UserRecord),
    Conflict,
}

/// Operations the account handlers need from the store.
///
/// Update methods return `false` when no row matched.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find(&self, qra: &str) -> Result<Option<UserRecord>>;

    async fn insert(&self, record: UserRecord) -> Result<InsertOutcome>;

    /// Replace the password only if `current` matches the stored one.
    async fn change_password(&self, qra: &str, current: &str, new: &str) -> Result<bool>;

    async fn set_password(&self, qra: &str, password: &str) -> Result<bool>;

    async fn set_email(&self, qra: &str, email: &str) -> Result<bool>;

    async fn set_frequencies(&self, qra: &str, frequencies: &str) -> Result<bool>;

    async fn ping(&self) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn update(&self, query: &'static str, binds: &[&str], what: &str) -> Result<bool> {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let mut statement = sqlx::query(query);
        for value in binds {
            statement = statement.bind(*value);
        }
        let result = statement
            .execute(&self.pool)
            .instrument(span)
            .await
            .with_context(|| format!("failed to update {what}"))?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find(&self, qra: &str) -> Result<Option<UserRecord>> {
        let query = "SELECT qra, password, email, frequencies FROM users WHERE qra = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(qra)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user record")?;

        Ok(row.map(|row| UserRecord {
            qra: row.get("qra"),
            password: row.get("password"),
            email: row.get("email"),
            frequencies: row.get("frequencies"),
        }))
    }

    async fn insert(&self, record: UserRecord) -> Result<InsertOutcome> {
        let query = r"
            INSERT INTO users (qra, password, email, frequencies)
            VALUES ($1, $2, $3, $4)
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(&record.qra)
            .bind(&record.password)
            .bind(&record.email)
            .bind(&record.frequencies)
            .execute(&self.pool)
            .instrument(span)
            .await;

        match result {
            Ok(_) => Ok(InsertOutcome::Created(record)),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert user record"),
        }
    }

    async fn change_password(&self, qra: &str, current: &str, new: &str) -> Result<bool> {
        self.update(
            "UPDATE users SET password = $3 WHERE qra = $1 AND password = $2",
            &[qra, current, new],
            "password",
        )
        .await
    }

    async fn set_password(&self, qra: &str, password: &str) -> Result<bool> {
        self.update(
            "UPDATE users SET password = $2 WHERE qra = $1",
            &[qra, password],
            "password",
        )
        .await
    }

    async fn set_email(&self, qra: &str, email: &str) -> Result<bool> {
        self.update(
            "UPDATE users SET email = $2 WHERE qra = $1",
            &[qra, email],
            "email",
        )
        .await
    }

    async fn set_frequencies(&self, qra: &str, frequencies: &str) -> Result<bool> {
        self.update(
            "UPDATE users SET frequencies = $2 WHERE qra = $1",
            &[qra, frequencies],
            "frequencies",
        )
        .await
    }

    async fn ping(&self) -> Result<()> {
        let acquire_span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self
            .pool
            .acquire()
            .instrument(acquire_span)
            .await
            .context("failed to acquire database connection")?;

        let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping()
            .instrument(ping_span)
            .await
            .context("failed to ping database")
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}
