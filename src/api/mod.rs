use crate::{
    api::{
        email::{EmailSender, SmtpConfig, SmtpEmailSender},
        handlers::{account, health, send_reset_email},
        store::{PgUserStore, UserStore},
    },
    cli::telemetry,
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::{any, get},
    Extension, Router,
};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, warn, Span};
use ulid::Ulid;

pub mod email;
pub mod handlers;
pub mod store;
// OpenAPI document for the routes below; printed by the `openapi` binary.
mod openapi;

pub use openapi::openapi;

/// Build the application router around the given store and mail sender.
///
/// `/account` and `/send-reset-email` accept every method so the handlers can
/// answer non-POST requests with their own JSON `405`.
pub fn router(store: Arc<dyn UserStore>, mailer: Arc<dyn EmailSender>) -> Router {
    Router::new()
        .route("/account", any(account::account))
        .route("/send-reset-email", any(send_reset_email::send_reset_email))
        .route("/health", get(health::health).options(health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(store))
                .layer(Extension(mailer)),
        )
}

/// Start the server
/// # Errors
/// Return error if the DSN is invalid or the listener fails
pub async fn new(port: u16, dsn: SecretString, smtp_config: SmtpConfig) -> Result<()> {
    // Lazy pool: an unreachable store only fails the requests that touch it.
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect_lazy(dsn.expose_secret())
        .context("Invalid store connection string")?;

    let store: Arc<dyn UserStore> = Arc::new(PgUserStore::new(pool));
    let mailer: Arc<dyn EmailSender> = Arc::new(SmtpEmailSender::new(smtp_config));

    let app = router(store, mailer);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    telemetry::shutdown_tracer();

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for CTRL_C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}
