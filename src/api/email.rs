//! Outbound email delivery.
//!
//! Handlers hand an `EmailMessage` to an `EmailSender` and await the result;
//! there is no queue and no retry. `SmtpEmailSender` relays through lettre's
//! async SMTP transport, built on first use from `SmtpConfig` so a missing or
//! broken relay configuration only fails the request that needs it.
use async_trait::async_trait;
use lettre::{
    address::AddressError,
    message::{header::ContentType, Mailbox},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use once_cell::sync::OnceCell;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("SMTP relay is not configured")]
    NotConfigured,

    #[error("invalid email address: {0}")]
    InvalidAddress(#[from] AddressError),

    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

/// Email delivery abstraction used by the handlers.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Make exactly one delivery attempt.
    async fn send(&self, message: &EmailMessage) -> Result<(), DeliveryError>;
}

#[derive(Debug)]
pub struct SmtpConfig {
    host: Option<String>,
    port: u16,
    secure: bool,
    user: Option<String>,
    password: Option<SecretString>,
    from: Option<String>,
}

impl SmtpConfig {
    /// Default config: no host, port 587, opportunistic STARTTLS, no credentials.
    #[must_use]
    pub fn new() -> Self {
        Self {
            host: None,
            port: 587,
            secure: false,
            user: None,
            password: None,
            from: None,
        }
    }

    #[must_use]
    pub fn with_host(mut self, host: String) -> Self {
        self.host = Some(host);
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn with_user(mut self, user: String) -> Self {
        self.user = Some(user);
        self
    }

    #[must_use]
    pub fn with_password(mut self, password: SecretString) -> Self {
        self.password = Some(password);
        self
    }

    #[must_use]
    pub fn with_from(mut self, from: String) -> Self {
        self.from = Some(from);
        self
    }

    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn secure(&self) -> bool {
        self.secure
    }

    /// Sender address: explicit `from`, otherwise the SMTP user.
    #[must_use]
    pub fn sender(&self) -> Option<&str> {
        self.from.as_deref().or(self.user.as_deref())
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SmtpEmailSender {
    config: SmtpConfig,
    transport: OnceCell<AsyncSmtpTransport<Tokio1Executor>>,
}

impl SmtpEmailSender {
    #[must_use]
    pub fn new(config: SmtpConfig) -> Self {
        Self {
            config,
            transport: OnceCell::new(),
        }
    }

    fn transport(&self) -> Result<&AsyncSmtpTransport<Tokio1Executor>, DeliveryError> {
        self.transport
            .get_or_try_init(|| build_transport(&self.config))
    }
}

impl std::fmt::Debug for SmtpEmailSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpEmailSender")
            .field("config", &self.config)
            .field("connected", &self.transport.get().is_some())
            .finish()
    }
}

fn build_transport(config: &SmtpConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>, DeliveryError> {
    let host = config.host().ok_or(DeliveryError::NotConfigured)?;

    let builder = if config.secure() {
        AsyncSmtpTransport::<Tokio1Executor>::relay(host)?
    } else {
        let tls = TlsParameters::new(host.to_string())?;
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).tls(Tls::Opportunistic(tls))
    };

    let mut builder = builder.port(config.port());

    if let Some(user) = config.user.as_deref() {
        let password = config
            .password
            .as_ref()
            .map(|password| password.expose_secret().to_string())
            .unwrap_or_default();
        builder = builder.credentials(Credentials::new(user.to_string(), password));
    }

    debug!(host, port = config.port(), secure = config.secure(), "SMTP transport ready");

    Ok(builder.build())
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    #[instrument(skip(self, message), fields(to = %message.to))]
    async fn send(&self, message: &EmailMessage) -> Result<(), DeliveryError> {
        let from = self.config.sender().ok_or(DeliveryError::NotConfigured)?;

        let email = Message::builder()
            .from(from.parse::<Mailbox>()?)
            .to(message.to.parse::<Mailbox>()?)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(message.html_body.clone())?;

        self.transport()?.send(email).await?;

        Ok(())
    }
}
