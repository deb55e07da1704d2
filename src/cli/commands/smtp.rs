//! SMTP relay arguments.
//!
//! Nothing here is validated at startup: a missing host or bad credentials only
//! surface when the first email is sent.

use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_SMTP_HOST: &str = "smtp-host";
pub const ARG_SMTP_PORT: &str = "smtp-port";
pub const ARG_SMTP_SECURE: &str = "smtp-secure";
pub const ARG_SMTP_USER: &str = "smtp-user";
pub const ARG_SMTP_PASSWORD: &str = "smtp-password";
pub const ARG_SMTP_FROM: &str = "smtp-from";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SMTP_HOST)
                .long(ARG_SMTP_HOST)
                .help("SMTP relay host")
                .env("QRALOG_SMTP_HOST"),
        )
        .arg(
            Arg::new(ARG_SMTP_PORT)
                .long(ARG_SMTP_PORT)
                .help("SMTP relay port")
                .env("QRALOG_SMTP_PORT")
                .default_value("587")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_SMTP_SECURE)
                .long(ARG_SMTP_SECURE)
                .help("Use implicit TLS (true) instead of opportunistic STARTTLS (false)")
                .env("QRALOG_SMTP_SECURE")
                .default_value("false")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_SMTP_USER)
                .long(ARG_SMTP_USER)
                .help("SMTP username, also used as the sender address")
                .env("QRALOG_SMTP_USER"),
        )
        .arg(
            Arg::new(ARG_SMTP_PASSWORD)
                .long(ARG_SMTP_PASSWORD)
                .help("SMTP password")
                .env("QRALOG_SMTP_PASSWORD")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_SMTP_FROM)
                .long(ARG_SMTP_FROM)
                .help("Sender address (defaults to --smtp-user)")
                .env("QRALOG_SMTP_FROM"),
        )
}

#[derive(Debug)]
pub struct Options {
    pub host: Option<String>,
    pub port: u16,
    pub secure: bool,
    pub user: Option<String>,
    pub password: Option<SecretString>,
    pub from: Option<String>,
}

impl Options {
    /// # Errors
    /// Never fails today; kept fallible to match the other option groups.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            host: matches.get_one::<String>(ARG_SMTP_HOST).cloned(),
            port: matches.get_one::<u16>(ARG_SMTP_PORT).copied().unwrap_or(587),
            secure: matches
                .get_one::<bool>(ARG_SMTP_SECURE)
                .copied()
                .unwrap_or(false),
            user: matches.get_one::<String>(ARG_SMTP_USER).cloned(),
            password: matches
                .get_one::<String>(ARG_SMTP_PASSWORD)
                .cloned()
                .map(SecretString::from),
            from: matches.get_one::<String>(ARG_SMTP_FROM).cloned(),
        })
    }
}
