//! Maps validated CLI arguments to the action the binary executes.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{smtp, ARG_DSN, ARG_PORT, ARG_STORE_KEY};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    let store_key = matches
        .get_one::<String>(ARG_STORE_KEY)
        .cloned()
        .map(SecretString::from);

    let smtp_opts = smtp::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        store_key,
        smtp_host: smtp_opts.host,
        smtp_port: smtp_opts.port,
        smtp_secure: smtp_opts.secure,
        smtp_user: smtp_opts.user,
        smtp_password: smtp_opts.password,
        smtp_from: smtp_opts.from,
    }))
}
