//! # QRA Log (account service)
//!
//! `qralog` backs the profile side of an amateur-radio logging application.
//! Operators are identified by their QRA (callsign/handle); each account holds
//! a password, a contact email and an opaque, serialized frequency list.
//!
//! ## Surface
//!
//! - `POST /account` multiplexes every account operation on a `type`
//!   discriminator (`login`, `createUser`, `changePassword`, `changeEmail`,
//!   `saveFrequencies`, `requestPasswordReset`).
//! - `POST /send-reset-email` relays a single HTML email through SMTP.
//! - `GET /health` reports build metadata and store reachability.
//!
//! ## Collaborators
//!
//! The user-record table and the SMTP relay are external. Both are reached
//! through traits (`UserStore`, `EmailSender`) injected into the router, so
//! handlers never build clients on their own.
//!
//! ## Known defects
//!
//! Passwords are stored and compared in plaintext because the table layout is
//! owned by the external store. Password reset overwrites the stored password
//! before the email goes out; a failed delivery leaves the new code in place.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
