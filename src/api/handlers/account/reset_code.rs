use crate::api::email::EmailMessage;
use rand::Rng;

const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

pub const RESET_CODE_LEN: usize = 6;

pub const RESET_SUBJECT: &str = "Password reset";

/// Six characters from `[0-9A-Z]`; becomes the account's new password.
pub(super) fn generate() -> String {
    let mut rng = rand::thread_rng();
    (0..RESET_CODE_LEN)
        .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
        .collect()
}

pub(super) fn reset_email(to: &str, qra: &str, code: &str) -> EmailMessage {
    EmailMessage {
        to: to.to_string(),
        subject: RESET_SUBJECT.to_string(),
        html_body: format!(
            "<p>Hello {qra},</p>\
             <p>Your password has been reset. Use this code to log in:</p>\
             <p><strong>{code}</strong></p>\
             <p>Change it after logging in.</p>"
        ),
    }
}
