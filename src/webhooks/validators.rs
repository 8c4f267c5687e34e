//! Provider-specific webhook validation.
//!
//! Google notifications authenticate through their channel headers; Microsoft
//! uses a validation-token handshake at subscription setup and an active
//! subscription lookup for notifications. Validation failures surface as
//! `WebhookValidationFailed` and never record a WebhookEvent.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{CalendarError, CalendarResult};

/// Headers every Google channel notification must carry.
pub const GOOGLE_REQUIRED_HEADERS: [&str; 3] = [
    "x-goog-channel-id",
    "x-goog-resource-id",
    "x-goog-resource-state",
];

/// Microsoft validation tokens are canonical UUIDs; anything else is rejected
/// before it can be reflected into a response body.
fn validation_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^[a-f0-9]{8}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{12}$")
            .expect("static regex")
    })
}

pub fn is_valid_validation_token(token: &str) -> bool {
    validation_token_regex().is_match(token)
}

pub(crate) fn header_lookup<'a>(
    headers: &'a HashMap<String, String>,
    name: &str,
) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Checks the Google channel header set, case-insensitively.
pub fn validate_google_headers(headers: &HashMap<String, String>) -> CalendarResult<()> {
    for required in GOOGLE_REQUIRED_HEADERS {
        if header_lookup(headers, required).is_none() {
            return Err(CalendarError::WebhookValidationFailed(format!(
                "missing Google header: {required}"
            )));
        }
    }
    Ok(())
}
