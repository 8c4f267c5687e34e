//! Provider-specific webhook payload parsing.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value as JsonValue;

use super::validators::header_lookup;

fn google_resource_uri_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/calendars/([^/]+)/events").expect("static regex"))
}

/// Extracts (event_type, external_calendar_id) from Google channel headers.
/// Google sends everything relevant via headers; the body is empty.
pub fn parse_google(headers: &HashMap<String, String>) -> (String, String) {
    let event_type = header_lookup(headers, "x-goog-resource-state")
        .unwrap_or("unknown")
        .to_string();

    let calendar_id = header_lookup(headers, "x-goog-resource-uri")
        .and_then(|uri| {
            google_resource_uri_regex()
                .captures(uri)
                .and_then(|captures| captures.get(1))
                .map(|m| m.as_str().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    (event_type, calendar_id)
}

/// Extracts (event_type, external_calendar_id) from a Microsoft Graph
/// notification body.
pub fn parse_microsoft(payload: &JsonValue) -> (String, String) {
    static RESOURCE_RE: OnceLock<Regex> = OnceLock::new();
    let resource_regex = RESOURCE_RE
        .get_or_init(|| Regex::new(r"calendars/([^/]+)/events").expect("static regex"));

    let first = payload
        .get("value")
        .and_then(|value| value.as_array())
        .and_then(|value| value.first());

    let event_type = first
        .and_then(|notification| notification.get("changeType"))
        .and_then(|change| change.as_str())
        .unwrap_or("notification")
        .to_string();

    let calendar_id = first
        .and_then(|notification| notification.get("resource"))
        .and_then(|resource| resource.as_str())
        .and_then(|resource| {
            resource_regex
                .captures(resource)
                .and_then(|captures| captures.get(1))
                .map(|m| m.as_str().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    (event_type, calendar_id)
}

/// The provider-assigned subscription id a Microsoft notification refers to.
pub fn microsoft_subscription_id(payload: &JsonValue) -> Option<String> {
    payload
        .get("value")
        .and_then(|value| value.as_array())
        .and_then(|value| value.first())
        .and_then(|notification| notification.get("subscriptionId"))
        .and_then(|id| id.as_str())
        .map(String::from)
}
