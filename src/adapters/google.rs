//! Google Calendar adapter.
//!
//! Translates the uniform operation set onto the Google Calendar v3 REST
//! surface: `events.list` pagination with `syncToken` for incremental pulls
//! (`showDeleted` on so cancellations stream through), `events.watch`
//! channels for push notifications, and the freebusy query for resource
//! availability. The admin resource directory is exposed under
//! `/resources/calendars`.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use reqwest::StatusCode;
use serde_json::{Value as JsonValue, json};
use tracing::debug;

use crate::models::enums::{CalendarProvider, EventStatus, RsvpStatus};
use crate::rate_limit::{RateLimitClass, RateLimiter};

use super::types::{
    AttendeeRecord, CalendarDescriptor, EventInput, EventPage, EventRecord, ParsedNotification,
    ResourceDescriptor, SubscriptionHandle, SubscriptionRequest,
};
use super::{AdapterError, TimeWindow, error_from_status};

const MAX_RESULTS_PER_PAGE: u32 = 250;

fn resource_uri_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/calendars/([^/]+)/events").expect("static regex"))
}

/// Maps Google responseStatus values to the canonical RSVP set. Unknown
/// values map to pending.
fn rsvp_from_google(value: Option<&str>) -> RsvpStatus {
    match value {
        Some("accepted") => RsvpStatus::Accepted,
        Some("declined") => RsvpStatus::Declined,
        // needsAction, tentative, and anything unrecognized.
        _ => RsvpStatus::Pending,
    }
}

fn rsvp_to_google(status: RsvpStatus) -> &'static str {
    match status {
        RsvpStatus::Pending => "needsAction",
        RsvpStatus::Accepted => "accepted",
        RsvpStatus::Declined => "declined",
    }
}

pub struct GoogleCalendarAdapter {
    api_base: String,
    account_id: String,
    access_token: String,
    http: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
}

impl GoogleCalendarAdapter {
    pub fn new(
        api_base: String,
        account_id: String,
        access_token: String,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self::with_client(api_base, account_id, access_token, rate_limiter, http)
    }

    pub fn with_client(
        api_base: String,
        account_id: String,
        access_token: String,
        rate_limiter: Arc<RateLimiter>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            account_id,
            access_token,
            http,
            rate_limiter,
        }
    }

    async fn acquire(&self, class: RateLimitClass) -> Result<(), AdapterError> {
        self.rate_limiter
            .acquire(CalendarProvider::Google, &self.account_id, class)
            .await
            .map_err(AdapterError::from)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<Option<JsonValue>, AdapterError> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(AdapterError::from)?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let body = response.text().await.map_err(AdapterError::from)?;
        if !status.is_success() {
            return Err(error_from_status(status, &body));
        }
        if body.is_empty() {
            return Ok(None);
        }
        let value =
            serde_json::from_str(&body).map_err(|e| AdapterError::Malformed(e.to_string()))?;
        Ok(Some(value))
    }

    fn event_body(input: &EventInput) -> Result<JsonValue, AdapterError> {
        let mut body = json!({
            "summary": input.title,
            "description": input.description,
            "start": {
                "dateTime": format_utc(input.start),
                "timeZone": input.timezone,
            },
            "end": {
                "dateTime": format_utc(input.end),
                "timeZone": input.timezone,
            },
            "attendees": input
                .attendees
                .iter()
                .map(|attendee| {
                    json!({
                        "email": attendee.email,
                        "displayName": attendee.name,
                        "responseStatus": rsvp_to_google(attendee.status),
                    })
                })
                .collect::<Vec<_>>(),
        });

        if let Some(rule) = &input.recurrence_rule {
            if !input.is_recurring_instance {
                body["recurrence"] = json!([format!("RRULE:{}", rule.to_rrule_string())]);
            }
        }
        Ok(body)
    }

    fn parse_event(&self, event: &JsonValue, calendar_id: &str) -> EventRecord {
        let status = match event.get("status").and_then(|s| s.as_str()) {
            Some("cancelled") => EventStatus::Cancelled,
            _ => EventStatus::Confirmed,
        };

        let (start, start_tz) = parse_google_time(event.get("start"));
        let (end, end_tz) = parse_google_time(event.get("end"));

        let recurrence_rule = event
            .get("recurrence")
            .and_then(|r| r.as_array())
            .and_then(|rules| {
                rules
                    .iter()
                    .filter_map(|rule| rule.as_str())
                    .find_map(|rule| rule.strip_prefix("RRULE:"))
            })
            .map(|rule| rule.to_string());

        EventRecord {
            external_id: event
                .get("id")
                .and_then(|id| id.as_str())
                .unwrap_or_default()
                .to_string(),
            calendar_external_id: calendar_id.to_string(),
            title: event
                .get("summary")
                .and_then(|s| s.as_str())
                .unwrap_or_default()
                .to_string(),
            description: event
                .get("description")
                .and_then(|s| s.as_str())
                .unwrap_or_default()
                .to_string(),
            start,
            end,
            timezone: start_tz.or(end_tz),
            status,
            attendees: event
                .get("attendees")
                .and_then(|a| a.as_array())
                .map(|attendees| {
                    attendees
                        .iter()
                        .map(|attendee| AttendeeRecord {
                            email: attendee
                                .get("email")
                                .and_then(|e| e.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            name: attendee
                                .get("displayName")
                                .and_then(|n| n.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            status: rsvp_from_google(
                                attendee.get("responseStatus").and_then(|s| s.as_str()),
                            ),
                        })
                        .collect()
                })
                .unwrap_or_default(),
            recurrence_rule,
            recurring_event_id: event
                .get("recurringEventId")
                .and_then(|id| id.as_str())
                .map(|id| id.to_string()),
            original_payload: Some(event.clone()),
        }
    }

    pub async fn list_account_calendars(
        &self,
    ) -> Result<Vec<CalendarDescriptor>, AdapterError> {
        let mut calendars = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            self.acquire(RateLimitClass::Read).await?;
            let mut request = self
                .http
                .get(format!("{}/users/me/calendarList", self.api_base));
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let body = self
                .send(request)
                .await?
                .ok_or_else(|| AdapterError::Malformed("empty calendarList response".into()))?;

            for item in body.get("items").and_then(|i| i.as_array()).unwrap_or(&vec![]) {
                calendars.push(CalendarDescriptor {
                    external_id: item
                        .get("id")
                        .and_then(|id| id.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    name: item
                        .get("summary")
                        .and_then(|s| s.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    description: item
                        .get("description")
                        .and_then(|s| s.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    email: item.get("id").and_then(|id| id.as_str()).map(String::from),
                    provider: CalendarProvider::Google,
                    is_default: item
                        .get("primary")
                        .and_then(|p| p.as_bool())
                        .unwrap_or(false),
                    original_payload: Some(item.clone()),
                });
            }

            page_token = body
                .get("nextPageToken")
                .and_then(|t| t.as_str())
                .map(String::from);
            if page_token.is_none() {
                break;
            }
        }

        Ok(calendars)
    }

    pub async fn create_calendar(&self, name: &str) -> Result<CalendarDescriptor, AdapterError> {
        self.acquire(RateLimitClass::Write).await?;
        let body = self
            .send(
                self.http
                    .post(format!("{}/calendars", self.api_base))
                    .json(&json!({ "summary": name })),
            )
            .await?
            .ok_or_else(|| AdapterError::Malformed("empty calendar insert response".into()))?;

        Ok(CalendarDescriptor {
            external_id: body
                .get("id")
                .and_then(|id| id.as_str())
                .unwrap_or_default()
                .to_string(),
            name: body
                .get("summary")
                .and_then(|s| s.as_str())
                .unwrap_or(name)
                .to_string(),
            description: String::new(),
            email: body.get("id").and_then(|id| id.as_str()).map(String::from),
            provider: CalendarProvider::Google,
            is_default: false,
            original_payload: Some(body),
        })
    }

    pub async fn create_event(
        &self,
        calendar_external_id: &str,
        input: &EventInput,
    ) -> Result<EventRecord, AdapterError> {
        self.acquire(RateLimitClass::Write).await?;
        let body = self
            .send(
                self.http
                    .post(format!(
                        "{}/calendars/{}/events",
                        self.api_base, calendar_external_id
                    ))
                    .json(&Self::event_body(input)?),
            )
            .await?
            .ok_or_else(|| AdapterError::Malformed("empty event insert response".into()))?;

        Ok(self.parse_event(&body, calendar_external_id))
    }

    pub async fn update_event(
        &self,
        calendar_external_id: &str,
        external_event_id: &str,
        input: &EventInput,
    ) -> Result<EventRecord, AdapterError> {
        self.acquire(RateLimitClass::Write).await?;
        let body = self
            .send(
                self.http
                    .put(format!(
                        "{}/calendars/{}/events/{}",
                        self.api_base, calendar_external_id, external_event_id
                    ))
                    .json(&Self::event_body(input)?),
            )
            .await?
            .ok_or_else(|| AdapterError::Malformed("empty event update response".into()))?;

        Ok(self.parse_event(&body, calendar_external_id))
    }

    pub async fn delete_event(
        &self,
        calendar_external_id: &str,
        external_event_id: &str,
    ) -> Result<(), AdapterError> {
        self.acquire(RateLimitClass::Write).await?;
        self.send(self.http.delete(format!(
            "{}/calendars/{}/events/{}",
            self.api_base, calendar_external_id, external_event_id
        )))
        .await?;
        Ok(())
    }

    pub async fn get_event(
        &self,
        calendar_external_id: &str,
        external_event_id: &str,
    ) -> Result<EventRecord, AdapterError> {
        self.acquire(RateLimitClass::Read).await?;
        let body = self
            .send(self.http.get(format!(
                "{}/calendars/{}/events/{}",
                self.api_base, calendar_external_id, external_event_id
            )))
            .await?
            .ok_or(AdapterError::NotFound("event"))?;
        Ok(self.parse_event(&body, calendar_external_id))
    }

    pub async fn list_events_page(
        &self,
        calendar_external_id: &str,
        window: TimeWindow,
        sync_token: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<EventPage, AdapterError> {
        self.acquire(RateLimitClass::Read).await?;

        let mut query: Vec<(&str, String)> = vec![
            ("singleEvents", "true".to_string()),
            ("maxResults", MAX_RESULTS_PER_PAGE.to_string()),
        ];
        match sync_token {
            Some(token) => {
                // syncToken is exclusive with time bounds and ordering; deleted
                // events must stream through as cancelled.
                query.push(("syncToken", token.to_string()));
                query.push(("showDeleted", "true".to_string()));
            }
            None => {
                query.push(("timeMin", format_utc(window.start)));
                query.push(("timeMax", format_utc(window.end)));
                query.push(("orderBy", "startTime".to_string()));
            }
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }

        let body = self
            .send(
                self.http
                    .get(format!(
                        "{}/calendars/{}/events",
                        self.api_base, calendar_external_id
                    ))
                    .query(&query),
            )
            .await?
            .ok_or_else(|| AdapterError::Malformed("empty events.list response".into()))?;

        let events = body
            .get("items")
            .and_then(|i| i.as_array())
            .map(|items| {
                items
                    .iter()
                    .map(|event| self.parse_event(event, calendar_external_id))
                    .collect()
            })
            .unwrap_or_default();

        debug!(
            calendar_external_id,
            page = page_token.unwrap_or("-"),
            "fetched Google events page"
        );

        Ok(EventPage {
            events,
            next_page_token: body
                .get("nextPageToken")
                .and_then(|t| t.as_str())
                .map(String::from),
            next_sync_token: body
                .get("nextSyncToken")
                .and_then(|t| t.as_str())
                .map(String::from),
        })
    }

    pub async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, AdapterError> {
        let mut resources = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            self.acquire(RateLimitClass::Read).await?;
            let mut request = self
                .http
                .get(format!("{}/resources/calendars", self.api_base));
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let body = self
                .send(request)
                .await?
                .ok_or_else(|| AdapterError::Malformed("empty resources response".into()))?;

            for item in body.get("items").and_then(|i| i.as_array()).unwrap_or(&vec![]) {
                resources.push(parse_resource(item));
            }

            page_token = body
                .get("nextPageToken")
                .and_then(|t| t.as_str())
                .map(String::from);
            if page_token.is_none() {
                break;
            }
        }

        Ok(resources)
    }

    pub async fn get_resource(
        &self,
        resource_id: &str,
    ) -> Result<ResourceDescriptor, AdapterError> {
        self.acquire(RateLimitClass::Read).await?;
        let body = self
            .send(self.http.get(format!(
                "{}/resources/calendars/{}",
                self.api_base, resource_id
            )))
            .await?
            .ok_or(AdapterError::NotFound("resource"))?;
        Ok(parse_resource(&body))
    }

    pub async fn available_resources(
        &self,
        window: TimeWindow,
    ) -> Result<Vec<ResourceDescriptor>, AdapterError> {
        let resources = self.list_resources().await?;
        if resources.is_empty() {
            return Ok(resources);
        }

        self.acquire(RateLimitClass::Read).await?;
        let items: Vec<JsonValue> = resources
            .iter()
            .filter_map(|r| r.email.as_ref())
            .map(|email| json!({ "id": email }))
            .collect();
        let body = self
            .send(
                self.http
                    .post(format!("{}/freeBusy", self.api_base))
                    .json(&json!({
                        "timeMin": format_utc(window.start),
                        "timeMax": format_utc(window.end),
                        "items": items,
                    })),
            )
            .await?
            .ok_or_else(|| AdapterError::Malformed("empty freeBusy response".into()))?;

        let busy_map = body.get("calendars").cloned().unwrap_or(json!({}));
        Ok(resources
            .into_iter()
            .filter(|resource| {
                let Some(email) = &resource.email else {
                    return false;
                };
                busy_map
                    .get(email)
                    .and_then(|entry| entry.get("busy"))
                    .and_then(|busy| busy.as_array())
                    .map(|busy| busy.is_empty())
                    .unwrap_or(true)
            })
            .collect())
    }

    pub async fn create_subscription(
        &self,
        request: &SubscriptionRequest,
    ) -> Result<SubscriptionHandle, AdapterError> {
        self.acquire(RateLimitClass::Write).await?;
        let body = self
            .send(
                self.http
                    .post(format!(
                        "{}/calendars/{}/events/watch",
                        self.api_base, request.resource_external_id
                    ))
                    .json(&json!({
                        "id": request.channel_id,
                        "type": "web_hook",
                        "address": request.callback_url,
                        "token": request.verification_token,
                        "params": { "ttl": request.ttl_secs.to_string() },
                    })),
            )
            .await?
            .ok_or_else(|| AdapterError::Malformed("empty watch response".into()))?;

        let expiration_ms: i64 = body
            .get("expiration")
            .and_then(|e| e.as_str())
            .and_then(|e| e.parse().ok())
            .ok_or_else(|| AdapterError::Malformed("watch response missing expiration".into()))?;

        Ok(SubscriptionHandle {
            external_subscription_id: body
                .get("id")
                .and_then(|id| id.as_str())
                .unwrap_or(&request.channel_id)
                .to_string(),
            external_resource_id: body
                .get("resourceId")
                .and_then(|id| id.as_str())
                .unwrap_or_default()
                .to_string(),
            channel_id: request.channel_id.clone(),
            verification_token: request.verification_token.clone(),
            callback_url: request.callback_url.clone(),
            expires_at: DateTime::<Utc>::from_timestamp_millis(expiration_ms)
                .map(|dt| dt.naive_utc())
                .ok_or_else(|| AdapterError::Malformed("invalid expiration".into()))?,
        })
    }

    pub async fn renew_subscription(
        &self,
        handle: &SubscriptionHandle,
    ) -> Result<SubscriptionHandle, AdapterError> {
        // Google channels cannot be extended; stop the old one and re-watch.
        if let Err(err) = self.cancel_subscription(handle).await {
            match err {
                AdapterError::NotFound(_) => {}
                other => return Err(other),
            }
        }
        self.create_subscription(&SubscriptionRequest {
            resource_external_id: handle.external_resource_id.clone(),
            callback_url: handle.callback_url.clone(),
            channel_id: handle.channel_id.clone(),
            verification_token: handle.verification_token.clone(),
            ttl_secs: 7 * 24 * 3600,
        })
        .await
    }

    pub async fn cancel_subscription(
        &self,
        handle: &SubscriptionHandle,
    ) -> Result<(), AdapterError> {
        self.acquire(RateLimitClass::Write).await?;
        self.send(
            self.http
                .post(format!("{}/channels/stop", self.api_base))
                .json(&json!({
                    "id": handle.external_subscription_id,
                    "resourceId": handle.external_resource_id,
                })),
        )
        .await?;
        Ok(())
    }

    pub fn parse_webhook(
        &self,
        headers: &HashMap<String, String>,
        _body: &JsonValue,
    ) -> Result<ParsedNotification, AdapterError> {
        let lookup = |name: &str| {
            headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str())
        };

        let event_type = lookup("x-goog-resource-state")
            .unwrap_or("unknown")
            .to_string();
        let external_calendar_id = lookup("x-goog-resource-uri")
            .and_then(|uri| {
                resource_uri_regex()
                    .captures(uri)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());

        Ok(ParsedNotification::Notification {
            event_type,
            external_calendar_id,
        })
    }
}

fn format_utc(naive: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc).to_rfc3339()
}

/// Parses a Google start/end object, preserving the IANA timeZone field.
/// Cancelled stream entries may omit times entirely.
fn parse_google_time(value: Option<&JsonValue>) -> (NaiveDateTime, Option<String>) {
    let Some(value) = value else {
        return (NaiveDateTime::default(), None);
    };

    let timezone = value
        .get("timeZone")
        .and_then(|tz| tz.as_str())
        .map(String::from);

    if let Some(datetime) = value.get("dateTime").and_then(|dt| dt.as_str()) {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(datetime) {
            return (parsed.naive_utc(), timezone);
        }
    }
    // All-day events carry a bare date.
    if let Some(date) = value.get("date").and_then(|d| d.as_str()) {
        if let Ok(parsed) = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d") {
            return (parsed.and_hms_opt(0, 0, 0).unwrap_or_default(), timezone);
        }
    }
    (NaiveDateTime::default(), timezone)
}

fn parse_resource(item: &JsonValue) -> ResourceDescriptor {
    ResourceDescriptor {
        external_id: item
            .get("resourceId")
            .and_then(|id| id.as_str())
            .unwrap_or_default()
            .to_string(),
        name: item
            .get("resourceName")
            .and_then(|n| n.as_str())
            .unwrap_or_default()
            .to_string(),
        description: item
            .get("resourceDescription")
            .and_then(|d| d.as_str())
            .unwrap_or_default()
            .to_string(),
        email: item
            .get("resourceEmail")
            .and_then(|e| e.as_str())
            .map(String::from),
        capacity: item
            .get("capacity")
            .and_then(|c| c.as_i64())
            .map(|c| c as i32),
        original_payload: Some(item.clone()),
    }
}
