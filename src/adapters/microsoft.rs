//! Microsoft Graph calendar adapter.
//!
//! Incremental listing rides the `calendarView/delta` endpoint: the first
//! pull passes the window bounds, later pulls pass the `$deltatoken`, pages
//! chain through `@odata.nextLink`, and removed events arrive as `@removed`
//! entries. Subscriptions use the Graph `/subscriptions` resource with a
//! `clientState` echo. Times are requested in UTC via the `Prefer:
//! outlook.timezone` header; the original zone rides the `timeZone` field.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use chrono::{NaiveDateTime, Weekday};
use regex::Regex;
use reqwest::StatusCode;
use serde_json::{Value as JsonValue, json};

use crate::models::enums::{CalendarProvider, EventStatus, RsvpStatus};
use crate::rate_limit::{RateLimitClass, RateLimiter};
use crate::recurrence::{Frequency, RuleEnd, RuleSpec};

use super::types::{
    AttendeeRecord, CalendarDescriptor, EventInput, EventPage, EventRecord, ParsedNotification,
    ResourceDescriptor, SubscriptionHandle, SubscriptionRequest,
};
use super::{AdapterError, TimeWindow, error_from_status};

fn resource_path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"calendars/([^/]+)/events").expect("static regex"))
}

/// Maps Graph response values to the canonical RSVP set. Unknown values map
/// to pending.
fn rsvp_from_graph(value: Option<&str>) -> RsvpStatus {
    match value {
        Some("accepted") | Some("organizer") => RsvpStatus::Accepted,
        Some("declined") => RsvpStatus::Declined,
        // none, notResponded, tentativelyAccepted, and anything unrecognized.
        _ => RsvpStatus::Pending,
    }
}

fn rsvp_to_graph(status: RsvpStatus) -> &'static str {
    match status {
        RsvpStatus::Pending => "notResponded",
        RsvpStatus::Accepted => "accepted",
        RsvpStatus::Declined => "declined",
    }
}

fn weekday_to_graph(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

pub struct MicrosoftCalendarAdapter {
    api_base: String,
    account_id: String,
    access_token: String,
    http: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
}

impl MicrosoftCalendarAdapter {
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
            .acquire(CalendarProvider::Microsoft, &self.account_id, class)
            .await
            .map_err(AdapterError::from)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<Option<JsonValue>, AdapterError> {
        let response = request
            .bearer_auth(&self.access_token)
            .header("Prefer", "outlook.timezone=\"UTC\"")
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

    /// Translates the internal RRULE subset into a Graph recurrence object.
    /// Components Graph cannot express for the chosen frequency fail with the
    /// offending key.
    fn translate_rule(
        rule: &RuleSpec,
        anchor: NaiveDateTime,
    ) -> Result<JsonValue, AdapterError> {
        let mut pattern = json!({ "interval": rule.interval });

        match rule.frequency {
            Frequency::Daily => {
                if !rule.by_weekday.is_empty() {
                    return Err(AdapterError::UnsupportedRRule("BYDAY".into()));
                }
                if !rule.by_month_day.is_empty() {
                    return Err(AdapterError::UnsupportedRRule("BYMONTHDAY".into()));
                }
                if !rule.by_month.is_empty() {
                    return Err(AdapterError::UnsupportedRRule("BYMONTH".into()));
                }
                pattern["type"] = json!("daily");
            }
            Frequency::Weekly => {
                if !rule.by_month_day.is_empty() {
                    return Err(AdapterError::UnsupportedRRule("BYMONTHDAY".into()));
                }
                if !rule.by_month.is_empty() {
                    return Err(AdapterError::UnsupportedRRule("BYMONTH".into()));
                }
                pattern["type"] = json!("weekly");
                let days: Vec<&str> = if rule.by_weekday.is_empty() {
                    vec![weekday_to_graph(chrono::Datelike::weekday(&anchor.date()))]
                } else {
                    rule.by_weekday.iter().copied().map(weekday_to_graph).collect()
                };
                pattern["daysOfWeek"] = json!(days);
            }
            Frequency::Monthly => {
                if !rule.by_weekday.is_empty() {
                    return Err(AdapterError::UnsupportedRRule("BYDAY".into()));
                }
                if !rule.by_month.is_empty() {
                    return Err(AdapterError::UnsupportedRRule("BYMONTH".into()));
                }
                if rule.by_month_day.len() > 1 {
                    return Err(AdapterError::UnsupportedRRule("BYMONTHDAY".into()));
                }
                pattern["type"] = json!("absoluteMonthly");
                let day = rule
                    .by_month_day
                    .first()
                    .map(|d| *d as u32)
                    .unwrap_or(chrono::Datelike::day(&anchor.date()));
                pattern["dayOfMonth"] = json!(day);
            }
            Frequency::Yearly => {
                if !rule.by_weekday.is_empty() {
                    return Err(AdapterError::UnsupportedRRule("BYDAY".into()));
                }
                if rule.by_month.len() > 1 {
                    return Err(AdapterError::UnsupportedRRule("BYMONTH".into()));
                }
                if rule.by_month_day.len() > 1 {
                    return Err(AdapterError::UnsupportedRRule("BYMONTHDAY".into()));
                }
                pattern["type"] = json!("absoluteYearly");
                pattern["month"] = json!(
                    rule.by_month
                        .first()
                        .map(|m| *m as u32)
                        .unwrap_or(chrono::Datelike::month(&anchor.date()))
                );
                pattern["dayOfMonth"] = json!(
                    rule.by_month_day
                        .first()
                        .map(|d| *d as u32)
                        .unwrap_or(chrono::Datelike::day(&anchor.date()))
                );
            }
        }

        let range = match rule.end {
            RuleEnd::Count(count) => json!({
                "type": "numbered",
                "numberOfOccurrences": count,
                "startDate": anchor.date().format("%Y-%m-%d").to_string(),
            }),
            RuleEnd::Until(until) => json!({
                "type": "endDate",
                "endDate": until.date().format("%Y-%m-%d").to_string(),
                "startDate": anchor.date().format("%Y-%m-%d").to_string(),
            }),
        };

        Ok(json!({ "pattern": pattern, "range": range }))
    }

    /// Reads a Graph recurrence object back into an RRULE string; returns
    /// None for pattern types outside the supported subset.
    fn recurrence_to_rrule(recurrence: &JsonValue) -> Option<String> {
        let pattern = recurrence.get("pattern")?;
        let range = recurrence.get("range")?;

        let mut parts = Vec::new();
        match pattern.get("type")?.as_str()? {
            "daily" => parts.push("FREQ=DAILY".to_string()),
            "weekly" => {
                parts.push("FREQ=WEEKLY".to_string());
                if let Some(days) = pattern.get("daysOfWeek").and_then(|d| d.as_array()) {
                    let codes: Vec<&str> = days
                        .iter()
                        .filter_map(|d| d.as_str())
                        .filter_map(|d| match d {
                            "monday" => Some("MO"),
                            "tuesday" => Some("TU"),
                            "wednesday" => Some("WE"),
                            "thursday" => Some("TH"),
                            "friday" => Some("FR"),
                            "saturday" => Some("SA"),
                            "sunday" => Some("SU"),
                            _ => None,
                        })
                        .collect();
                    if !codes.is_empty() {
                        parts.push(format!("BYDAY={}", codes.join(",")));
                    }
                }
            }
            "absoluteMonthly" => {
                parts.push("FREQ=MONTHLY".to_string());
                if let Some(day) = pattern.get("dayOfMonth").and_then(|d| d.as_u64()) {
                    parts.push(format!("BYMONTHDAY={day}"));
                }
            }
            "absoluteYearly" => {
                parts.push("FREQ=YEARLY".to_string());
                if let Some(month) = pattern.get("month").and_then(|m| m.as_u64()) {
                    parts.push(format!("BYMONTH={month}"));
                }
                if let Some(day) = pattern.get("dayOfMonth").and_then(|d| d.as_u64()) {
                    parts.push(format!("BYMONTHDAY={day}"));
                }
            }
            _ => return None,
        }

        if let Some(interval) = pattern.get("interval").and_then(|i| i.as_u64()) {
            if interval > 1 {
                parts.insert(1, format!("INTERVAL={interval}"));
            }
        }

        match range.get("type").and_then(|t| t.as_str()) {
            Some("numbered") => {
                let count = range.get("numberOfOccurrences").and_then(|c| c.as_u64())?;
                parts.push(format!("COUNT={count}"));
            }
            Some("endDate") => {
                let end = range.get("endDate").and_then(|e| e.as_str())?;
                let date = chrono::NaiveDate::parse_from_str(end, "%Y-%m-%d").ok()?;
                parts.push(format!("UNTIL={}T235959Z", date.format("%Y%m%d")));
            }
            _ => return None,
        }

        Some(parts.join(";"))
    }

    fn event_body(input: &EventInput) -> Result<JsonValue, AdapterError> {
        let mut body = json!({
            "subject": input.title,
            "body": { "contentType": "text", "content": input.description },
            "start": {
                "dateTime": input.start.format("%Y-%m-%dT%H:%M:%S").to_string(),
                "timeZone": "UTC",
            },
            "end": {
                "dateTime": input.end.format("%Y-%m-%dT%H:%M:%S").to_string(),
                "timeZone": "UTC",
            },
            "attendees": input
                .attendees
                .iter()
                .map(|attendee| {
                    json!({
                        "emailAddress": {
                            "address": attendee.email,
                            "name": attendee.name,
                        },
                        "status": { "response": rsvp_to_graph(attendee.status) },
                        "type": "required",
                    })
                })
                .collect::<Vec<_>>(),
        });

        if let Some(rule) = &input.recurrence_rule {
            if !input.is_recurring_instance {
                body["recurrence"] = Self::translate_rule(rule, input.start)?;
            }
        }
        Ok(body)
    }

    fn parse_event(&self, event: &JsonValue, calendar_id: &str) -> EventRecord {
        // Delta streams tombstone removed events instead of setting a status.
        let removed = event.get("@removed").is_some();
        let status = if removed
            || event.get("isCancelled").and_then(|c| c.as_bool()).unwrap_or(false)
        {
            EventStatus::Cancelled
        } else {
            EventStatus::Confirmed
        };

        let (start, start_tz) = parse_graph_time(event.get("start"));
        let (end, _) = parse_graph_time(event.get("end"));

        EventRecord {
            external_id: event
                .get("id")
                .and_then(|id| id.as_str())
                .unwrap_or_default()
                .to_string(),
            calendar_external_id: calendar_id.to_string(),
            title: event
                .get("subject")
                .and_then(|s| s.as_str())
                .unwrap_or_default()
                .to_string(),
            description: event
                .get("bodyPreview")
                .and_then(|b| b.as_str())
                .or_else(|| {
                    event
                        .get("body")
                        .and_then(|b| b.get("content"))
                        .and_then(|c| c.as_str())
                })
                .unwrap_or_default()
                .to_string(),
            start,
            end,
            timezone: event
                .get("originalStartTimeZone")
                .and_then(|tz| tz.as_str())
                .map(String::from)
                .or(start_tz),
            status,
            attendees: event
                .get("attendees")
                .and_then(|a| a.as_array())
                .map(|attendees| {
                    attendees
                        .iter()
                        .map(|attendee| AttendeeRecord {
                            email: attendee
                                .get("emailAddress")
                                .and_then(|e| e.get("address"))
                                .and_then(|a| a.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            name: attendee
                                .get("emailAddress")
                                .and_then(|e| e.get("name"))
                                .and_then(|n| n.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            status: rsvp_from_graph(
                                attendee
                                    .get("status")
                                    .and_then(|s| s.get("response"))
                                    .and_then(|r| r.as_str()),
                            ),
                        })
                        .collect()
                })
                .unwrap_or_default(),
            recurrence_rule: event
                .get("recurrence")
                .filter(|r| !r.is_null())
                .and_then(Self::recurrence_to_rrule),
            recurring_event_id: event
                .get("seriesMasterId")
                .and_then(|id| id.as_str())
                .map(String::from),
            original_payload: Some(event.clone()),
        }
    }

    pub async fn list_account_calendars(
        &self,
    ) -> Result<Vec<CalendarDescriptor>, AdapterError> {
        self.acquire(RateLimitClass::Read).await?;
        let body = self
            .send(self.http.get(format!("{}/me/calendars", self.api_base)))
            .await?
            .ok_or_else(|| AdapterError::Malformed("empty calendars response".into()))?;

        Ok(body
            .get("value")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .map(|item| CalendarDescriptor {
                        external_id: item
                            .get("id")
                            .and_then(|id| id.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        name: item
                            .get("name")
                            .and_then(|n| n.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        description: String::new(),
                        email: item
                            .get("owner")
                            .and_then(|o| o.get("address"))
                            .and_then(|a| a.as_str())
                            .map(String::from),
                        provider: CalendarProvider::Microsoft,
                        is_default: item
                            .get("isDefaultCalendar")
                            .and_then(|d| d.as_bool())
                            .unwrap_or(false),
                        original_payload: Some(item.clone()),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn create_calendar(&self, name: &str) -> Result<CalendarDescriptor, AdapterError> {
        self.acquire(RateLimitClass::Write).await?;
        let body = self
            .send(
                self.http
                    .post(format!("{}/me/calendars", self.api_base))
                    .json(&json!({ "name": name })),
            )
            .await?
            .ok_or_else(|| AdapterError::Malformed("empty calendar create response".into()))?;

        Ok(CalendarDescriptor {
            external_id: body
                .get("id")
                .and_then(|id| id.as_str())
                .unwrap_or_default()
                .to_string(),
            name: body
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or(name)
                .to_string(),
            description: String::new(),
            email: None,
            provider: CalendarProvider::Microsoft,
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
                        "{}/me/calendars/{}/events",
                        self.api_base, calendar_external_id
                    ))
                    .json(&Self::event_body(input)?),
            )
            .await?
            .ok_or_else(|| AdapterError::Malformed("empty event create response".into()))?;
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
                    .patch(format!(
                        "{}/me/calendars/{}/events/{}",
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
            "{}/me/calendars/{}/events/{}",
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
                "{}/me/calendars/{}/events/{}",
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

        let url = format!(
            "{}/me/calendars/{}/calendarView/delta",
            self.api_base, calendar_external_id
        );
        let mut query: Vec<(&str, String)> = Vec::new();
        match (page_token, sync_token) {
            (Some(skip), _) => query.push(("$skiptoken", skip.to_string())),
            (None, Some(delta)) => query.push(("$deltatoken", delta.to_string())),
            (None, None) => {
                query.push((
                    "startDateTime",
                    window.start.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                ));
                query.push((
                    "endDateTime",
                    window.end.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                ));
            }
        }

        let body = self
            .send(self.http.get(url).query(&query))
            .await?
            .ok_or_else(|| AdapterError::Malformed("empty delta response".into()))?;

        let events = body
            .get("value")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .map(|event| self.parse_event(event, calendar_external_id))
                    .collect()
            })
            .unwrap_or_default();

        let next_page_token = body
            .get("@odata.nextLink")
            .and_then(|l| l.as_str())
            .and_then(|link| extract_query_param(link, "$skiptoken"));
        let next_sync_token = body
            .get("@odata.deltaLink")
            .and_then(|l| l.as_str())
            .and_then(|link| extract_query_param(link, "$deltatoken"));

        Ok(EventPage {
            events,
            next_page_token,
            next_sync_token,
        })
    }

    pub async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, AdapterError> {
        self.acquire(RateLimitClass::Read).await?;
        let body = self
            .send(self.http.get(format!(
                "{}/places/microsoft.graph.room",
                self.api_base
            )))
            .await?
            .ok_or_else(|| AdapterError::Malformed("empty places response".into()))?;

        Ok(body
            .get("value")
            .and_then(|v| v.as_array())
            .map(|items| items.iter().map(parse_room).collect())
            .unwrap_or_default())
    }

    pub async fn get_resource(
        &self,
        resource_id: &str,
    ) -> Result<ResourceDescriptor, AdapterError> {
        self.acquire(RateLimitClass::Read).await?;
        let body = self
            .send(
                self.http
                    .get(format!("{}/places/{}", self.api_base, resource_id)),
            )
            .await?
            .ok_or(AdapterError::NotFound("resource"))?;
        Ok(parse_room(&body))
    }

    pub async fn available_resources(
        &self,
        window: TimeWindow,
    ) -> Result<Vec<ResourceDescriptor>, AdapterError> {
        let resources = self.list_resources().await?;
        let emails: Vec<&String> = resources.iter().filter_map(|r| r.email.as_ref()).collect();
        if emails.is_empty() {
            return Ok(resources);
        }

        self.acquire(RateLimitClass::Read).await?;
        let body = self
            .send(
                self.http
                    .post(format!("{}/me/calendar/getSchedule", self.api_base))
                    .json(&json!({
                        "schedules": emails,
                        "startTime": {
                            "dateTime": window.start.format("%Y-%m-%dT%H:%M:%S").to_string(),
                            "timeZone": "UTC",
                        },
                        "endTime": {
                            "dateTime": window.end.format("%Y-%m-%dT%H:%M:%S").to_string(),
                            "timeZone": "UTC",
                        },
                    })),
            )
            .await?
            .ok_or_else(|| AdapterError::Malformed("empty getSchedule response".into()))?;

        let mut busy_emails = std::collections::HashSet::new();
        if let Some(schedules) = body.get("value").and_then(|v| v.as_array()) {
            for schedule in schedules {
                let has_items = schedule
                    .get("scheduleItems")
                    .and_then(|items| items.as_array())
                    .map(|items| !items.is_empty())
                    .unwrap_or(false);
                if has_items {
                    if let Some(id) = schedule.get("scheduleId").and_then(|id| id.as_str()) {
                        busy_emails.insert(id.to_string());
                    }
                }
            }
        }

        Ok(resources
            .into_iter()
            .filter(|resource| {
                resource
                    .email
                    .as_ref()
                    .map(|email| !busy_emails.contains(email))
                    .unwrap_or(false)
            })
            .collect())
    }

    pub async fn create_subscription(
        &self,
        request: &SubscriptionRequest,
    ) -> Result<SubscriptionHandle, AdapterError> {
        self.acquire(RateLimitClass::Write).await?;
        let expiration = chrono::Utc::now() + chrono::Duration::seconds(request.ttl_secs);
        let body = self
            .send(
                self.http
                    .post(format!("{}/subscriptions", self.api_base))
                    .json(&json!({
                        "changeType": "created,updated,deleted",
                        "notificationUrl": request.callback_url,
                        "resource": format!("/me/calendars/{}/events", request.resource_external_id),
                        "expirationDateTime": expiration.to_rfc3339(),
                        "clientState": request.verification_token,
                    })),
            )
            .await?
            .ok_or_else(|| AdapterError::Malformed("empty subscription response".into()))?;

        Ok(SubscriptionHandle {
            external_subscription_id: body
                .get("id")
                .and_then(|id| id.as_str())
                .unwrap_or_default()
                .to_string(),
            external_resource_id: request.resource_external_id.clone(),
            channel_id: request.channel_id.clone(),
            verification_token: request.verification_token.clone(),
            callback_url: request.callback_url.clone(),
            expires_at: parse_expiration(&body).unwrap_or(expiration.naive_utc()),
        })
    }

    pub async fn renew_subscription(
        &self,
        handle: &SubscriptionHandle,
    ) -> Result<SubscriptionHandle, AdapterError> {
        self.acquire(RateLimitClass::Write).await?;
        let expiration = chrono::Utc::now() + chrono::Duration::days(3);
        let body = self
            .send(
                self.http
                    .patch(format!(
                        "{}/subscriptions/{}",
                        self.api_base, handle.external_subscription_id
                    ))
                    .json(&json!({ "expirationDateTime": expiration.to_rfc3339() })),
            )
            .await?
            .ok_or_else(|| AdapterError::Malformed("empty renew response".into()))?;

        Ok(SubscriptionHandle {
            expires_at: parse_expiration(&body).unwrap_or(expiration.naive_utc()),
            ..handle.clone()
        })
    }

    pub async fn cancel_subscription(
        &self,
        handle: &SubscriptionHandle,
    ) -> Result<(), AdapterError> {
        self.acquire(RateLimitClass::Write).await?;
        self.send(self.http.delete(format!(
            "{}/subscriptions/{}",
            self.api_base, handle.external_subscription_id
        )))
        .await?;
        Ok(())
    }

    pub fn parse_webhook(
        &self,
        headers: &HashMap<String, String>,
        body: &JsonValue,
    ) -> Result<ParsedNotification, AdapterError> {
        // The setup handshake arrives as a validationToken query parameter;
        // the HTTP layer surfaces it in the header map.
        if let Some(token) = headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("validationtoken"))
            .map(|(_, value)| value.clone())
        {
            return Ok(ParsedNotification::ValidationChallenge { token });
        }

        let first = body
            .get("value")
            .and_then(|v| v.as_array())
            .and_then(|v| v.first())
            .ok_or_else(|| AdapterError::Malformed("notification payload has no value".into()))?;

        let external_calendar_id = first
            .get("resource")
            .and_then(|r| r.as_str())
            .and_then(|resource| {
                resource_path_regex()
                    .captures(resource)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());

        Ok(ParsedNotification::Notification {
            event_type: first
                .get("changeType")
                .and_then(|c| c.as_str())
                .unwrap_or("notification")
                .to_string(),
            external_calendar_id,
        })
    }
}

fn parse_graph_time(value: Option<&JsonValue>) -> (NaiveDateTime, Option<String>) {
    let Some(value) = value else {
        return (NaiveDateTime::default(), None);
    };
    let timezone = value
        .get("timeZone")
        .and_then(|tz| tz.as_str())
        .map(String::from);
    let parsed = value
        .get("dateTime")
        .and_then(|dt| dt.as_str())
        .and_then(|dt| {
            NaiveDateTime::parse_from_str(dt, "%Y-%m-%dT%H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(dt, "%Y-%m-%dT%H:%M:%S"))
                .ok()
        })
        .unwrap_or_default();
    (parsed, timezone)
}

fn parse_expiration(body: &JsonValue) -> Option<NaiveDateTime> {
    body.get("expirationDateTime")
        .and_then(|e| e.as_str())
        .and_then(|e| chrono::DateTime::parse_from_rfc3339(e).ok())
        .map(|dt| dt.naive_utc())
}

fn parse_room(item: &JsonValue) -> ResourceDescriptor {
    ResourceDescriptor {
        external_id: item
            .get("id")
            .and_then(|id| id.as_str())
            .unwrap_or_default()
            .to_string(),
        name: item
            .get("displayName")
            .and_then(|n| n.as_str())
            .unwrap_or_default()
            .to_string(),
        description: String::new(),
        email: item
            .get("emailAddress")
            .and_then(|e| e.as_str())
            .map(String::from),
        capacity: item
            .get("capacity")
            .and_then(|c| c.as_i64())
            .map(|c| c as i32),
        original_payload: Some(item.clone()),
    }
}

fn extract_query_param(link: &str, name: &str) -> Option<String> {
    let url = url::Url::parse(link).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn anchor() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 2)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    #[test]
    fn rsvp_mapping_defaults_unknown_to_pending() {
        assert_eq!(rsvp_from_graph(Some("accepted")), RsvpStatus::Accepted);
        assert_eq!(rsvp_from_graph(Some("organizer")), RsvpStatus::Accepted);
        assert_eq!(rsvp_from_graph(Some("declined")), RsvpStatus::Declined);
        assert_eq!(rsvp_from_graph(Some("tentativelyAccepted")), RsvpStatus::Pending);
        assert_eq!(rsvp_from_graph(Some("huh")), RsvpStatus::Pending);
        assert_eq!(rsvp_from_graph(None), RsvpStatus::Pending);
    }

    #[test]
    fn weekly_rule_translates_to_graph_pattern() {
        let rule = RuleSpec::from_rrule_str("FREQ=WEEKLY;INTERVAL=2;COUNT=8;BYDAY=MO,WE").unwrap();
        let recurrence = MicrosoftCalendarAdapter::translate_rule(&rule, anchor()).unwrap();
        assert_eq!(recurrence["pattern"]["type"], "weekly");
        assert_eq!(recurrence["pattern"]["interval"], 2);
        assert_eq!(
            recurrence["pattern"]["daysOfWeek"],
            json!(["monday", "wednesday"])
        );
        assert_eq!(recurrence["range"]["type"], "numbered");
        assert_eq!(recurrence["range"]["numberOfOccurrences"], 8);
    }

    #[test]
    fn unsupported_components_fail_with_offending_key() {
        let rule =
            RuleSpec::from_rrule_str("FREQ=MONTHLY;COUNT=3;BYMONTHDAY=1,15").unwrap();
        let err = MicrosoftCalendarAdapter::translate_rule(&rule, anchor()).unwrap_err();
        assert!(matches!(err, AdapterError::UnsupportedRRule(key) if key == "BYMONTHDAY"));

        let rule = RuleSpec::from_rrule_str("FREQ=DAILY;COUNT=3;BYDAY=MO").unwrap();
        let err = MicrosoftCalendarAdapter::translate_rule(&rule, anchor()).unwrap_err();
        assert!(matches!(err, AdapterError::UnsupportedRRule(key) if key == "BYDAY"));
    }

    #[test]
    fn graph_recurrence_round_trips_to_rrule() {
        let rule = RuleSpec::from_rrule_str("FREQ=WEEKLY;INTERVAL=2;COUNT=8;BYDAY=MO,WE").unwrap();
        let recurrence = MicrosoftCalendarAdapter::translate_rule(&rule, anchor()).unwrap();
        let rrule = MicrosoftCalendarAdapter::recurrence_to_rrule(&recurrence).unwrap();
        assert_eq!(RuleSpec::from_rrule_str(&rrule).unwrap(), rule);
    }

    #[test]
    fn removed_delta_entries_are_cancelled() {
        let adapter_event = json!({
            "id": "evt-1",
            "@removed": { "reason": "deleted" },
        });
        let rate_limiter = Arc::new(RateLimiter::new(Default::default()));
        let adapter = MicrosoftCalendarAdapter::new(
            "https://graph.example.com/v1.0".into(),
            "acct".into(),
            "token".into(),
            rate_limiter,
        );
        let record = adapter.parse_event(&adapter_event, "cal-1");
        assert_eq!(record.status, EventStatus::Cancelled);
        assert_eq!(record.external_id, "evt-1");
    }

    #[test]
    fn validation_token_short_circuits_parsing() {
        let rate_limiter = Arc::new(RateLimiter::new(Default::default()));
        let adapter = MicrosoftCalendarAdapter::new(
            "https://graph.example.com/v1.0".into(),
            "acct".into(),
            "token".into(),
            rate_limiter,
        );
        let mut headers = HashMap::new();
        headers.insert(
            "validationToken".to_string(),
            "f6c2e504-4a92-4a5c-9b35-d9c1c2a6ab10".to_string(),
        );
        let parsed = adapter.parse_webhook(&headers, &json!({})).unwrap();
        assert_eq!(
            parsed,
            ParsedNotification::ValidationChallenge {
                token: "f6c2e504-4a92-4a5c-9b35-d9c1c2a6ab10".to_string()
            }
        );
    }
}
