//! Wire-neutral records exchanged with provider adapters.

use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;

use crate::models::enums::{CalendarProvider, EventStatus, RsvpStatus};
use crate::recurrence::RuleSpec;

/// A calendar as the provider describes it.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarDescriptor {
    pub external_id: String,
    pub name: String,
    pub description: String,
    pub email: Option<String>,
    pub provider: CalendarProvider,
    pub is_default: bool,
    pub original_payload: Option<JsonValue>,
}

/// A bookable resource (room, equipment) as the provider describes it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDescriptor {
    pub external_id: String,
    pub name: String,
    pub description: String,
    pub email: Option<String>,
    pub capacity: Option<i32>,
    pub original_payload: Option<JsonValue>,
}

/// Attendee state on a provider event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendeeRecord {
    pub email: String,
    pub name: String,
    pub status: RsvpStatus,
}

/// A provider event normalized into the uniform model.
///
/// `start`/`end` are UTC naive; `timezone` preserves the provider's IANA zone
/// when the payload carries one.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub external_id: String,
    pub calendar_external_id: String,
    pub title: String,
    pub description: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub timezone: Option<String>,
    pub status: EventStatus,
    pub attendees: Vec<AttendeeRecord>,
    /// Raw RRULE string as the provider sent it; parsed downstream.
    pub recurrence_rule: Option<String>,
    /// Master event id when this record is a recurring instance.
    pub recurring_event_id: Option<String>,
    pub original_payload: Option<JsonValue>,
}

/// Input for creating or updating a provider event.
#[derive(Debug, Clone, Default)]
pub struct EventInput {
    pub title: String,
    pub description: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// IANA timezone the wall times were authored in.
    pub timezone: String,
    pub attendees: Vec<AttendeeRecord>,
    pub recurrence_rule: Option<RuleSpec>,
    pub is_recurring_instance: bool,
}

/// One page of a (possibly incremental) event listing.
#[derive(Debug, Clone, Default)]
pub struct EventPage {
    pub events: Vec<EventRecord>,
    /// Present while more pages remain.
    pub next_page_token: Option<String>,
    /// Present on the final page; cursor for the next incremental sync.
    pub next_sync_token: Option<String>,
}

/// Provider-side identity of a push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub external_subscription_id: String,
    pub external_resource_id: String,
    pub channel_id: String,
    pub verification_token: String,
    pub callback_url: String,
    /// Expiry instant, UTC naive.
    pub expires_at: NaiveDateTime,
}

/// Request to arm a push channel for a provider resource.
#[derive(Debug, Clone)]
pub struct SubscriptionRequest {
    pub resource_external_id: String,
    pub callback_url: String,
    pub channel_id: String,
    pub verification_token: String,
    pub ttl_secs: i64,
}

/// Outcome of parsing an inbound push notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedNotification {
    /// A change notification naming the affected calendar.
    Notification {
        event_type: String,
        external_calendar_id: String,
    },
    /// A subscription handshake; respond with the token and stop.
    ValidationChallenge { token: String },
}
