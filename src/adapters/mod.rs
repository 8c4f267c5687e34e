//! Provider adapters.
//!
//! Each provider implements the same uniform operation set behind the closed
//! [`ProviderAdapter`] enum; the sync engine and webhook pipeline never switch
//! on provider themselves. Adapters own the wire translation, the RSVP status
//! maps, the recurrence translation, and the rate-limit buckets.

pub mod google;
pub mod internal;
pub mod microsoft;
pub mod types;

pub use google::GoogleCalendarAdapter;
pub use internal::InternalCalendarAdapter;
pub use microsoft::MicrosoftCalendarAdapter;
pub use types::{
    AttendeeRecord, CalendarDescriptor, EventInput, EventPage, EventRecord, ParsedNotification,
    ResourceDescriptor, SubscriptionHandle, SubscriptionRequest,
};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::models::CalendarProvider;
use crate::rate_limit::RateLimitExceeded;

/// Failures surfaced by provider adapters.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("provider authentication expired: {0}")]
    AuthExpired(String),

    #[error("invalid provider credentials: {0}")]
    InvalidCredentials(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("provider rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("malformed provider payload: {0}")]
    Malformed(String),

    #[error("provider operation timed out after {0}s")]
    Timeout(u64),

    #[error("unsupported RRULE component: {0}")]
    UnsupportedRRule(String),
}

impl From<RateLimitExceeded> for AdapterError {
    fn from(err: RateLimitExceeded) -> Self {
        AdapterError::RateLimited {
            retry_after_secs: Some(err.retry_after_secs),
        }
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AdapterError::Timeout(30)
        } else if err.is_decode() {
            AdapterError::Malformed(err.to_string())
        } else {
            AdapterError::ProviderUnavailable(err.to_string())
        }
    }
}

/// Maps an HTTP error status from a provider to the taxonomy.
pub(crate) fn error_from_status(status: reqwest::StatusCode, body: &str) -> AdapterError {
    match status.as_u16() {
        401 => AdapterError::AuthExpired(body.to_string()),
        403 => AdapterError::InvalidCredentials(body.to_string()),
        404 => AdapterError::NotFound("provider resource"),
        429 => AdapterError::RateLimited {
            retry_after_secs: None,
        },
        500..=599 => AdapterError::ProviderUnavailable(format!("{status}: {body}")),
        _ => AdapterError::Malformed(format!("{status}: {body}")),
    }
}

/// Interval parameters for event listings, UTC naive.
#[derive(Debug, Clone, Copy)]
pub struct TimeWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// The closed set of provider implementations.
///
/// Dispatch is a match, not a registry; adding a provider means adding a
/// variant and implementing the same operation set.
pub enum ProviderAdapter {
    Google(GoogleCalendarAdapter),
    Microsoft(MicrosoftCalendarAdapter),
    Internal(InternalCalendarAdapter),
}

macro_rules! delegate {
    ($self:ident, $adapter:ident => $body:expr) => {
        match $self {
            ProviderAdapter::Google($adapter) => $body,
            ProviderAdapter::Microsoft($adapter) => $body,
            ProviderAdapter::Internal($adapter) => $body,
        }
    };
}

impl ProviderAdapter {
    pub fn provider(&self) -> CalendarProvider {
        match self {
            ProviderAdapter::Google(_) => CalendarProvider::Google,
            ProviderAdapter::Microsoft(_) => CalendarProvider::Microsoft,
            ProviderAdapter::Internal(_) => CalendarProvider::Internal,
        }
    }

    pub async fn list_account_calendars(
        &self,
    ) -> Result<Vec<CalendarDescriptor>, AdapterError> {
        delegate!(self, a => a.list_account_calendars().await)
    }

    pub async fn create_calendar(&self, name: &str) -> Result<CalendarDescriptor, AdapterError> {
        delegate!(self, a => a.create_calendar(name).await)
    }

    pub async fn create_event(
        &self,
        calendar_external_id: &str,
        input: &EventInput,
    ) -> Result<EventRecord, AdapterError> {
        delegate!(self, a => a.create_event(calendar_external_id, input).await)
    }

    pub async fn update_event(
        &self,
        calendar_external_id: &str,
        external_event_id: &str,
        input: &EventInput,
    ) -> Result<EventRecord, AdapterError> {
        delegate!(self, a => a.update_event(calendar_external_id, external_event_id, input).await)
    }

    pub async fn delete_event(
        &self,
        calendar_external_id: &str,
        external_event_id: &str,
    ) -> Result<(), AdapterError> {
        delegate!(self, a => a.delete_event(calendar_external_id, external_event_id).await)
    }

    pub async fn get_event(
        &self,
        calendar_external_id: &str,
        external_event_id: &str,
    ) -> Result<EventRecord, AdapterError> {
        delegate!(self, a => a.get_event(calendar_external_id, external_event_id).await)
    }

    /// One page of events in the window. With a `sync_token`, deleted events
    /// appear with `status = cancelled`; without one, only live events appear.
    pub async fn list_events_page(
        &self,
        calendar_external_id: &str,
        window: TimeWindow,
        sync_token: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<EventPage, AdapterError> {
        delegate!(self, a => a.list_events_page(calendar_external_id, window, sync_token, page_token).await)
    }

    pub async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, AdapterError> {
        delegate!(self, a => a.list_resources().await)
    }

    pub async fn get_resource(&self, resource_id: &str) -> Result<ResourceDescriptor, AdapterError> {
        delegate!(self, a => a.get_resource(resource_id).await)
    }

    /// Resources free across the whole window.
    pub async fn available_resources(
        &self,
        window: TimeWindow,
    ) -> Result<Vec<ResourceDescriptor>, AdapterError> {
        delegate!(self, a => a.available_resources(window).await)
    }

    pub async fn create_subscription(
        &self,
        request: &SubscriptionRequest,
    ) -> Result<SubscriptionHandle, AdapterError> {
        delegate!(self, a => a.create_subscription(request).await)
    }

    pub async fn renew_subscription(
        &self,
        handle: &SubscriptionHandle,
    ) -> Result<SubscriptionHandle, AdapterError> {
        delegate!(self, a => a.renew_subscription(handle).await)
    }

    pub async fn cancel_subscription(
        &self,
        handle: &SubscriptionHandle,
    ) -> Result<(), AdapterError> {
        delegate!(self, a => a.cancel_subscription(handle).await)
    }

    /// Parses an inbound push notification into the uniform form.
    pub fn parse_webhook(
        &self,
        headers: &HashMap<String, String>,
        body: &serde_json::Value,
    ) -> Result<ParsedNotification, AdapterError> {
        delegate!(self, a => a.parse_webhook(headers, body))
    }
}

/// Constructor-injected set of adapters, one per provider the deployment
/// talks to. The internal adapter is always present.
pub struct AdapterRegistry {
    adapters: HashMap<CalendarProvider, Arc<ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new(internal: InternalCalendarAdapter) -> Self {
        let mut adapters = HashMap::new();
        adapters.insert(
            CalendarProvider::Internal,
            Arc::new(ProviderAdapter::Internal(internal)),
        );
        Self { adapters }
    }

    pub fn with_google(mut self, adapter: GoogleCalendarAdapter) -> Self {
        self.adapters.insert(
            CalendarProvider::Google,
            Arc::new(ProviderAdapter::Google(adapter)),
        );
        self
    }

    pub fn with_microsoft(mut self, adapter: MicrosoftCalendarAdapter) -> Self {
        self.adapters.insert(
            CalendarProvider::Microsoft,
            Arc::new(ProviderAdapter::Microsoft(adapter)),
        );
        self
    }

    pub fn adapter_for(&self, provider: CalendarProvider) -> Option<Arc<ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }
}
