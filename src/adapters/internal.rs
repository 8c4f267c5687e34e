//! Internal calendar adapter.
//!
//! Backs virtual calendars with an in-memory store instead of a remote API.
//! Every mutation bumps a version counter; the version doubles as the sync
//! token, so incremental listings replay exactly the changes (including
//! deletions, surfaced as cancelled records) since the caller's last pull.
//! Tests lean on this adapter as the deterministic provider double.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::Value as JsonValue;

use crate::models::enums::{CalendarProvider, EventStatus};

use super::types::{
    CalendarDescriptor, EventInput, EventPage, EventRecord, ParsedNotification,
    ResourceDescriptor, SubscriptionHandle, SubscriptionRequest,
};
use super::{AdapterError, TimeWindow};

const PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
struct StoredEvent {
    record: EventRecord,
    version: u64,
    deleted: bool,
}

#[derive(Default)]
struct InternalStore {
    version: u64,
    next_id: u64,
    calendars: BTreeMap<String, CalendarDescriptor>,
    resources: BTreeMap<String, ResourceDescriptor>,
    /// Keyed by (calendar external id, event external id).
    events: BTreeMap<(String, String), StoredEvent>,
}

impl InternalStore {
    fn bump(&mut self) -> u64 {
        self.version += 1;
        self.version
    }
}

#[derive(Clone, Default)]
pub struct InternalCalendarAdapter {
    store: Arc<Mutex<InternalStore>>,
}

impl InternalCalendarAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InternalStore> {
        self.store.lock().expect("internal store lock poisoned")
    }

    /// Seeds a calendar directly; used by provisioning and tests.
    pub fn seed_calendar(&self, descriptor: CalendarDescriptor) {
        let mut store = self.lock();
        store.calendars.insert(descriptor.external_id.clone(), descriptor);
    }

    /// Seeds a resource directly; used by provisioning and tests.
    pub fn seed_resource(&self, descriptor: ResourceDescriptor) {
        let mut store = self.lock();
        store.resources.insert(descriptor.external_id.clone(), descriptor);
    }

    /// Inserts or replaces an event record verbatim; used by tests to stage
    /// provider-side state.
    pub fn seed_event(&self, record: EventRecord) {
        let mut store = self.lock();
        let version = store.bump();
        store.events.insert(
            (record.calendar_external_id.clone(), record.external_id.clone()),
            StoredEvent {
                record,
                version,
                deleted: false,
            },
        );
    }

    /// Marks a seeded event deleted so the next incremental pull streams it
    /// as cancelled.
    pub fn seed_delete(&self, calendar_external_id: &str, external_event_id: &str) {
        let mut store = self.lock();
        let version = store.bump();
        if let Some(stored) = store
            .events
            .get_mut(&(calendar_external_id.to_string(), external_event_id.to_string()))
        {
            stored.deleted = true;
            stored.version = version;
            stored.record.status = EventStatus::Cancelled;
        }
    }

    /// Current sync token without consuming changes.
    pub fn current_sync_token(&self) -> String {
        self.lock().version.to_string()
    }

    pub async fn list_account_calendars(
        &self,
    ) -> Result<Vec<CalendarDescriptor>, AdapterError> {
        Ok(self.lock().calendars.values().cloned().collect())
    }

    pub async fn create_calendar(&self, name: &str) -> Result<CalendarDescriptor, AdapterError> {
        let mut store = self.lock();
        store.next_id += 1;
        let descriptor = CalendarDescriptor {
            external_id: format!("internal-cal-{}", store.next_id),
            name: name.to_string(),
            description: String::new(),
            email: None,
            provider: CalendarProvider::Internal,
            is_default: false,
            original_payload: None,
        };
        store
            .calendars
            .insert(descriptor.external_id.clone(), descriptor.clone());
        Ok(descriptor)
    }

    pub async fn create_event(
        &self,
        calendar_external_id: &str,
        input: &EventInput,
    ) -> Result<EventRecord, AdapterError> {
        let mut store = self.lock();
        store.next_id += 1;
        let external_id = format!("internal-evt-{}", store.next_id);
        let record = EventRecord {
            external_id: external_id.clone(),
            calendar_external_id: calendar_external_id.to_string(),
            title: input.title.clone(),
            description: input.description.clone(),
            start: input.start,
            end: input.end,
            timezone: Some(input.timezone.clone()),
            status: EventStatus::Confirmed,
            attendees: input.attendees.clone(),
            recurrence_rule: input
                .recurrence_rule
                .as_ref()
                .map(|rule| rule.to_rrule_string()),
            recurring_event_id: None,
            original_payload: None,
        };
        let version = store.bump();
        store.events.insert(
            (calendar_external_id.to_string(), external_id),
            StoredEvent {
                record: record.clone(),
                version,
                deleted: false,
            },
        );
        Ok(record)
    }

    pub async fn update_event(
        &self,
        calendar_external_id: &str,
        external_event_id: &str,
        input: &EventInput,
    ) -> Result<EventRecord, AdapterError> {
        let mut store = self.lock();
        let version = store.bump();
        let stored = store
            .events
            .get_mut(&(
                calendar_external_id.to_string(),
                external_event_id.to_string(),
            ))
            .filter(|stored| !stored.deleted)
            .ok_or(AdapterError::NotFound("event"))?;

        stored.record.title = input.title.clone();
        stored.record.description = input.description.clone();
        stored.record.start = input.start;
        stored.record.end = input.end;
        stored.record.timezone = Some(input.timezone.clone());
        stored.record.attendees = input.attendees.clone();
        stored.record.recurrence_rule = input
            .recurrence_rule
            .as_ref()
            .map(|rule| rule.to_rrule_string());
        stored.version = version;
        Ok(stored.record.clone())
    }

    pub async fn delete_event(
        &self,
        calendar_external_id: &str,
        external_event_id: &str,
    ) -> Result<(), AdapterError> {
        let mut store = self.lock();
        let version = store.bump();
        let stored = store
            .events
            .get_mut(&(
                calendar_external_id.to_string(),
                external_event_id.to_string(),
            ))
            .ok_or(AdapterError::NotFound("event"))?;
        stored.deleted = true;
        stored.version = version;
        stored.record.status = EventStatus::Cancelled;
        Ok(())
    }

    pub async fn get_event(
        &self,
        calendar_external_id: &str,
        external_event_id: &str,
    ) -> Result<EventRecord, AdapterError> {
        self.lock()
            .events
            .get(&(
                calendar_external_id.to_string(),
                external_event_id.to_string(),
            ))
            .filter(|stored| !stored.deleted)
            .map(|stored| stored.record.clone())
            .ok_or(AdapterError::NotFound("event"))
    }

    pub async fn list_events_page(
        &self,
        calendar_external_id: &str,
        window: TimeWindow,
        sync_token: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<EventPage, AdapterError> {
        let store = self.lock();
        let since: Option<u64> = match sync_token {
            Some(token) => Some(
                token
                    .parse()
                    .map_err(|_| AdapterError::Malformed("invalid sync token".into()))?,
            ),
            None => None,
        };
        let offset: usize = match page_token {
            Some(token) => token
                .parse()
                .map_err(|_| AdapterError::Malformed("invalid page token".into()))?,
            None => 0,
        };

        let matching: Vec<EventRecord> = store
            .events
            .values()
            .filter(|stored| stored.record.calendar_external_id == calendar_external_id)
            .filter(|stored| match since {
                // Incremental: every change since the cursor, deletions included.
                Some(version) => stored.version > version,
                // Full: live events intersecting the window.
                None => {
                    !stored.deleted
                        && stored.record.start < window.end
                        && stored.record.end > window.start
                }
            })
            .map(|stored| stored.record.clone())
            .collect();

        let page: Vec<EventRecord> = matching.iter().skip(offset).take(PAGE_SIZE).cloned().collect();
        let has_more = offset + page.len() < matching.len();

        Ok(EventPage {
            events: page,
            next_page_token: has_more.then(|| (offset + PAGE_SIZE).to_string()),
            next_sync_token: (!has_more).then(|| store.version.to_string()),
        })
    }

    pub async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, AdapterError> {
        Ok(self.lock().resources.values().cloned().collect())
    }

    pub async fn get_resource(
        &self,
        resource_id: &str,
    ) -> Result<ResourceDescriptor, AdapterError> {
        self.lock()
            .resources
            .get(resource_id)
            .cloned()
            .ok_or(AdapterError::NotFound("resource"))
    }

    pub async fn available_resources(
        &self,
        window: TimeWindow,
    ) -> Result<Vec<ResourceDescriptor>, AdapterError> {
        let store = self.lock();
        Ok(store
            .resources
            .values()
            .filter(|resource| {
                let busy = store.events.values().any(|stored| {
                    !stored.deleted
                        && stored.record.calendar_external_id == resource.external_id
                        && stored.record.start < window.end
                        && stored.record.end > window.start
                });
                !busy
            })
            .cloned()
            .collect())
    }

    pub async fn create_subscription(
        &self,
        _request: &SubscriptionRequest,
    ) -> Result<SubscriptionHandle, AdapterError> {
        Err(AdapterError::ProviderUnavailable(
            "internal calendars do not push notifications".into(),
        ))
    }

    pub async fn renew_subscription(
        &self,
        _handle: &SubscriptionHandle,
    ) -> Result<SubscriptionHandle, AdapterError> {
        Err(AdapterError::ProviderUnavailable(
            "internal calendars do not push notifications".into(),
        ))
    }

    pub async fn cancel_subscription(
        &self,
        _handle: &SubscriptionHandle,
    ) -> Result<(), AdapterError> {
        Ok(())
    }

    pub fn parse_webhook(
        &self,
        _headers: &HashMap<String, String>,
        _body: &JsonValue,
    ) -> Result<ParsedNotification, AdapterError> {
        Err(AdapterError::Malformed(
            "internal calendars do not receive webhooks".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(d: u32, h: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn window() -> TimeWindow {
        TimeWindow {
            start: dt(1, 0),
            end: dt(30, 0),
        }
    }

    fn input(title: &str, day: u32) -> EventInput {
        EventInput {
            title: title.to_string(),
            description: String::new(),
            start: dt(day, 9),
            end: dt(day, 10),
            timezone: "UTC".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn full_listing_returns_live_events_only() {
        let adapter = InternalCalendarAdapter::new();
        adapter.create_event("cal", &input("a", 2)).await.unwrap();
        let deleted = adapter.create_event("cal", &input("b", 3)).await.unwrap();
        adapter
            .delete_event("cal", &deleted.external_id)
            .await
            .unwrap();

        let page = adapter
            .list_events_page("cal", window(), None, None)
            .await
            .unwrap();
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].title, "a");
        assert!(page.next_sync_token.is_some());
    }

    #[tokio::test]
    async fn incremental_listing_streams_deletions_as_cancelled() {
        let adapter = InternalCalendarAdapter::new();
        let event = adapter.create_event("cal", &input("a", 2)).await.unwrap();

        let token = adapter
            .list_events_page("cal", window(), None, None)
            .await
            .unwrap()
            .next_sync_token
            .unwrap();

        adapter.delete_event("cal", &event.external_id).await.unwrap();

        let page = adapter
            .list_events_page("cal", window(), Some(&token), None)
            .await
            .unwrap();
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].status, EventStatus::Cancelled);
        assert_eq!(page.events[0].external_id, event.external_id);
    }

    #[tokio::test]
    async fn incremental_listing_is_empty_when_nothing_changed() {
        let adapter = InternalCalendarAdapter::new();
        adapter.create_event("cal", &input("a", 2)).await.unwrap();
        let token = adapter
            .list_events_page("cal", window(), None, None)
            .await
            .unwrap()
            .next_sync_token
            .unwrap();

        let page = adapter
            .list_events_page("cal", window(), Some(&token), None)
            .await
            .unwrap();
        assert!(page.events.is_empty());
    }
}
