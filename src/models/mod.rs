//! # Data Models
//!
//! SeaORM entities for the calendar core, one module per table.

pub mod available_time;
pub mod blocked_time;
pub mod calendar;
pub mod calendar_event;
pub mod calendar_sync;
pub mod children_calendar_relationship;
pub mod enums;
pub mod event_attendance;
pub mod event_external_attendance;
pub mod external_attendee;
pub mod recurrence_rule;
pub mod resource_allocation;
pub mod tenant;
pub mod webhook_event;
pub mod webhook_subscription;

pub use available_time::Entity as AvailableTime;
pub use blocked_time::Entity as BlockedTime;
pub use calendar::Entity as Calendar;
pub use calendar_event::Entity as CalendarEvent;
pub use calendar_sync::Entity as CalendarSync;
pub use children_calendar_relationship::Entity as ChildrenCalendarRelationship;
pub use enums::{
    CalendarKind, CalendarProvider, CalendarSyncStatus, EventStatus, RsvpStatus,
    WebhookProcessingStatus,
};
pub use event_attendance::Entity as EventAttendance;
pub use event_external_attendance::Entity as EventExternalAttendance;
pub use external_attendee::Entity as ExternalAttendee;
pub use recurrence_rule::Entity as RecurrenceRule;
pub use resource_allocation::Entity as ResourceAllocation;
pub use tenant::Entity as Tenant;
pub use webhook_event::Entity as WebhookEvent;
pub use webhook_subscription::Entity as WebhookSubscription;
