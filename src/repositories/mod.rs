//! # Repository Layer
//!
//! Tenant-scoped data access. Every repository takes a [`TenantContext`] and
//! binds the tenant id into each query, including deletes and joins.

pub mod attendance;
pub mod available_time;
pub mod blocked_time;
pub mod calendar;
pub mod calendar_sync;
pub mod event;
pub mod recurrence_rule;
pub mod tenant;
pub mod webhook;

pub use attendance::AttendanceRepository;
pub use available_time::AvailableTimeRepository;
pub use blocked_time::{BlockedTimeRepository, NewBlockedTime};
pub use calendar::{CalendarRepository, NewCalendar};
pub use calendar_sync::CalendarSyncRepository;
pub use event::{
    EventRepository, NewEvent, ORIGINAL_PAYLOAD_META_KEY, PENDING_PARENT_META_KEY,
};
pub use recurrence_rule::RecurrenceRuleRepository;
pub use tenant::{TenantContext, TenantRepository};
pub use webhook::WebhookRepository;
