//! CalendarEvent entity model.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

use super::enums::EventStatus;

/// An event on a calendar.
///
/// Intervals are stored as UTC-naive `start_at`/`end_at` plus the IANA
/// `timezone` the event was authored in. Recurring masters carry
/// `recurrence_rule_id`; exceptions/instances carry `parent_event_id` and the
/// `recurrence_id` of the occurrence they replace. A series fork points at its
/// predecessor through `bulk_modification_parent_id`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "calendar_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub calendar_id: Uuid,

    pub title: String,
    pub description: String,

    /// Interval start, UTC naive.
    pub start_at: DateTime,
    /// Interval end, UTC naive. `end_at >= start_at`.
    pub end_at: DateTime,
    /// IANA timezone the wall times were authored in.
    pub timezone: String,

    /// Provider event id; empty for internal-only events.
    pub external_id: String,

    pub status: EventStatus,

    pub recurrence_rule_id: Option<Uuid>,

    /// Master event this row is an instance/exception of.
    pub parent_event_id: Option<Uuid>,

    /// Original occurrence start this exception replaces (UTC naive).
    pub recurrence_id: Option<DateTime>,

    pub is_recurring_exception: bool,

    /// Predecessor series this event supersedes from `start_at` onward.
    pub bulk_modification_parent_id: Option<Uuid>,

    /// Free-form metadata; holds `latest_original_payload` and, for orphaned
    /// recurring instances, `pending_parent_external_id`.
    #[sea_orm(column_type = "JsonBinary")]
    pub meta: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::calendar::Entity",
        from = "Column::CalendarId",
        to = "super::calendar::Column::Id"
    )]
    Calendar,
    #[sea_orm(
        belongs_to = "super::recurrence_rule::Entity",
        from = "Column::RecurrenceRuleId",
        to = "super::recurrence_rule::Column::Id"
    )]
    RecurrenceRule,
    #[sea_orm(
        belongs_to = "Entity",
        from = "Column::ParentEventId",
        to = "Column::Id"
    )]
    ParentEvent,
}

impl Related<super::calendar::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Calendar.def()
    }
}

impl Related<super::recurrence_rule::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RecurrenceRule.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether this row is a recurring master.
    pub fn is_recurring(&self) -> bool {
        self.recurrence_rule_id.is_some() && self.parent_event_id.is_none()
    }
}
