//! BlockedTime entity model.
//!
//! Opaque busy time. Provider-originated events we do not manage are mirrored
//! here (carrying their `external_id`) so future syncs stay authoritative.
//! Shares the recurrence/exception/continuation structure with CalendarEvent.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "blocked_times")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub calendar_id: Uuid,

    pub start_at: DateTime,
    pub end_at: DateTime,
    pub timezone: String,

    /// Human-readable reason; sync mirrors the provider event title here.
    pub reason: String,

    /// Provider event id for provider-originated blocks; empty for manual ones.
    pub external_id: String,

    pub recurrence_rule_id: Option<Uuid>,
    pub recurrence_id: Option<DateTime>,
    pub is_recurring_exception: bool,
    pub bulk_modification_parent_id: Option<Uuid>,

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
}

impl Related<super::calendar::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Calendar.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
