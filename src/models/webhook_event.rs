//! WebhookEvent entity model: append-only record of inbound notifications.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

use super::enums::{CalendarProvider, WebhookProcessingStatus};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "webhook_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub provider: CalendarProvider,

    /// Provider resource state or notification kind.
    pub event_type: String,

    /// Calendar the notification refers to, as the provider names it.
    pub external_calendar_id: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub raw_payload: JsonValue,

    #[sea_orm(column_type = "JsonBinary")]
    pub headers: JsonValue,

    pub processing_status: WebhookProcessingStatus,
    pub error_message: Option<String>,
    pub processed_at: Option<DateTimeWithTimeZone>,

    /// The CalendarSync this notification coalesced onto or enqueued.
    pub calendar_sync_id: Option<Uuid>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::calendar_sync::Entity",
        from = "Column::CalendarSyncId",
        to = "super::calendar_sync::Column::Id"
    )]
    CalendarSync,
}

impl Related<super::calendar_sync::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CalendarSync.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
