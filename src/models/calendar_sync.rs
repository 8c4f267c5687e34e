//! CalendarSync entity model.
//!
//! A row records one synchronization of a calendar over [start_at, end_at]
//! and doubles as the claimable unit of work for the job runner. Scheduling
//! columns (scheduled_at, attempts, retry_after) drive retry/backoff.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

use super::enums::CalendarSyncStatus;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "calendar_syncs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub calendar_id: Uuid,

    /// Window start, UTC naive.
    pub start_at: DateTime,
    /// Window end, UTC naive.
    pub end_at: DateTime,

    pub status: CalendarSyncStatus,

    /// Whether existing local mirrors are updated from the provider stream.
    pub should_update_events: bool,

    /// Provider cursor recorded on incremental success.
    pub next_sync_token: Option<String>,

    /// Failure detail when status is `failed`.
    pub error_message: Option<String>,

    pub attempts: i32,
    pub scheduled_at: DateTimeWithTimeZone,
    pub retry_after: Option<DateTimeWithTimeZone>,
    pub started_at: Option<DateTimeWithTimeZone>,
    pub finished_at: Option<DateTimeWithTimeZone>,

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
}

impl Related<super::calendar::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Calendar.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
