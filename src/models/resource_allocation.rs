//! A calendar allocated to an event as a resource.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

use super::enums::RsvpStatus;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "resource_allocations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub event_id: Uuid,
    pub resource_calendar_id: Uuid,
    pub status: RsvpStatus,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::calendar_event::Entity",
        from = "Column::EventId",
        to = "super::calendar_event::Column::Id"
    )]
    Event,
    #[sea_orm(
        belongs_to = "super::calendar::Entity",
        from = "Column::ResourceCalendarId",
        to = "super::calendar::Column::Id"
    )]
    ResourceCalendar,
}

impl Related<super::calendar_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Event.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
