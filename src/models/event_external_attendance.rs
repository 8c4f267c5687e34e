//! External attendee attendance on an event.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

use super::enums::RsvpStatus;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "event_external_attendances")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub event_id: Uuid,
    pub external_attendee_id: Uuid,
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
        belongs_to = "super::external_attendee::Entity",
        from = "Column::ExternalAttendeeId",
        to = "super::external_attendee::Column::Id"
    )]
    ExternalAttendee,
}

impl Related<super::calendar_event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Event.def()
    }
}

impl Related<super::external_attendee::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ExternalAttendee.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
