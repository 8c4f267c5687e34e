//! Bundle membership join table.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "children_calendar_relationships")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub parent_calendar_id: Uuid,
    pub child_calendar_id: Uuid,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::calendar::Entity",
        from = "Column::ParentCalendarId",
        to = "super::calendar::Column::Id"
    )]
    ParentCalendar,
    #[sea_orm(
        belongs_to = "super::calendar::Entity",
        from = "Column::ChildCalendarId",
        to = "super::calendar::Column::Id"
    )]
    ChildCalendar,
}

impl ActiveModelBehavior for ActiveModel {}
