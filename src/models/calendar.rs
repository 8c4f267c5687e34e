//! Calendar entity model.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

use super::enums::{CalendarKind, CalendarProvider};

/// A calendar owned by exactly one tenant.
///
/// Provider-backed calendars carry the provider-scoped `external_id`; internal
/// calendars leave it empty. Bundle calendars own rows in
/// `children_calendar_relationships` and may designate a primary child.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "calendars")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Tenant identifier; part of every lookup touching this row.
    pub tenant_id: Uuid,

    pub name: String,
    pub description: Option<String>,
    pub email: Option<String>,

    /// Provider-scoped identifier; empty for internal-only calendars.
    pub external_id: String,

    pub provider: CalendarProvider,
    pub calendar_kind: CalendarKind,

    /// When true, bookable time comes from explicit AvailableTime windows
    /// instead of the complement of busy time.
    pub manages_available_windows: bool,

    /// Seat capacity for resource calendars.
    pub capacity: Option<i32>,

    /// Designated primary child for bundle calendars.
    pub primary_child_id: Option<Uuid>,

    /// Last raw provider payload describing this calendar.
    #[sea_orm(column_type = "JsonBinary")]
    pub original_payload: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::tenant::Entity",
        from = "Column::TenantId",
        to = "super::tenant::Column::Id"
    )]
    Tenant,
}

impl Related<super::tenant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tenant.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether this calendar is a bundle of child calendars.
    pub fn is_bundle(&self) -> bool {
        self.calendar_kind == CalendarKind::Bundle
    }

    /// Whether this calendar mirrors an external provider.
    pub fn is_external(&self) -> bool {
        !self.external_id.is_empty() && self.provider != CalendarProvider::Internal
    }
}
