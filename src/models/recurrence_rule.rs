//! RecurrenceRule entity model.
//!
//! Persists the supported RRULE subset. `by_weekday`, `by_month_day`, and
//! `by_month` are stored as comma-separated lists; the recurrence module owns
//! parsing/serialization and the count/until exclusivity check.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "recurrence_rules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,

    /// DAILY | WEEKLY | MONTHLY | YEARLY.
    pub frequency: String,

    /// Step between occurrences in units of `frequency`; >= 1.
    pub interval: i32,

    /// Total number of occurrences. Mutually exclusive with `until`.
    pub count: Option<i32>,

    /// Last instant (UTC naive) an occurrence may start. Mutually exclusive
    /// with `count`.
    pub until: Option<DateTime>,

    /// Comma-separated two-letter weekday codes, e.g. "MO,WE,FR".
    pub by_weekday: Option<String>,

    /// Comma-separated days of month, 1..=31.
    pub by_month_day: Option<String>,

    /// Comma-separated months, 1..=12.
    pub by_month: Option<String>,

    pub created_at: DateTimeWithTimeZone,
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

impl ActiveModelBehavior for ActiveModel {}
