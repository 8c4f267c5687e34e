//! Database migrations for the calendar sync core.

pub use sea_orm_migration::prelude::*;

mod m2025_01_01_000001_create_tenants;
mod m2025_01_01_000002_create_calendars;
mod m2025_01_01_000003_create_recurrence_rules;
mod m2025_01_01_000004_create_time_entities;
mod m2025_01_01_000005_create_attendance;
mod m2025_01_01_000006_create_calendar_syncs;
mod m2025_01_01_000007_create_webhooks;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_01_000001_create_tenants::Migration),
            Box::new(m2025_01_01_000002_create_calendars::Migration),
            Box::new(m2025_01_01_000003_create_recurrence_rules::Migration),
            Box::new(m2025_01_01_000004_create_time_entities::Migration),
            Box::new(m2025_01_01_000005_create_attendance::Migration),
            Box::new(m2025_01_01_000006_create_calendar_syncs::Migration),
            Box::new(m2025_01_01_000007_create_webhooks::Migration),
        ]
    }
}
