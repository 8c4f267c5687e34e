//! Migration to create the recurrence_rules table.
//!
//! Stores the supported RRULE subset. Exactly one of count/until may be set;
//! the application layer enforces the exclusivity.

use sea_orm_migration::prelude::*;

use super::m2025_01_01_000001_create_tenants::Tenants;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RecurrenceRules::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RecurrenceRules::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RecurrenceRules::TenantId).uuid().not_null())
                    .col(ColumnDef::new(RecurrenceRules::Frequency).text().not_null())
                    .col(
                        ColumnDef::new(RecurrenceRules::Interval)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(ColumnDef::new(RecurrenceRules::Count).integer().null())
                    .col(ColumnDef::new(RecurrenceRules::Until).timestamp().null())
                    .col(ColumnDef::new(RecurrenceRules::ByWeekday).text().null())
                    .col(ColumnDef::new(RecurrenceRules::ByMonthDay).text().null())
                    .col(ColumnDef::new(RecurrenceRules::ByMonth).text().null())
                    .col(
                        ColumnDef::new(RecurrenceRules::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_recurrence_rules_tenant_id")
                            .from(RecurrenceRules::Table, RecurrenceRules::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RecurrenceRules::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum RecurrenceRules {
    Table,
    Id,
    TenantId,
    Frequency,
    Interval,
    Count,
    Until,
    ByWeekday,
    ByMonthDay,
    ByMonth,
    CreatedAt,
}
