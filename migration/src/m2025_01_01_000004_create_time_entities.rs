//! Migration to create calendar_events, blocked_times, and available_times.
//!
//! All three share the interval layout (UTC-naive start/end plus an IANA
//! timezone column) and the recurrence/exception/continuation structure.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Statement;

use super::m2025_01_01_000001_create_tenants::Tenants;
use super::m2025_01_01_000002_create_calendars::Calendars;
use super::m2025_01_01_000003_create_recurrence_rules::RecurrenceRules;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CalendarEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CalendarEvents::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CalendarEvents::TenantId).uuid().not_null())
                    .col(ColumnDef::new(CalendarEvents::CalendarId).uuid().not_null())
                    .col(ColumnDef::new(CalendarEvents::Title).text().not_null())
                    .col(
                        ColumnDef::new(CalendarEvents::Description)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(CalendarEvents::StartAt).timestamp().not_null())
                    .col(ColumnDef::new(CalendarEvents::EndAt).timestamp().not_null())
                    .col(
                        ColumnDef::new(CalendarEvents::Timezone)
                            .text()
                            .not_null()
                            .default("UTC"),
                    )
                    .col(
                        ColumnDef::new(CalendarEvents::ExternalId)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(CalendarEvents::Status)
                            .text()
                            .not_null()
                            .default("confirmed"),
                    )
                    .col(
                        ColumnDef::new(CalendarEvents::RecurrenceRuleId)
                            .uuid()
                            .null(),
                    )
                    .col(ColumnDef::new(CalendarEvents::ParentEventId).uuid().null())
                    .col(
                        ColumnDef::new(CalendarEvents::RecurrenceId)
                            .timestamp()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CalendarEvents::IsRecurringException)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(CalendarEvents::BulkModificationParentId)
                            .uuid()
                            .null(),
                    )
                    .col(ColumnDef::new(CalendarEvents::Meta).json_binary().null())
                    .col(
                        ColumnDef::new(CalendarEvents::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CalendarEvents::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_calendar_events_tenant_id")
                            .from(CalendarEvents::Table, CalendarEvents::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_calendar_events_calendar_id")
                            .from(CalendarEvents::Table, CalendarEvents::CalendarId)
                            .to(Calendars::Table, Calendars::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_calendar_events_recurrence_rule_id")
                            .from(CalendarEvents::Table, CalendarEvents::RecurrenceRuleId)
                            .to(RecurrenceRules::Table, RecurrenceRules::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_calendar_events_parent_event_id")
                            .from(CalendarEvents::Table, CalendarEvents::ParentEventId)
                            .to(CalendarEvents::Table, CalendarEvents::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_calendar_events_bulk_parent_id")
                            .from(
                                CalendarEvents::Table,
                                CalendarEvents::BulkModificationParentId,
                            )
                            .to(CalendarEvents::Table, CalendarEvents::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_calendar_events_tenant_external \
                 ON calendar_events (tenant_id, calendar_id, external_id) WHERE external_id <> ''"
                    .to_string(),
            ))
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_calendar_events_calendar_window")
                    .table(CalendarEvents::Table)
                    .col(CalendarEvents::TenantId)
                    .col(CalendarEvents::CalendarId)
                    .col(CalendarEvents::StartAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(BlockedTimes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BlockedTimes::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(BlockedTimes::TenantId).uuid().not_null())
                    .col(ColumnDef::new(BlockedTimes::CalendarId).uuid().not_null())
                    .col(ColumnDef::new(BlockedTimes::StartAt).timestamp().not_null())
                    .col(ColumnDef::new(BlockedTimes::EndAt).timestamp().not_null())
                    .col(
                        ColumnDef::new(BlockedTimes::Timezone)
                            .text()
                            .not_null()
                            .default("UTC"),
                    )
                    .col(
                        ColumnDef::new(BlockedTimes::Reason)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(BlockedTimes::ExternalId)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(BlockedTimes::RecurrenceRuleId).uuid().null())
                    .col(
                        ColumnDef::new(BlockedTimes::RecurrenceId)
                            .timestamp()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(BlockedTimes::IsRecurringException)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(BlockedTimes::BulkModificationParentId)
                            .uuid()
                            .null(),
                    )
                    .col(ColumnDef::new(BlockedTimes::Meta).json_binary().null())
                    .col(
                        ColumnDef::new(BlockedTimes::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(BlockedTimes::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_blocked_times_tenant_id")
                            .from(BlockedTimes::Table, BlockedTimes::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_blocked_times_calendar_id")
                            .from(BlockedTimes::Table, BlockedTimes::CalendarId)
                            .to(Calendars::Table, Calendars::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_blocked_times_recurrence_rule_id")
                            .from(BlockedTimes::Table, BlockedTimes::RecurrenceRuleId)
                            .to(RecurrenceRules::Table, RecurrenceRules::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_blocked_times_bulk_parent_id")
                            .from(BlockedTimes::Table, BlockedTimes::BulkModificationParentId)
                            .to(BlockedTimes::Table, BlockedTimes::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_blocked_times_calendar_window")
                    .table(BlockedTimes::Table)
                    .col(BlockedTimes::TenantId)
                    .col(BlockedTimes::CalendarId)
                    .col(BlockedTimes::StartAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AvailableTimes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AvailableTimes::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AvailableTimes::TenantId).uuid().not_null())
                    .col(ColumnDef::new(AvailableTimes::CalendarId).uuid().not_null())
                    .col(ColumnDef::new(AvailableTimes::StartAt).timestamp().not_null())
                    .col(ColumnDef::new(AvailableTimes::EndAt).timestamp().not_null())
                    .col(
                        ColumnDef::new(AvailableTimes::Timezone)
                            .text()
                            .not_null()
                            .default("UTC"),
                    )
                    .col(
                        ColumnDef::new(AvailableTimes::RecurrenceRuleId)
                            .uuid()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(AvailableTimes::RecurrenceId)
                            .timestamp()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(AvailableTimes::IsRecurringException)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(AvailableTimes::BulkModificationParentId)
                            .uuid()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(AvailableTimes::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(AvailableTimes::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_available_times_tenant_id")
                            .from(AvailableTimes::Table, AvailableTimes::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_available_times_calendar_id")
                            .from(AvailableTimes::Table, AvailableTimes::CalendarId)
                            .to(Calendars::Table, Calendars::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_available_times_recurrence_rule_id")
                            .from(AvailableTimes::Table, AvailableTimes::RecurrenceRuleId)
                            .to(RecurrenceRules::Table, RecurrenceRules::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_available_times_bulk_parent_id")
                            .from(
                                AvailableTimes::Table,
                                AvailableTimes::BulkModificationParentId,
                            )
                            .to(AvailableTimes::Table, AvailableTimes::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_available_times_calendar_window")
                    .table(AvailableTimes::Table)
                    .col(AvailableTimes::TenantId)
                    .col(AvailableTimes::CalendarId)
                    .col(AvailableTimes::StartAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AvailableTimes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(BlockedTimes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CalendarEvents::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum CalendarEvents {
    Table,
    Id,
    TenantId,
    CalendarId,
    Title,
    Description,
    StartAt,
    EndAt,
    Timezone,
    ExternalId,
    Status,
    RecurrenceRuleId,
    ParentEventId,
    RecurrenceId,
    IsRecurringException,
    BulkModificationParentId,
    Meta,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum BlockedTimes {
    Table,
    Id,
    TenantId,
    CalendarId,
    StartAt,
    EndAt,
    Timezone,
    Reason,
    ExternalId,
    RecurrenceRuleId,
    RecurrenceId,
    IsRecurringException,
    BulkModificationParentId,
    Meta,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum AvailableTimes {
    Table,
    Id,
    TenantId,
    CalendarId,
    StartAt,
    EndAt,
    Timezone,
    RecurrenceRuleId,
    RecurrenceId,
    IsRecurringException,
    BulkModificationParentId,
    CreatedAt,
    UpdatedAt,
}
