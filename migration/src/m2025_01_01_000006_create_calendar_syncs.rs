//! Migration to create the calendar_syncs table.
//!
//! A row is both the record of a sync over a window and the unit of work the
//! job runner claims. Scheduling columns (scheduled_at, attempts, retry_after)
//! drive retry/backoff.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Statement;

use super::m2025_01_01_000001_create_tenants::Tenants;
use super::m2025_01_01_000002_create_calendars::Calendars;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CalendarSyncs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CalendarSyncs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CalendarSyncs::TenantId).uuid().not_null())
                    .col(ColumnDef::new(CalendarSyncs::CalendarId).uuid().not_null())
                    .col(ColumnDef::new(CalendarSyncs::StartAt).timestamp().not_null())
                    .col(ColumnDef::new(CalendarSyncs::EndAt).timestamp().not_null())
                    .col(
                        ColumnDef::new(CalendarSyncs::Status)
                            .text()
                            .not_null()
                            .default("not_started"),
                    )
                    .col(
                        ColumnDef::new(CalendarSyncs::ShouldUpdateEvents)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(CalendarSyncs::NextSyncToken).text().null())
                    .col(ColumnDef::new(CalendarSyncs::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(CalendarSyncs::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(CalendarSyncs::ScheduledAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CalendarSyncs::RetryAfter)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CalendarSyncs::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CalendarSyncs::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CalendarSyncs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(CalendarSyncs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_calendar_syncs_tenant_id")
                            .from(CalendarSyncs::Table, CalendarSyncs::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_calendar_syncs_calendar_id")
                            .from(CalendarSyncs::Table, CalendarSyncs::CalendarId)
                            .to(Calendars::Table, Calendars::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Single-flight guard: at most one in-flight sync per calendar.
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_calendar_syncs_single_inflight \
                 ON calendar_syncs (tenant_id, calendar_id) WHERE status = 'in_progress'"
                    .to_string(),
            ))
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_calendar_syncs_status_scheduled")
                    .table(CalendarSyncs::Table)
                    .col(CalendarSyncs::Status)
                    .col(CalendarSyncs::ScheduledAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CalendarSyncs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum CalendarSyncs {
    Table,
    Id,
    TenantId,
    CalendarId,
    StartAt,
    EndAt,
    Status,
    ShouldUpdateEvents,
    NextSyncToken,
    ErrorMessage,
    Attempts,
    ScheduledAt,
    RetryAfter,
    StartedAt,
    FinishedAt,
    CreatedAt,
    UpdatedAt,
}
