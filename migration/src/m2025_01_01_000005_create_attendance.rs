//! Migration to create attendance tables.
//!
//! event_attendances (internal users), external_attendees plus
//! event_external_attendances (outside parties), and resource_allocations
//! (calendars allocated as resources). Each carries an RSVP status.

use sea_orm_migration::prelude::*;

use super::m2025_01_01_000001_create_tenants::Tenants;
use super::m2025_01_01_000002_create_calendars::Calendars;
use super::m2025_01_01_000004_create_time_entities::CalendarEvents;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EventAttendances::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EventAttendances::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(EventAttendances::TenantId).uuid().not_null())
                    .col(ColumnDef::new(EventAttendances::EventId).uuid().not_null())
                    .col(ColumnDef::new(EventAttendances::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(EventAttendances::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(EventAttendances::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_event_attendances_tenant_id")
                            .from(EventAttendances::Table, EventAttendances::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_event_attendances_event_id")
                            .from(EventAttendances::Table, EventAttendances::EventId)
                            .to(CalendarEvents::Table, CalendarEvents::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ExternalAttendees::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ExternalAttendees::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ExternalAttendees::TenantId).uuid().not_null())
                    .col(ColumnDef::new(ExternalAttendees::Email).text().not_null())
                    .col(
                        ColumnDef::new(ExternalAttendees::Name)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(ExternalAttendees::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_external_attendees_tenant_id")
                            .from(ExternalAttendees::Table, ExternalAttendees::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_external_attendees_tenant_email")
                    .table(ExternalAttendees::Table)
                    .col(ExternalAttendees::TenantId)
                    .col(ExternalAttendees::Email)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(EventExternalAttendances::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EventExternalAttendances::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(EventExternalAttendances::TenantId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(EventExternalAttendances::EventId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(EventExternalAttendances::ExternalAttendeeId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(EventExternalAttendances::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(EventExternalAttendances::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_event_external_attendances_tenant_id")
                            .from(
                                EventExternalAttendances::Table,
                                EventExternalAttendances::TenantId,
                            )
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_event_external_attendances_event_id")
                            .from(
                                EventExternalAttendances::Table,
                                EventExternalAttendances::EventId,
                            )
                            .to(CalendarEvents::Table, CalendarEvents::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_event_external_attendances_attendee_id")
                            .from(
                                EventExternalAttendances::Table,
                                EventExternalAttendances::ExternalAttendeeId,
                            )
                            .to(ExternalAttendees::Table, ExternalAttendees::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ResourceAllocations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ResourceAllocations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ResourceAllocations::TenantId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ResourceAllocations::EventId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ResourceAllocations::ResourceCalendarId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ResourceAllocations::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(ResourceAllocations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_resource_allocations_tenant_id")
                            .from(ResourceAllocations::Table, ResourceAllocations::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_resource_allocations_event_id")
                            .from(ResourceAllocations::Table, ResourceAllocations::EventId)
                            .to(CalendarEvents::Table, CalendarEvents::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_resource_allocations_resource_id")
                            .from(
                                ResourceAllocations::Table,
                                ResourceAllocations::ResourceCalendarId,
                            )
                            .to(Calendars::Table, Calendars::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ResourceAllocations::Table).to_owned())
            .await?;
        manager
            .drop_table(
                Table::drop()
                    .table(EventExternalAttendances::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(ExternalAttendees::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(EventAttendances::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum EventAttendances {
    Table,
    Id,
    TenantId,
    EventId,
    UserId,
    Status,
    CreatedAt,
}

#[derive(DeriveIden)]
pub enum ExternalAttendees {
    Table,
    Id,
    TenantId,
    Email,
    Name,
    CreatedAt,
}

#[derive(DeriveIden)]
pub enum EventExternalAttendances {
    Table,
    Id,
    TenantId,
    EventId,
    ExternalAttendeeId,
    Status,
    CreatedAt,
}

#[derive(DeriveIden)]
pub enum ResourceAllocations {
    Table,
    Id,
    TenantId,
    EventId,
    ResourceCalendarId,
    Status,
    CreatedAt,
}
