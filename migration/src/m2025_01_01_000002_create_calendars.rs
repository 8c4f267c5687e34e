//! Migration to create the calendars and children_calendar_relationship tables.
//!
//! Calendars are tenant-scoped and unique on (tenant_id, external_id,
//! provider) whenever external_id is non-empty. Bundle membership lives in
//! the children_calendar_relationship join table.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Statement;

use super::m2025_01_01_000001_create_tenants::Tenants;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Calendars::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Calendars::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Calendars::TenantId).uuid().not_null())
                    .col(ColumnDef::new(Calendars::Name).text().not_null())
                    .col(ColumnDef::new(Calendars::Description).text().null())
                    .col(ColumnDef::new(Calendars::Email).text().null())
                    .col(
                        ColumnDef::new(Calendars::ExternalId)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(Calendars::Provider).text().not_null())
                    .col(ColumnDef::new(Calendars::CalendarKind).text().not_null())
                    .col(
                        ColumnDef::new(Calendars::ManagesAvailableWindows)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Calendars::Capacity).integer().null())
                    .col(
                        ColumnDef::new(Calendars::PrimaryChildId)
                            .uuid()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Calendars::OriginalPayload)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Calendars::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Calendars::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_calendars_tenant_id")
                            .from(Calendars::Table, Calendars::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_calendars_primary_child_id")
                            .from(Calendars::Table, Calendars::PrimaryChildId)
                            .to(Calendars::Table, Calendars::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        // Partial unique index so provider-originated calendars cannot be
        // mirrored twice, while internal calendars (empty external_id) are
        // unconstrained.
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_calendars_tenant_external_provider \
                 ON calendars (tenant_id, external_id, provider) WHERE external_id <> ''"
                    .to_string(),
            ))
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ChildrenCalendarRelationships::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ChildrenCalendarRelationships::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ChildrenCalendarRelationships::TenantId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChildrenCalendarRelationships::ParentCalendarId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChildrenCalendarRelationships::ChildCalendarId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChildrenCalendarRelationships::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_children_calendar_tenant_id")
                            .from(
                                ChildrenCalendarRelationships::Table,
                                ChildrenCalendarRelationships::TenantId,
                            )
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_children_calendar_parent_id")
                            .from(
                                ChildrenCalendarRelationships::Table,
                                ChildrenCalendarRelationships::ParentCalendarId,
                            )
                            .to(Calendars::Table, Calendars::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_children_calendar_child_id")
                            .from(
                                ChildrenCalendarRelationships::Table,
                                ChildrenCalendarRelationships::ChildCalendarId,
                            )
                            .to(Calendars::Table, Calendars::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_children_calendar_parent_child")
                    .table(ChildrenCalendarRelationships::Table)
                    .col(ChildrenCalendarRelationships::ParentCalendarId)
                    .col(ChildrenCalendarRelationships::ChildCalendarId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(ChildrenCalendarRelationships::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(Calendars::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Calendars {
    Table,
    Id,
    TenantId,
    Name,
    Description,
    Email,
    ExternalId,
    Provider,
    CalendarKind,
    ManagesAvailableWindows,
    Capacity,
    PrimaryChildId,
    OriginalPayload,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
pub enum ChildrenCalendarRelationships {
    Table,
    Id,
    TenantId,
    ParentCalendarId,
    ChildCalendarId,
    CreatedAt,
}
