//! Tenant isolation tests: scoped repositories cannot see or touch another
//! tenant's rows.

use anyhow::Result;
use chrono::Utc;

use calsync::error::CalendarError;
use calsync::models::enums::CalendarProvider;
use calsync::repositories::{
    CalendarRepository, CalendarSyncRepository, EventRepository, TenantContext, TenantRepository,
};

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{create_synced_calendar, create_virtual_calendar, dt, harness};

#[tokio::test]
async fn calendars_are_invisible_across_tenants() -> Result<()> {
    let h = harness().await?;
    let calendar = create_virtual_calendar(&h, "mine").await?;

    let tenants = TenantRepository::new(&h.db);
    let other = tenants.create(Some("Other".to_string())).await?;
    let other_ctx = TenantContext::new(other.id);

    let foreign = CalendarRepository::new(&h.db, other_ctx);
    assert!(foreign.get(calendar.id).await?.is_none());
    assert!(matches!(
        foreign.require(calendar.id).await.unwrap_err(),
        CalendarError::NotFound(_)
    ));
    Ok(())
}

#[tokio::test]
async fn external_ids_are_scoped_per_tenant() -> Result<()> {
    let h = harness().await?;
    create_synced_calendar(&h, "shared-ext", false).await?;

    // The same provider id can be mirrored by a different tenant.
    let tenants = TenantRepository::new(&h.db);
    let other = tenants.create(None).await?;
    let other_ctx = TenantContext::new(other.id);
    let foreign = CalendarRepository::new(&h.db, other_ctx);
    foreign
        .create(calsync::repositories::NewCalendar {
            name: "theirs".to_string(),
            description: None,
            email: None,
            external_id: "shared-ext".to_string(),
            provider: CalendarProvider::Internal,
            calendar_kind: calsync::models::enums::CalendarKind::Personal,
            manages_available_windows: false,
            capacity: None,
            original_payload: None,
        })
        .await?;

    // Each tenant resolves its own row.
    let mine = CalendarRepository::new(&h.db, h.ctx)
        .get_by_external_id(CalendarProvider::Internal, "shared-ext")
        .await?
        .expect("own calendar");
    let theirs = foreign
        .get_by_external_id(CalendarProvider::Internal, "shared-ext")
        .await?
        .expect("their calendar");
    assert_ne!(mine.id, theirs.id);
    assert_eq!(mine.tenant_id, h.tenant_id);
    assert_eq!(theirs.tenant_id, other.id);
    Ok(())
}

#[tokio::test]
async fn events_do_not_leak_across_tenants() -> Result<()> {
    let h = harness().await?;
    let calendar = create_virtual_calendar(&h, "mine").await?;
    h.service
        .create_event(
            h.ctx,
            calendar.id,
            calsync::service::CreateEventInput {
                title: "secret".to_string(),
                start_at: dt(2025, 6, 23, 9, 0),
                end_at: dt(2025, 6, 23, 10, 0),
                timezone: "UTC".to_string(),
                ..Default::default()
            },
        )
        .await?;

    let tenants = TenantRepository::new(&h.db);
    let other = tenants.create(None).await?;
    let foreign = EventRepository::new(&h.db, TenantContext::new(other.id));

    assert!(
        foreign
            .find_in_window(calendar.id, dt(2025, 6, 1, 0, 0), dt(2025, 7, 1, 0, 0))
            .await?
            .is_empty(),
        "even with a known calendar id, a foreign tenant sees nothing"
    );
    Ok(())
}

#[tokio::test]
async fn mutating_a_foreign_row_is_a_tenant_violation() -> Result<()> {
    let h = harness().await?;
    let calendar = create_virtual_calendar(&h, "mine").await?;

    let syncs = CalendarSyncRepository::new(&h.db, h.ctx);
    let sync = syncs
        .create(
            calendar.id,
            dt(2025, 6, 1, 0, 0),
            dt(2025, 7, 1, 0, 0),
            false,
            Utc::now(),
        )
        .await?;

    let tenants = TenantRepository::new(&h.db);
    let other = tenants.create(None).await?;
    let foreign_syncs = CalendarSyncRepository::new(&h.db, TenantContext::new(other.id));

    // Handing a loaded foreign model to a scoped repository aborts.
    let err = foreign_syncs.mark_success(sync, None).await.unwrap_err();
    assert!(matches!(err, CalendarError::TenantViolation(_)));
    Ok(())
}
