//! Calendar service integration tests: event CRUD, attendance, imports, and
//! transfers against the internal adapter.

use anyhow::Result;
use uuid::Uuid;

use calsync::adapters::{CalendarDescriptor, ResourceDescriptor};
use calsync::models::enums::{CalendarKind, CalendarProvider, RsvpStatus};
use calsync::repositories::{AttendanceRepository, CalendarRepository, EventRepository};
use calsync::service::{CreateEventInput, UpdateEventInput};

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{create_virtual_calendar, dt, harness};

#[tokio::test]
async fn create_event_persists_attendance_rows() -> Result<()> {
    let h = harness().await?;
    let calendar = create_virtual_calendar(&h, "main").await?;
    let room = create_virtual_calendar(&h, "room").await?;
    let user_id = Uuid::new_v4();

    let event = h
        .service
        .create_event(
            h.ctx,
            calendar.id,
            CreateEventInput {
                title: "kickoff".to_string(),
                start_at: dt(2025, 6, 23, 9, 0),
                end_at: dt(2025, 6, 23, 10, 0),
                timezone: "Europe/Berlin".to_string(),
                attendances: vec![user_id],
                external_attendees: vec![("ada@example.com".to_string(), "Ada".to_string())],
                resource_allocations: vec![room.id],
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(event.timezone, "Europe/Berlin");

    let attendance = AttendanceRepository::new(&h.db, h.ctx);
    let internal = attendance.attendances_of(event.id).await?;
    assert_eq!(internal.len(), 1);
    assert_eq!(internal[0].user_id, user_id);
    assert_eq!(internal[0].status, RsvpStatus::Pending);

    let external = attendance.external_attendances_of(event.id).await?;
    assert_eq!(external.len(), 1);
    assert_eq!(
        external[0].1.as_ref().map(|attendee| attendee.email.as_str()),
        Some("ada@example.com")
    );

    let allocations = attendance.allocations_of(event.id).await?;
    assert_eq!(allocations.len(), 1);
    assert_eq!(allocations[0].resource_calendar_id, room.id);
    assert_eq!(allocations[0].status, RsvpStatus::Accepted);
    Ok(())
}

#[tokio::test]
async fn invalid_timezone_is_rejected() -> Result<()> {
    let h = harness().await?;
    let calendar = create_virtual_calendar(&h, "main").await?;

    let err = h
        .service
        .create_event(
            h.ctx,
            calendar.id,
            CreateEventInput {
                title: "bad".to_string(),
                start_at: dt(2025, 6, 23, 9, 0),
                end_at: dt(2025, 6, 23, 10, 0),
                timezone: "Mars/Olympus_Mons".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid IANA timezone"));
    Ok(())
}

#[tokio::test]
async fn update_and_delete_round_trip() -> Result<()> {
    let h = harness().await?;
    let calendar = create_virtual_calendar(&h, "main").await?;

    let event = h
        .service
        .create_event(
            h.ctx,
            calendar.id,
            CreateEventInput {
                title: "draft".to_string(),
                start_at: dt(2025, 6, 23, 9, 0),
                end_at: dt(2025, 6, 23, 10, 0),
                timezone: "UTC".to_string(),
                ..Default::default()
            },
        )
        .await?;

    let updated = h
        .service
        .update_event(
            h.ctx,
            event.id,
            UpdateEventInput {
                title: Some("final".to_string()),
                start_at: Some(dt(2025, 6, 23, 11, 0)),
                end_at: Some(dt(2025, 6, 23, 12, 0)),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(updated.title, "final");
    assert_eq!(updated.start_at, dt(2025, 6, 23, 11, 0));

    h.service.delete_event(h.ctx, event.id, false).await?;
    let events = EventRepository::new(&h.db, h.ctx);
    assert!(events.get(event.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn delete_series_removes_exceptions() -> Result<()> {
    let h = harness().await?;
    let calendar = create_virtual_calendar(&h, "main").await?;

    let master = h
        .service
        .create_recurring_event(
            h.ctx,
            calendar.id,
            CreateEventInput {
                title: "daily".to_string(),
                start_at: dt(2025, 6, 23, 9, 0),
                end_at: dt(2025, 6, 23, 9, 30),
                timezone: "UTC".to_string(),
                ..Default::default()
            },
            calsync::recurrence::RuleSpec::from_rrule_str("FREQ=DAILY;COUNT=5")?,
        )
        .await?;
    let exception = h
        .service
        .create_recurring_exception(h.ctx, master.id, dt(2025, 6, 24, 9, 0), None)
        .await?;

    h.service.delete_event(h.ctx, master.id, true).await?;

    let events = EventRepository::new(&h.db, h.ctx);
    assert!(events.get(master.id).await?.is_none());
    assert!(events.get(exception.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn transfer_moves_event_between_calendars() -> Result<()> {
    let h = harness().await?;
    let source = create_virtual_calendar(&h, "source").await?;
    let target = create_virtual_calendar(&h, "target").await?;

    let event = h
        .service
        .create_event(
            h.ctx,
            source.id,
            CreateEventInput {
                title: "movable".to_string(),
                start_at: dt(2025, 6, 23, 9, 0),
                end_at: dt(2025, 6, 23, 10, 0),
                timezone: "UTC".to_string(),
                ..Default::default()
            },
        )
        .await?;

    let moved = h.service.transfer_event(h.ctx, event.id, target.id).await?;
    assert_eq!(moved.calendar_id, target.id);
    assert_eq!(moved.title, "movable");

    let events = EventRepository::new(&h.db, h.ctx);
    assert!(events.get(event.id).await?.is_none(), "source removed");
    Ok(())
}

#[tokio::test]
async fn imports_mirror_provider_calendars_and_resources() -> Result<()> {
    let h = harness().await?;

    h.internal.seed_calendar(CalendarDescriptor {
        external_id: "acct-cal-1".to_string(),
        name: "Team".to_string(),
        description: String::new(),
        email: Some("team@example.com".to_string()),
        provider: CalendarProvider::Internal,
        is_default: true,
        original_payload: None,
    });
    h.internal.seed_resource(ResourceDescriptor {
        external_id: "room-9".to_string(),
        name: "Room 9".to_string(),
        description: String::new(),
        email: Some("room9@example.com".to_string()),
        capacity: Some(8),
        original_payload: None,
    });

    let imported = h
        .service
        .import_account_calendars(h.ctx, CalendarProvider::Internal)
        .await?;
    assert_eq!(imported, 1);
    let imported = h
        .service
        .import_organization_resources(h.ctx, CalendarProvider::Internal)
        .await?;
    assert_eq!(imported, 1);

    let calendars = CalendarRepository::new(&h.db, h.ctx);
    let team = calendars
        .get_by_external_id(CalendarProvider::Internal, "acct-cal-1")
        .await?
        .expect("imported calendar");
    assert_eq!(team.name, "Team");

    let room = calendars
        .get_by_external_id(CalendarProvider::Internal, "room-9")
        .await?
        .expect("imported resource");
    assert_eq!(room.calendar_kind, CalendarKind::Resource);
    assert_eq!(room.capacity, Some(8));

    // Re-importing refreshes rather than duplicating.
    let imported = h
        .service
        .import_account_calendars(h.ctx, CalendarProvider::Internal)
        .await?;
    assert_eq!(imported, 1);
    Ok(())
}

#[tokio::test]
async fn import_requests_enqueue_background_jobs() -> Result<()> {
    let mut h = harness().await?;

    h.service
        .request_account_calendars_import(h.ctx, CalendarProvider::Internal)?;
    h.service
        .request_organization_resources_import(h.ctx, CalendarProvider::Internal)?;

    assert!(matches!(
        h.receiver.try_recv()?,
        calsync::jobs::Job::ImportAccountCalendars { .. }
    ));
    assert!(matches!(
        h.receiver.try_recv()?,
        calsync::jobs::Job::ImportOrgResources { .. }
    ));
    Ok(())
}
