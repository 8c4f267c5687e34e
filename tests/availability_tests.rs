//! Availability engine integration tests.

use anyhow::Result;

use calsync::availability::AvailabilityEngine;
use calsync::error::CalendarError;
use calsync::recurrence::RuleSpec;
use calsync::repositories::CalendarRepository;
use calsync::service::CreateEventInput;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{create_virtual_calendar, dt, harness};

fn event_input(
    title: &str,
    start: chrono::NaiveDateTime,
    end: chrono::NaiveDateTime,
) -> CreateEventInput {
    CreateEventInput {
        title: title.to_string(),
        start_at: start,
        end_at: end,
        timezone: "UTC".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn bundle_availability_is_union_over_children() -> Result<()> {
    let h = harness().await?;
    let child1 = create_virtual_calendar(&h, "room-1").await?;
    let child2 = create_virtual_calendar(&h, "room-2").await?;

    h.service
        .bulk_create_manual_blocked_times(
            h.ctx,
            child1.id,
            &[(dt(2025, 6, 23, 10, 0), dt(2025, 6, 23, 11, 0), "held".to_string())],
            "UTC",
        )
        .await?;
    h.service
        .bulk_create_manual_blocked_times(
            h.ctx,
            child2.id,
            &[(dt(2025, 6, 23, 10, 30), dt(2025, 6, 23, 11, 30), "held".to_string())],
            "UTC",
        )
        .await?;

    let bundle = h
        .service
        .create_bundle_calendar(h.ctx, "rooms", None, &[child1.id, child2.id], None)
        .await?;

    let engine = AvailabilityEngine::new(h.db.clone());
    let windows = engine
        .available_windows(
            h.ctx,
            &bundle,
            dt(2025, 6, 23, 10, 0),
            dt(2025, 6, 23, 12, 0),
        )
        .await?;

    // Available on the bundle iff at least one child is free: only
    // 10:30-11:00 (busy on both) is excluded.
    let intervals: Vec<_> = windows.iter().map(|w| (w.start, w.end)).collect();
    assert_eq!(
        intervals,
        vec![
            (dt(2025, 6, 23, 10, 0), dt(2025, 6, 23, 10, 30)),
            (dt(2025, 6, 23, 11, 0), dt(2025, 6, 23, 12, 0)),
        ]
    );
    assert!(windows.iter().all(|w| w.can_book_partially));
    Ok(())
}

#[tokio::test]
async fn availability_partitions_the_window() -> Result<()> {
    let h = harness().await?;
    let calendar = create_virtual_calendar(&h, "solo").await?;

    h.service
        .bulk_create_manual_blocked_times(
            h.ctx,
            calendar.id,
            &[
                (dt(2025, 6, 23, 9, 0), dt(2025, 6, 23, 10, 0), "a".to_string()),
                (dt(2025, 6, 23, 9, 30), dt(2025, 6, 23, 11, 0), "b".to_string()),
                (dt(2025, 6, 23, 15, 0), dt(2025, 6, 23, 16, 0), "c".to_string()),
            ],
            "UTC",
        )
        .await?;

    let window_start = dt(2025, 6, 23, 8, 0);
    let window_end = dt(2025, 6, 23, 18, 0);

    let engine = AvailabilityEngine::new(h.db.clone());
    let unavailable = engine
        .unavailable_windows(h.ctx, &calendar, window_start, window_end)
        .await?;
    let available = engine
        .available_windows(h.ctx, &calendar, window_start, window_end)
        .await?;

    // Union covers the whole window; interiors are disjoint.
    let mut segments: Vec<(chrono::NaiveDateTime, chrono::NaiveDateTime)> = unavailable
        .iter()
        .map(|w| (w.start, w.end))
        .chain(available.iter().map(|w| (w.start, w.end)))
        .collect();
    segments.sort();
    let merged = calsync::availability::merge_intervals(segments.clone());
    assert_eq!(merged, vec![(window_start, window_end)]);

    for pair in available.windows(2) {
        assert!(pair[0].end <= pair[1].start, "available windows disjoint");
    }
    Ok(())
}

#[tokio::test]
async fn no_busy_time_yields_single_window() -> Result<()> {
    let h = harness().await?;
    let calendar = create_virtual_calendar(&h, "empty").await?;

    let engine = AvailabilityEngine::new(h.db.clone());
    let available = engine
        .available_windows(
            h.ctx,
            &calendar,
            dt(2025, 6, 23, 8, 0),
            dt(2025, 6, 23, 18, 0),
        )
        .await?;

    assert_eq!(available.len(), 1);
    assert_eq!(available[0].start, dt(2025, 6, 23, 8, 0));
    assert_eq!(available[0].end, dt(2025, 6, 23, 18, 0));
    assert!(available[0].can_book_partially);
    Ok(())
}

#[tokio::test]
async fn managed_calendar_returns_stored_windows_only() -> Result<()> {
    let h = harness().await?;
    let calendar = h
        .service
        .create_virtual_calendar(h.ctx, "managed", None, true)
        .await?;

    h.service
        .bulk_create_availability_windows(
            h.ctx,
            calendar.id,
            &[(dt(2025, 6, 23, 9, 0), dt(2025, 6, 23, 12, 0))],
            "UTC",
        )
        .await?;

    let engine = AvailabilityEngine::new(h.db.clone());
    let available = engine
        .available_windows(
            h.ctx,
            &calendar,
            dt(2025, 6, 23, 0, 0),
            dt(2025, 6, 24, 0, 0),
        )
        .await?;

    assert_eq!(available.len(), 1);
    assert!(!available[0].can_book_partially);
    assert!(available[0].id.is_some());

    // Unmanaged operations are refused on managed calendars and vice versa.
    let unmanaged = create_virtual_calendar(&h, "plain").await?;
    let err = h
        .service
        .bulk_create_availability_windows(
            h.ctx,
            unmanaged.id,
            &[(dt(2025, 6, 23, 9, 0), dt(2025, 6, 23, 12, 0))],
            "UTC",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CalendarError::InvalidCalendarOperation));
    Ok(())
}

#[tokio::test]
async fn managed_calendar_booking_fits_inside_a_stored_window() -> Result<()> {
    let h = harness().await?;
    let calendar = h
        .service
        .create_virtual_calendar(h.ctx, "managed", None, true)
        .await?;

    h.service
        .bulk_create_availability_windows(
            h.ctx,
            calendar.id,
            &[(dt(2025, 6, 23, 9, 0), dt(2025, 6, 23, 17, 0))],
            "UTC",
        )
        .await?;

    // A one-hour slot inside the 9-17 window books fine.
    let event = h
        .service
        .create_event(
            h.ctx,
            calendar.id,
            event_input("inside", dt(2025, 6, 23, 10, 0), dt(2025, 6, 23, 11, 0)),
        )
        .await?;
    assert_eq!(event.calendar_id, calendar.id);

    // A slot straddling the window's edge is refused.
    let err = h
        .service
        .create_event(
            h.ctx,
            calendar.id,
            event_input("outside", dt(2025, 6, 23, 16, 30), dt(2025, 6, 23, 17, 30)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CalendarError::NoAvailableTimeWindow));
    Ok(())
}

#[tokio::test]
async fn recurring_series_with_continuation_shapes_busy_time() -> Result<()> {
    let h = harness().await?;
    let calendar = create_virtual_calendar(&h, "series").await?;

    // Master recurs daily for 10 days from 2025-06-23; a continuation forks
    // the series from day 5 with three occurrences.
    let master = h
        .service
        .create_recurring_event(
            h.ctx,
            calendar.id,
            event_input("standup", dt(2025, 6, 23, 9, 0), dt(2025, 6, 23, 9, 30)),
            RuleSpec::from_rrule_str("FREQ=DAILY;COUNT=10")?,
        )
        .await?;
    let continuation = h
        .service
        .create_bulk_modification_continuation(
            h.ctx,
            master.id,
            dt(2025, 6, 28, 9, 0),
            Some(RuleSpec::from_rrule_str("FREQ=DAILY;COUNT=3")?),
            None,
        )
        .await?;

    let engine = AvailabilityEngine::new(h.db.clone());
    let unavailable = engine
        .unavailable_windows(
            h.ctx,
            &calendar,
            dt(2025, 6, 23, 0, 0),
            dt(2025, 7, 8, 0, 0),
        )
        .await?;

    assert_eq!(unavailable.len(), 8, "5 master + 3 continuation occurrences");
    let from_master = unavailable
        .iter()
        .filter(|w| w.entity_id == master.id)
        .count();
    let from_continuation = unavailable
        .iter()
        .filter(|w| w.entity_id == continuation.id)
        .count();
    assert_eq!(from_master, 5);
    assert_eq!(from_continuation, 3);

    let starts: Vec<_> = unavailable.iter().map(|w| w.start).collect();
    assert_eq!(starts[0], dt(2025, 6, 23, 9, 0));
    assert_eq!(starts[4], dt(2025, 6, 27, 9, 0));
    assert_eq!(starts[5], dt(2025, 6, 28, 9, 0));
    assert_eq!(starts[7], dt(2025, 6, 30, 9, 0));
    Ok(())
}

#[tokio::test]
async fn exceptions_cancel_and_move_occurrences() -> Result<()> {
    let h = harness().await?;
    let calendar = create_virtual_calendar(&h, "series").await?;

    let master = h
        .service
        .create_recurring_event(
            h.ctx,
            calendar.id,
            event_input("review", dt(2025, 6, 23, 14, 0), dt(2025, 6, 23, 15, 0)),
            RuleSpec::from_rrule_str("FREQ=DAILY;COUNT=3")?,
        )
        .await?;

    // Cancel day two, move day three an hour later.
    h.service
        .create_recurring_exception(h.ctx, master.id, dt(2025, 6, 24, 14, 0), None)
        .await?;
    h.service
        .create_recurring_exception(
            h.ctx,
            master.id,
            dt(2025, 6, 25, 14, 0),
            Some(calsync::service::UpdateEventInput {
                start_at: Some(dt(2025, 6, 25, 15, 0)),
                end_at: Some(dt(2025, 6, 25, 16, 0)),
                ..Default::default()
            }),
        )
        .await?;

    let engine = AvailabilityEngine::new(h.db.clone());
    let unavailable = engine
        .unavailable_windows(
            h.ctx,
            &calendar,
            dt(2025, 6, 23, 0, 0),
            dt(2025, 6, 26, 0, 0),
        )
        .await?;

    let starts: Vec<_> = unavailable.iter().map(|w| w.start).collect();
    assert_eq!(
        starts,
        vec![dt(2025, 6, 23, 14, 0), dt(2025, 6, 25, 15, 0)],
        "cancelled occurrence dropped, modified occurrence moved"
    );
    Ok(())
}

#[tokio::test]
async fn booking_requires_a_fitting_window() -> Result<()> {
    let h = harness().await?;
    let calendar = create_virtual_calendar(&h, "busy").await?;

    h.service
        .bulk_create_manual_blocked_times(
            h.ctx,
            calendar.id,
            &[(dt(2025, 6, 23, 10, 0), dt(2025, 6, 23, 11, 0), "held".to_string())],
            "UTC",
        )
        .await?;

    // Overlapping the block is refused.
    let err = h
        .service
        .create_event(
            h.ctx,
            calendar.id,
            event_input("clash", dt(2025, 6, 23, 10, 30), dt(2025, 6, 23, 11, 30)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CalendarError::NoAvailableTimeWindow));

    // A free slot books fine.
    let event = h
        .service
        .create_event(
            h.ctx,
            calendar.id,
            event_input("ok", dt(2025, 6, 23, 12, 0), dt(2025, 6, 23, 13, 0)),
        )
        .await?;
    assert_eq!(event.calendar_id, calendar.id);
    Ok(())
}

#[tokio::test]
async fn bundle_booking_prefers_primary_then_first_free_child() -> Result<()> {
    let h = harness().await?;
    let child1 = create_virtual_calendar(&h, "room-1").await?;
    let child2 = create_virtual_calendar(&h, "room-2").await?;
    let bundle = h
        .service
        .create_bundle_calendar(
            h.ctx,
            "rooms",
            None,
            &[child1.id, child2.id],
            Some(child2.id),
        )
        .await?;

    // Primary (child2) is free: booking lands there.
    let event = h
        .service
        .create_event(
            h.ctx,
            bundle.id,
            event_input("meet", dt(2025, 6, 23, 9, 0), dt(2025, 6, 23, 10, 0)),
        )
        .await?;
    assert_eq!(event.calendar_id, child2.id);

    // Primary busy: falls back to the first free child.
    let event = h
        .service
        .create_event(
            h.ctx,
            bundle.id,
            event_input("meet2", dt(2025, 6, 23, 9, 0), dt(2025, 6, 23, 10, 0)),
        )
        .await?;
    assert_eq!(event.calendar_id, child1.id);

    // Nobody free: booking fails.
    let err = h
        .service
        .create_event(
            h.ctx,
            bundle.id,
            event_input("meet3", dt(2025, 6, 23, 9, 0), dt(2025, 6, 23, 10, 0)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CalendarError::NoAvailableChildCalendar));
    Ok(())
}

#[tokio::test]
async fn bundle_primary_must_be_a_child() -> Result<()> {
    let h = harness().await?;
    let child = create_virtual_calendar(&h, "room-1").await?;
    let outsider = create_virtual_calendar(&h, "room-x").await?;

    let err = h
        .service
        .create_bundle_calendar(h.ctx, "rooms", None, &[child.id], Some(outsider.id))
        .await
        .unwrap_err();
    assert!(matches!(err, CalendarError::InvalidPrimaryCalendar));
    Ok(())
}

#[tokio::test]
async fn empty_bundle_cannot_answer_availability() -> Result<()> {
    let h = harness().await?;
    let bundle = h
        .service
        .create_bundle_calendar(h.ctx, "empty", None, &[], None)
        .await?;

    let calendars = CalendarRepository::new(&h.db, h.ctx);
    let bundle = calendars.require(bundle.id).await?;

    let engine = AvailabilityEngine::new(h.db.clone());
    let err = engine
        .available_windows(
            h.ctx,
            &bundle,
            dt(2025, 6, 23, 9, 0),
            dt(2025, 6, 23, 10, 0),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CalendarError::EmptyBundleCalendar));
    Ok(())
}
