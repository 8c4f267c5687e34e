//! Sync engine integration tests against the internal adapter.

use anyhow::Result;

use calsync::models::enums::CalendarSyncStatus;
use calsync::repositories::{
    AvailableTimeRepository, BlockedTimeRepository, CalendarSyncRepository, EventRepository,
    NewBlockedTime, NewEvent, PENDING_PARENT_META_KEY,
};
use calsync::sync::SyncRun;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{create_synced_calendar, dt, harness, provider_event};

async fn run_sync(
    harness: &test_utils::Harness,
    calendar_id: uuid::Uuid,
    window: (chrono::NaiveDateTime, chrono::NaiveDateTime),
) -> Result<uuid::Uuid> {
    let sync = harness
        .service
        .request_calendar_sync(harness.ctx, calendar_id, window.0, window.1, true)
        .await?;
    let run = harness.engine.run(harness.ctx, sync.id).await?;
    assert!(matches!(run, SyncRun::Completed(_)));
    Ok(sync.id)
}

#[tokio::test]
async fn incremental_cancellation_deletes_local_mirror() -> Result<()> {
    let h = harness().await?;
    let calendar = create_synced_calendar(&h, "cal-1", false).await?;
    let window = (dt(2025, 6, 20, 0, 0), dt(2025, 7, 25, 0, 0));

    // Local mirror of provider event E1 over 2025-06-22T00Z..2025-06-23T00Z.
    let events = EventRepository::new(&h.db, h.ctx);
    events
        .insert(NewEvent {
            calendar_id: calendar.id,
            title: "Mirrored".to_string(),
            description: String::new(),
            start_at: dt(2025, 6, 22, 0, 0),
            end_at: dt(2025, 6, 23, 0, 0),
            timezone: "UTC".to_string(),
            external_id: "E1".to_string(),
            status: calsync::models::enums::EventStatus::Confirmed,
            recurrence_rule_id: None,
            parent_event_id: None,
            recurrence_id: None,
            is_recurring_exception: false,
            bulk_modification_parent_id: None,
            meta: None,
        })
        .await?;
    h.internal.seed_event(provider_event(
        "cal-1",
        "E1",
        dt(2025, 6, 22, 0, 0),
        dt(2025, 6, 23, 0, 0),
    ));

    // First sync is full and records the provider cursor.
    run_sync(&h, calendar.id, window).await?;
    let syncs = CalendarSyncRepository::new(&h.db, h.ctx);
    let token_after_full = syncs.latest_success_token(calendar.id).await?;
    assert!(token_after_full.is_some());

    // Provider deletes E1; the next (incremental) sync streams it cancelled.
    h.internal.seed_delete("cal-1", "E1");
    let expected_token = h.internal.current_sync_token();
    let second_sync_id = run_sync(&h, calendar.id, window).await?;

    assert!(events.get_by_external_id("E1").await?.is_none());

    let second_sync = syncs.require(second_sync_id).await?;
    assert_eq!(second_sync.status, CalendarSyncStatus::Success);
    assert_eq!(second_sync.next_sync_token.as_deref(), Some(expected_token.as_str()));
    Ok(())
}

#[tokio::test]
async fn recurring_instance_before_master_is_relinked() -> Result<()> {
    let h = harness().await?;
    let calendar = create_synced_calendar(&h, "cal-1", false).await?;
    let window = (dt(2025, 6, 1, 0, 0), dt(2025, 8, 1, 0, 0));

    // Instance I arrives before its master M.
    let mut instance = provider_event("cal-1", "I", dt(2025, 6, 23, 9, 0), dt(2025, 6, 23, 10, 0));
    instance.recurring_event_id = Some("M".to_string());
    h.internal.seed_event(instance);

    run_sync(&h, calendar.id, window).await?;

    let blocks = BlockedTimeRepository::new(&h.db, h.ctx);
    let pending = blocks.find_with_pending_parent(calendar.id).await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].external_id, "I");
    assert_eq!(
        pending[0]
            .meta
            .as_ref()
            .and_then(|meta| meta.get(PENDING_PARENT_META_KEY))
            .and_then(|value| value.as_str()),
        Some("M")
    );

    // Master shows up in the next delivery.
    let mut master = provider_event("cal-1", "M", dt(2025, 6, 16, 9, 0), dt(2025, 6, 16, 10, 0));
    master.recurrence_rule = Some("FREQ=WEEKLY;COUNT=4".to_string());
    h.internal.seed_event(master);

    run_sync(&h, calendar.id, window).await?;

    let events = EventRepository::new(&h.db, h.ctx);
    let master_row = events
        .get_by_external_id("M")
        .await?
        .expect("master event exists");
    assert!(master_row.recurrence_rule_id.is_some());

    let instance_row = events
        .get_by_external_id("I")
        .await?
        .expect("instance promoted to calendar event");
    assert_eq!(instance_row.parent_event_id, Some(master_row.id));
    assert_eq!(instance_row.recurrence_id, Some(dt(2025, 6, 23, 9, 0)));
    assert!(instance_row.is_recurring_exception);
    assert!(
        instance_row
            .meta
            .as_ref()
            .and_then(|meta| meta.get(PENDING_PARENT_META_KEY))
            .is_none(),
        "pending parent marker cleared"
    );

    assert!(blocks.find_with_pending_parent(calendar.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn sync_is_idempotent_for_identical_provider_state() -> Result<()> {
    let h = harness().await?;
    let calendar = create_synced_calendar(&h, "cal-1", false).await?;
    let window = (dt(2025, 6, 1, 0, 0), dt(2025, 8, 1, 0, 0));

    h.internal.seed_event(provider_event(
        "cal-1",
        "A",
        dt(2025, 6, 23, 9, 0),
        dt(2025, 6, 23, 10, 0),
    ));
    h.internal.seed_event(provider_event(
        "cal-1",
        "B",
        dt(2025, 6, 24, 9, 0),
        dt(2025, 6, 24, 10, 0),
    ));

    run_sync(&h, calendar.id, window).await?;

    let blocks = BlockedTimeRepository::new(&h.db, h.ctx);
    let first_state: Vec<_> = blocks
        .find_in_window(calendar.id, window.0, window.1)
        .await?
        .into_iter()
        .map(|block| (block.external_id, block.start_at, block.end_at))
        .collect();
    assert_eq!(first_state.len(), 2);

    // Provider state unchanged; running again must not alter persistence.
    run_sync(&h, calendar.id, window).await?;
    let second_state: Vec<_> = blocks
        .find_in_window(calendar.id, window.0, window.1)
        .await?
        .into_iter()
        .map(|block| (block.external_id, block.start_at, block.end_at))
        .collect();

    assert_eq!(first_state, second_state);
    Ok(())
}

#[tokio::test]
async fn full_sync_reconciles_deletions_by_absence() -> Result<()> {
    let h = harness().await?;
    let calendar = create_synced_calendar(&h, "cal-1", false).await?;
    let window = (dt(2025, 6, 1, 0, 0), dt(2025, 8, 1, 0, 0));

    // A stale provider-originated block the stream no longer mentions.
    let blocks = BlockedTimeRepository::new(&h.db, h.ctx);
    blocks
        .insert(NewBlockedTime {
            calendar_id: calendar.id,
            start_at: dt(2025, 6, 10, 9, 0),
            end_at: dt(2025, 6, 10, 10, 0),
            timezone: "UTC".to_string(),
            reason: "stale".to_string(),
            external_id: "GONE".to_string(),
            recurrence_rule_id: None,
            recurrence_id: None,
            is_recurring_exception: false,
            bulk_modification_parent_id: None,
            meta: None,
        })
        .await?;

    // A manual block without provider id must survive reconciliation.
    blocks
        .insert(NewBlockedTime {
            calendar_id: calendar.id,
            start_at: dt(2025, 6, 11, 9, 0),
            end_at: dt(2025, 6, 11, 10, 0),
            timezone: "UTC".to_string(),
            reason: "manual".to_string(),
            external_id: String::new(),
            recurrence_rule_id: None,
            recurrence_id: None,
            is_recurring_exception: false,
            bulk_modification_parent_id: None,
            meta: None,
        })
        .await?;

    h.internal.seed_event(provider_event(
        "cal-1",
        "LIVE",
        dt(2025, 6, 23, 9, 0),
        dt(2025, 6, 23, 10, 0),
    ));

    run_sync(&h, calendar.id, window).await?;

    let remaining = blocks.find_in_window(calendar.id, window.0, window.1).await?;
    let ids: Vec<&str> = remaining
        .iter()
        .map(|block| block.external_id.as_str())
        .collect();
    assert!(ids.contains(&"LIVE"));
    assert!(ids.contains(&""), "manual block kept");
    assert!(!ids.contains(&"GONE"), "stale mirror removed");
    Ok(())
}

#[tokio::test]
async fn sync_prunes_overlapped_availability_windows() -> Result<()> {
    let h = harness().await?;
    let calendar = create_synced_calendar(&h, "cal-1", true).await?;
    let window = (dt(2025, 6, 1, 0, 0), dt(2025, 8, 1, 0, 0));

    let available = AvailableTimeRepository::new(&h.db, h.ctx);
    available
        .insert(calendar.id, dt(2025, 6, 23, 9, 0), dt(2025, 6, 23, 17, 0), "UTC")
        .await?;
    available
        .insert(calendar.id, dt(2025, 6, 24, 9, 0), dt(2025, 6, 24, 17, 0), "UTC")
        .await?;

    // Provider busy time lands inside the first window only.
    h.internal.seed_event(provider_event(
        "cal-1",
        "BUSY",
        dt(2025, 6, 23, 10, 0),
        dt(2025, 6, 23, 11, 0),
    ));

    run_sync(&h, calendar.id, window).await?;

    let remaining = available
        .find_in_window(calendar.id, window.0, window.1)
        .await?;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].start_at, dt(2025, 6, 24, 9, 0));
    Ok(())
}

#[tokio::test]
async fn failed_claim_reports_contention() -> Result<()> {
    let h = harness().await?;
    let calendar = create_synced_calendar(&h, "cal-1", false).await?;

    let sync = h
        .service
        .request_calendar_sync(
            h.ctx,
            calendar.id,
            dt(2025, 6, 1, 0, 0),
            dt(2025, 7, 1, 0, 0),
            true,
        )
        .await?;

    // Claim it out from under the engine.
    let syncs = CalendarSyncRepository::new(&h.db, h.ctx);
    let row = syncs.require(sync.id).await?;
    assert!(syncs.try_claim(&row).await?.is_some());

    let run = h.engine.run(h.ctx, sync.id).await?;
    assert!(matches!(run, SyncRun::Skipped));
    Ok(())
}
