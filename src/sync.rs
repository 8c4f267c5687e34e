//! Sync engine.
//!
//! Orchestrates one synchronization of a calendar over a window: stream the
//! provider's events page by page, classify each record against the local
//! baseline into an in-memory change set, then apply everything in a single
//! transaction (rules, events, blocks, updates, attendance, deletes), relink
//! orphaned recurring instances, prune overlapped availability windows, and
//! record the provider's next sync token.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDateTime;
use sea_orm::{ConnectionTrait, DatabaseConnection, IntoActiveModel, Set, TransactionTrait};
use serde_json::{Value as JsonValue, json};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{AdapterRegistry, EventRecord, ProviderAdapter, TimeWindow};
use crate::clock::Clock;
use crate::error::{CalendarError, CalendarResult};
use crate::models::blocked_time::Model as BlockedTimeModel;
use crate::models::calendar::Model as CalendarModel;
use crate::models::calendar_event::Model as EventModel;
use crate::models::calendar_sync::Model as SyncModel;
use crate::models::enums::EventStatus;
use crate::recurrence::RuleSpec;
use crate::repositories::{
    AttendanceRepository, AvailableTimeRepository, BlockedTimeRepository, CalendarRepository,
    CalendarSyncRepository, EventRepository, NewBlockedTime, NewEvent,
    ORIGINAL_PAYLOAD_META_KEY, PENDING_PARENT_META_KEY, RecurrenceRuleRepository, TenantContext,
};

/// Counters describing what a sync changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub created_events: usize,
    pub created_blocks: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped_malformed: usize,
}

/// Outcome of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRun {
    Completed(SyncStats),
    /// Another worker already claimed this sync row.
    Skipped,
}

/// Staged changes accumulated while streaming the provider, applied in one
/// transaction afterwards.
#[derive(Default)]
struct SyncChangeSet {
    events_to_create: Vec<(NewEvent, Option<RuleSpec>)>,
    blocks_to_create: Vec<NewBlockedTime>,
    events_to_update: Vec<crate::models::calendar_event::ActiveModel>,
    blocks_to_update: Vec<crate::models::blocked_time::ActiveModel>,
    /// (event id, attendee email, attendee name, status)
    attendee_updates: Vec<(Uuid, String, String, crate::models::enums::RsvpStatus)>,
    events_to_delete: Vec<String>,
    blocks_to_delete: Vec<String>,
    matched_external_ids: HashSet<String>,
    /// Intervals staged as busy, for the availability-window cleanup.
    staged_busy: Vec<(NaiveDateTime, NaiveDateTime)>,
    stats: SyncStats,
}

pub struct SyncEngine {
    db: DatabaseConnection,
    adapters: Arc<AdapterRegistry>,
    clock: Arc<dyn Clock>,
}

impl SyncEngine {
    pub fn new(
        db: DatabaseConnection,
        adapters: Arc<AdapterRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            adapters,
            clock,
        }
    }

    /// Runs the identified sync to completion. Claims the row (single-flight
    /// per calendar), executes the change-set transaction, and records the
    /// terminal status. Errors mark the row failed and propagate; the job
    /// runner decides whether to revive it.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id(), sync_id = %sync_id))]
    pub async fn run(&self, ctx: TenantContext, sync_id: Uuid) -> CalendarResult<SyncRun> {
        let syncs = CalendarSyncRepository::new(&self.db, ctx);
        let calendars = CalendarRepository::new(&self.db, ctx);

        let sync = syncs.require(sync_id).await?;
        let calendar = calendars.require(sync.calendar_id).await?;
        ctx.ensure_owns(calendar.tenant_id, "calendar")?;

        let adapter = self
            .adapters
            .adapter_for(calendar.provider)
            .ok_or(CalendarError::NotFound("provider adapter"))?;

        // The cursor from the last successful sync drives incremental mode.
        let sync_token = syncs.latest_success_token(calendar.id).await?;

        let Some(sync) = syncs.try_claim(&sync).await? else {
            debug!("sync already claimed elsewhere");
            return Ok(SyncRun::Skipped);
        };

        match self
            .execute(ctx, &calendar, &sync, adapter.as_ref(), sync_token.as_deref())
            .await
        {
            Ok((stats, next_sync_token)) => {
                syncs.mark_success(sync, next_sync_token).await?;
                let metric_labels = vec![("provider", calendar.provider.as_str().to_string())];
                metrics::counter!("calendar_sync_completed_total", &metric_labels).increment(1);
                info!(
                    created_events = stats.created_events,
                    created_blocks = stats.created_blocks,
                    updated = stats.updated,
                    deleted = stats.deleted,
                    "calendar sync completed"
                );
                Ok(SyncRun::Completed(stats))
            }
            Err(err) => {
                let metric_labels = vec![("provider", calendar.provider.as_str().to_string())];
                metrics::counter!("calendar_sync_failed_total", &metric_labels).increment(1);
                warn!(error = %err, "calendar sync failed");
                syncs.mark_failed(sync, &err.to_string()).await?;
                Err(err)
            }
        }
    }

    /// Streams the provider and applies the change set in one transaction.
    /// The only suspension points inside the transaction are the cursored
    /// provider page reads.
    async fn execute(
        &self,
        ctx: TenantContext,
        calendar: &CalendarModel,
        sync: &SyncModel,
        adapter: &ProviderAdapter,
        sync_token: Option<&str>,
    ) -> CalendarResult<(SyncStats, Option<String>)> {
        let window = TimeWindow {
            start: sync.start_at,
            end: sync.end_at,
        };

        let txn = self.db.begin().await?;

        let (mut changes, next_sync_token) = {
            let events = EventRepository::new(&txn, ctx);
            let blocks = BlockedTimeRepository::new(&txn, ctx);

            // Baselines keyed by provider id; provider-less rows (manual
            // blocks, internal events) are invisible to reconciliation.
            let events_by_external_id: HashMap<String, EventModel> = events
                .find_in_window(calendar.id, window.start, window.end)
                .await?
                .into_iter()
                .filter(|event| !event.external_id.is_empty())
                .map(|event| (event.external_id.clone(), event))
                .collect();
            let blocks_by_external_id: HashMap<String, BlockedTimeModel> = blocks
                .find_in_window(calendar.id, window.start, window.end)
                .await?
                .into_iter()
                .filter(|block| !block.external_id.is_empty())
                .map(|block| (block.external_id.clone(), block))
                .collect();

            let mut changes = SyncChangeSet::default();
            let mut next_sync_token: Option<String> = None;
            let mut page_token: Option<String> = None;

            loop {
                let page = adapter
                    .list_events_page(
                        &calendar.external_id,
                        window,
                        sync_token,
                        page_token.as_deref(),
                    )
                    .await?;

                for record in &page.events {
                    self.classify(
                        ctx,
                        &txn,
                        calendar,
                        record,
                        &events_by_external_id,
                        &blocks_by_external_id,
                        sync.should_update_events,
                        &mut changes,
                    )
                    .await?;
                }

                if let Some(token) = page.next_sync_token {
                    next_sync_token = Some(token);
                }
                page_token = page.next_page_token;
                if page_token.is_none() {
                    break;
                }
            }

            // Full sync: anything local the stream no longer mentions is gone
            // upstream. Incremental deletions arrive as explicit cancelled
            // records instead.
            if sync_token.is_none() {
                for (external_id, event) in &events_by_external_id {
                    if !changes.matched_external_ids.contains(external_id)
                        && event.start_at >= window.start
                    {
                        changes.events_to_delete.push(external_id.clone());
                    }
                }
                for (external_id, block) in &blocks_by_external_id {
                    if !changes.matched_external_ids.contains(external_id)
                        && block.start_at >= window.start
                    {
                        changes.blocks_to_delete.push(external_id.clone());
                    }
                }
            }

            (changes, next_sync_token)
        };

        self.apply(ctx, &txn, calendar, &mut changes).await?;
        self.relink_orphans(ctx, &txn, calendar).await?;

        if calendar.manages_available_windows {
            self.prune_available_windows(ctx, &txn, calendar, &changes, window)
                .await?;
        }

        // Persist the cursor on the sync row inside the same transaction.
        if let Some(token) = &next_sync_token {
            let mut active = sync.clone().into_active_model();
            active.next_sync_token = Set(Some(token.clone()));
            sea_orm::ActiveModelTrait::update(active, &txn).await?;
        }

        txn.commit().await?;
        Ok((changes.stats, next_sync_token))
    }

    /// Classifies one provider record against the local baseline.
    #[allow(clippy::too_many_arguments)]
    async fn classify<C: ConnectionTrait>(
        &self,
        ctx: TenantContext,
        txn: &C,
        calendar: &CalendarModel,
        record: &EventRecord,
        events_by_external_id: &HashMap<String, EventModel>,
        blocks_by_external_id: &HashMap<String, BlockedTimeModel>,
        should_update_events: bool,
        changes: &mut SyncChangeSet,
    ) -> CalendarResult<()> {
        if record.external_id.is_empty() {
            changes.stats.skipped_malformed += 1;
            warn!("provider record without id skipped");
            return Ok(());
        }

        let timezone = record
            .timezone
            .clone()
            .unwrap_or_else(|| "UTC".to_string());

        if let Some(existing) = events_by_external_id.get(&record.external_id) {
            changes.matched_external_ids.insert(record.external_id.clone());
            if !should_update_events {
                return Ok(());
            }
            if record.status == EventStatus::Cancelled {
                changes.events_to_delete.push(record.external_id.clone());
                changes.stats.deleted += 1;
                return Ok(());
            }

            let mut meta = existing
                .meta
                .clone()
                .unwrap_or_else(|| JsonValue::Object(Default::default()));
            if let Some(object) = meta.as_object_mut() {
                object.insert(
                    ORIGINAL_PAYLOAD_META_KEY.to_string(),
                    record.original_payload.clone().unwrap_or(JsonValue::Null),
                );
            }

            let mut active = existing.clone().into_active_model();
            active.title = Set(record.title.clone());
            active.description = Set(record.description.clone());
            active.start_at = Set(record.start);
            active.end_at = Set(record.end);
            active.timezone = Set(timezone);
            active.meta = Set(Some(meta));
            active.updated_at = Set(self.clock.now().into());
            changes.staged_busy.push((record.start, record.end));
            changes.events_to_update.push(active);
            changes.stats.updated += 1;

            self.stage_attendee_diff(ctx, txn, existing, record, changes)
                .await?;
            return Ok(());
        }

        if let Some(existing) = blocks_by_external_id.get(&record.external_id) {
            changes.matched_external_ids.insert(record.external_id.clone());
            if record.status == EventStatus::Cancelled {
                changes.blocks_to_delete.push(record.external_id.clone());
                changes.stats.deleted += 1;
                return Ok(());
            }

            let mut meta = existing
                .meta
                .clone()
                .unwrap_or_else(|| JsonValue::Object(Default::default()));
            if let Some(object) = meta.as_object_mut() {
                object.insert(
                    ORIGINAL_PAYLOAD_META_KEY.to_string(),
                    record.original_payload.clone().unwrap_or(JsonValue::Null),
                );
            }

            let mut active = existing.clone().into_active_model();
            active.start_at = Set(record.start);
            active.end_at = Set(record.end);
            active.timezone = Set(timezone);
            active.reason = Set(record.title.clone());
            active.meta = Set(Some(meta));
            active.updated_at = Set(self.clock.now().into());
            changes.staged_busy.push((record.start, record.end));
            changes.blocks_to_update.push(active);
            changes.stats.updated += 1;
            return Ok(());
        }

        // A cancelled record we never mirrored needs no action.
        if record.status == EventStatus::Cancelled {
            changes.matched_external_ids.insert(record.external_id.clone());
            return Ok(());
        }

        changes.matched_external_ids.insert(record.external_id.clone());
        let meta = json!({
            ORIGINAL_PAYLOAD_META_KEY: record.original_payload.clone().unwrap_or(JsonValue::Null),
        });

        if let Some(master_external_id) = &record.recurring_event_id {
            let events = EventRepository::new(txn, ctx);
            match events.get_by_external_id(master_external_id).await? {
                Some(parent) => {
                    // Master was created through us, so the instance is a
                    // first-class event exception.
                    changes.events_to_create.push((
                        NewEvent {
                            calendar_id: calendar.id,
                            title: record.title.clone(),
                            description: record.description.clone(),
                            start_at: record.start,
                            end_at: record.end,
                            timezone,
                            external_id: record.external_id.clone(),
                            status: EventStatus::Confirmed,
                            recurrence_rule_id: None,
                            parent_event_id: Some(parent.id),
                            recurrence_id: Some(record.start),
                            is_recurring_exception: true,
                            bulk_modification_parent_id: None,
                            meta: Some(meta),
                        },
                        None,
                    ));
                    changes.staged_busy.push((record.start, record.end));
                    changes.stats.created_events += 1;
                }
                None => {
                    // Master not synced yet; mirror as an opaque block and
                    // remember who the parent should be.
                    let mut meta = meta;
                    if let Some(object) = meta.as_object_mut() {
                        object.insert(
                            PENDING_PARENT_META_KEY.to_string(),
                            JsonValue::String(master_external_id.clone()),
                        );
                    }
                    changes.blocks_to_create.push(NewBlockedTime {
                        calendar_id: calendar.id,
                        start_at: record.start,
                        end_at: record.end,
                        timezone,
                        reason: record.title.clone(),
                        external_id: record.external_id.clone(),
                        recurrence_rule_id: None,
                        recurrence_id: None,
                        is_recurring_exception: false,
                        bulk_modification_parent_id: None,
                        meta: Some(meta),
                    });
                    changes.staged_busy.push((record.start, record.end));
                    changes.stats.created_blocks += 1;
                }
            }
            return Ok(());
        }

        if let Some(raw_rule) = &record.recurrence_rule {
            // Master recurring event arriving from sync. A rule outside the
            // supported subset poisons only this record.
            match RuleSpec::from_rrule_str(raw_rule) {
                Ok(rule) => {
                    changes.events_to_create.push((
                        NewEvent {
                            calendar_id: calendar.id,
                            title: record.title.clone(),
                            description: record.description.clone(),
                            start_at: record.start,
                            end_at: record.end,
                            timezone,
                            external_id: record.external_id.clone(),
                            status: EventStatus::Confirmed,
                            recurrence_rule_id: None,
                            parent_event_id: None,
                            recurrence_id: None,
                            is_recurring_exception: false,
                            bulk_modification_parent_id: None,
                            meta: Some(meta),
                        },
                        Some(rule),
                    ));
                    changes.stats.created_events += 1;
                }
                Err(err) => {
                    changes.stats.skipped_malformed += 1;
                    warn!(
                        external_id = %record.external_id,
                        error = %err,
                        "skipping event with unsupported recurrence rule"
                    );
                }
            }
            return Ok(());
        }

        // Plain provider event: mirrored as an opaque block so the provider
        // stays authoritative.
        changes.blocks_to_create.push(NewBlockedTime {
            calendar_id: calendar.id,
            start_at: record.start,
            end_at: record.end,
            timezone,
            reason: record.title.clone(),
            external_id: record.external_id.clone(),
            recurrence_rule_id: None,
            recurrence_id: None,
            is_recurring_exception: false,
            bulk_modification_parent_id: None,
            meta: Some(meta),
        });
        changes.staged_busy.push((record.start, record.end));
        changes.stats.created_blocks += 1;
        Ok(())
    }

    /// Stages attendee additions/status changes for an updated event. The
    /// account service is external, so provider attendees are reconciled as
    /// external attendees by email.
    async fn stage_attendee_diff<C: ConnectionTrait>(
        &self,
        ctx: TenantContext,
        txn: &C,
        existing: &EventModel,
        record: &EventRecord,
        changes: &mut SyncChangeSet,
    ) -> CalendarResult<()> {
        if record.attendees.is_empty() {
            return Ok(());
        }
        let attendance = AttendanceRepository::new(txn, ctx);
        let current = attendance.external_attendances_of(existing.id).await?;

        for attendee in &record.attendees {
            if attendee.email.is_empty() {
                continue;
            }
            let known = current.iter().find(|(_, attendee_row)| {
                attendee_row
                    .as_ref()
                    .map(|row| row.email == attendee.email)
                    .unwrap_or(false)
            });
            match known {
                Some((attendance_row, _)) if attendance_row.status == attendee.status => {}
                _ => {
                    changes.attendee_updates.push((
                        existing.id,
                        attendee.email.clone(),
                        attendee.name.clone(),
                        attendee.status,
                    ));
                }
            }
        }
        Ok(())
    }

    /// Applies the staged change set in dependency order.
    async fn apply<C: ConnectionTrait>(
        &self,
        ctx: TenantContext,
        txn: &C,
        calendar: &CalendarModel,
        changes: &mut SyncChangeSet,
    ) -> CalendarResult<()> {
        let rules = RecurrenceRuleRepository::new(txn, ctx);
        let events = EventRepository::new(txn, ctx);
        let blocks = BlockedTimeRepository::new(txn, ctx);
        let attendance = AttendanceRepository::new(txn, ctx);

        // Rules precede the events that reference them.
        for (mut new_event, rule) in changes.events_to_create.drain(..) {
            if let Some(rule) = rule {
                let stored = rules.create(&rule).await?;
                new_event.recurrence_rule_id = Some(stored.id);
            }
            events.insert(new_event).await?;
        }

        for new_block in changes.blocks_to_create.drain(..) {
            blocks.insert(new_block).await?;
        }

        for active in changes.events_to_update.drain(..) {
            events.update(active).await?;
        }

        for active in changes.blocks_to_update.drain(..) {
            blocks.update(active).await?;
        }

        for (event_id, email, name, status) in changes.attendee_updates.drain(..) {
            let attendee = attendance.get_or_create_external_attendee(&email, &name).await?;
            let existing = attendance.external_attendances_of(event_id).await?;
            match existing
                .into_iter()
                .find(|(_, row)| row.as_ref().map(|a| a.id) == Some(attendee.id))
            {
                Some((attendance_row, _)) => {
                    attendance
                        .set_external_attendance_status(attendance_row, status)
                        .await?;
                }
                None => {
                    attendance
                        .add_external_attendance(event_id, attendee.id, status)
                        .await?;
                }
            }
        }

        let deleted_events = events
            .delete_by_external_ids(calendar.id, &changes.events_to_delete)
            .await?;
        let deleted_blocks = blocks
            .delete_by_external_ids(calendar.id, &changes.blocks_to_delete)
            .await?;
        changes.stats.deleted = (deleted_events + deleted_blocks) as usize;

        Ok(())
    }

    /// Links instances that arrived before their master. Blocks whose master
    /// is now a local event are promoted to first-class instances.
    async fn relink_orphans<C: ConnectionTrait>(
        &self,
        ctx: TenantContext,
        txn: &C,
        calendar: &CalendarModel,
    ) -> CalendarResult<()> {
        let events = EventRepository::new(txn, ctx);
        let blocks = BlockedTimeRepository::new(txn, ctx);

        for orphan in events.find_with_pending_parent(calendar.id).await? {
            let Some(parent_external_id) = orphan
                .meta
                .as_ref()
                .and_then(|meta| meta.get(PENDING_PARENT_META_KEY))
                .and_then(|value| value.as_str())
                .map(String::from)
            else {
                continue;
            };
            if let Some(parent) = events.get_by_external_id(&parent_external_id).await? {
                events.relink_to_parent(orphan, parent.id).await?;
            }
        }

        for orphan in blocks.find_with_pending_parent(calendar.id).await? {
            let Some(parent_external_id) = orphan
                .meta
                .as_ref()
                .and_then(|meta| meta.get(PENDING_PARENT_META_KEY))
                .and_then(|value| value.as_str())
                .map(String::from)
            else {
                continue;
            };
            let Some(parent) = events.get_by_external_id(&parent_external_id).await? else {
                // Master still missing; try again next sync.
                continue;
            };

            let mut meta = orphan
                .meta
                .clone()
                .unwrap_or_else(|| JsonValue::Object(Default::default()));
            if let Some(object) = meta.as_object_mut() {
                object.remove(PENDING_PARENT_META_KEY);
            }

            events
                .insert(NewEvent {
                    calendar_id: orphan.calendar_id,
                    title: orphan.reason.clone(),
                    description: String::new(),
                    start_at: orphan.start_at,
                    end_at: orphan.end_at,
                    timezone: orphan.timezone.clone(),
                    external_id: orphan.external_id.clone(),
                    status: EventStatus::Confirmed,
                    recurrence_rule_id: None,
                    parent_event_id: Some(parent.id),
                    recurrence_id: Some(orphan.start_at),
                    is_recurring_exception: true,
                    bulk_modification_parent_id: None,
                    meta: Some(meta),
                })
                .await?;
            let external_ids = vec![orphan.external_id.clone()];
            blocks
                .delete_by_external_ids(orphan.calendar_id, &external_ids)
                .await?;
        }

        Ok(())
    }

    /// Deletes AvailableTime windows overlapped by newly staged busy time.
    async fn prune_available_windows<C: ConnectionTrait>(
        &self,
        ctx: TenantContext,
        txn: &C,
        calendar: &CalendarModel,
        changes: &SyncChangeSet,
        window: TimeWindow,
    ) -> CalendarResult<()> {
        if changes.staged_busy.is_empty() {
            return Ok(());
        }
        let available = AvailableTimeRepository::new(txn, ctx);
        let windows = available
            .find_in_window(calendar.id, window.start, window.end)
            .await?;

        let to_delete: Vec<Uuid> = windows
            .into_iter()
            .filter(|available_window| {
                changes.staged_busy.iter().any(|(busy_start, busy_end)| {
                    *busy_start < available_window.end_at && *busy_end > available_window.start_at
                })
            })
            .map(|available_window| available_window.id)
            .collect();

        let pruned = available.delete_ids(&to_delete).await?;
        if pruned > 0 {
            debug!(pruned, "removed availability windows overlapped by sync");
        }
        Ok(())
    }
}
