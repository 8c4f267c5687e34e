//! Test utilities: in-memory database plus a fully wired service stack
//! backed by the internal adapter and a fixed clock.

// Each test binary includes this module separately and uses a subset of it.
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use calsync::adapters::{AdapterRegistry, EventRecord, InternalCalendarAdapter};
use calsync::clock::FixedClock;
use calsync::config::WebhookConfig;
use calsync::jobs::{Job, JobQueue};
use calsync::models::enums::{CalendarKind, CalendarProvider, EventStatus};
use calsync::repositories::{CalendarRepository, NewCalendar, TenantContext, TenantRepository};
use calsync::service::CalendarService;
use calsync::sync::SyncEngine;
use calsync::webhooks::WebhookPipeline;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Everything a scenario needs, wired the way main() wires production,
/// with the internal adapter standing in for the provider.
pub struct Harness {
    pub db: DatabaseConnection,
    pub tenant_id: Uuid,
    pub ctx: TenantContext,
    pub clock: Arc<FixedClock>,
    pub internal: InternalCalendarAdapter,
    pub adapters: Arc<AdapterRegistry>,
    pub queue: JobQueue,
    pub receiver: UnboundedReceiver<Job>,
    pub service: CalendarService,
    pub engine: SyncEngine,
    pub pipeline: WebhookPipeline,
}

pub async fn harness() -> Result<Harness> {
    let db = setup_test_db().await?;

    let tenants = TenantRepository::new(&db);
    let tenant = tenants.create(Some("Test Tenant".to_string())).await?;
    let ctx = TenantContext::new(tenant.id);

    let clock = Arc::new(FixedClock::new(base_time()));
    let internal = InternalCalendarAdapter::new();
    let adapters = Arc::new(AdapterRegistry::new(internal.clone()));
    let (queue, receiver) = JobQueue::new();

    let service = CalendarService::new(
        db.clone(),
        clock.clone(),
        queue.clone(),
        Arc::clone(&adapters),
    );
    let engine = SyncEngine::new(db.clone(), Arc::clone(&adapters), clock.clone());
    let pipeline = WebhookPipeline::new(
        db.clone(),
        clock.clone(),
        queue.clone(),
        WebhookConfig::default(),
    );

    Ok(Harness {
        db,
        tenant_id: tenant.id,
        ctx,
        clock,
        internal,
        adapters,
        queue,
        receiver,
        service,
        engine,
        pipeline,
    })
}

/// 2025-06-22T00:00:00Z, the anchor used across scenarios.
pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-06-22T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn dt(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

/// Creates a calendar row mirroring an internal-adapter calendar.
pub async fn create_synced_calendar(
    harness: &Harness,
    external_id: &str,
    manages_available_windows: bool,
) -> Result<calsync::models::calendar::Model> {
    let calendars = CalendarRepository::new(&harness.db, harness.ctx);
    let calendar = calendars
        .create(NewCalendar {
            name: format!("Calendar {external_id}"),
            description: None,
            email: None,
            external_id: external_id.to_string(),
            provider: CalendarProvider::Internal,
            calendar_kind: CalendarKind::Personal,
            manages_available_windows,
            capacity: None,
            original_payload: None,
        })
        .await?;
    Ok(calendar)
}

/// Creates a plain virtual calendar (no provider linkage).
pub async fn create_virtual_calendar(
    harness: &Harness,
    name: &str,
) -> Result<calsync::models::calendar::Model> {
    Ok(harness
        .service
        .create_virtual_calendar(harness.ctx, name, None, false)
        .await?)
}

/// Convenience builder for provider-side event records.
pub fn provider_event(
    calendar_external_id: &str,
    external_id: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> EventRecord {
    EventRecord {
        external_id: external_id.to_string(),
        calendar_external_id: calendar_external_id.to_string(),
        title: format!("Event {external_id}"),
        description: String::new(),
        start,
        end,
        timezone: Some("UTC".to_string()),
        status: EventStatus::Confirmed,
        attendees: Vec::new(),
        recurrence_rule: None,
        recurring_event_id: None,
        original_payload: None,
    }
}
