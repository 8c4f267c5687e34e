//! Webhook pipeline and endpoint tests.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Duration;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use tower::util::ServiceExt;
use uuid::Uuid;

use calsync::adapters::SubscriptionHandle;
use calsync::jobs::Job;
use calsync::models::enums::{CalendarProvider, WebhookProcessingStatus};
use calsync::models::webhook_event;
use calsync::repositories::WebhookRepository;
use calsync::server::{AppState, create_app};
use calsync::webhooks::WebhookOutcome;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{Harness, create_synced_calendar, harness};

fn google_headers(calendar_external_id: &str) -> HashMap<String, String> {
    HashMap::from([
        ("x-goog-channel-id".to_string(), "chan-1".to_string()),
        ("x-goog-resource-id".to_string(), "res-1".to_string()),
        ("x-goog-resource-state".to_string(), "exists".to_string()),
        (
            "x-goog-resource-uri".to_string(),
            format!(
                "https://www.googleapis.com/calendar/v3/calendars/{calendar_external_id}/events?alt=json"
            ),
        ),
    ])
}

fn subscription_handle(
    id: &str,
    resource: &str,
    expires_at: chrono::NaiveDateTime,
) -> SubscriptionHandle {
    SubscriptionHandle {
        external_subscription_id: id.to_string(),
        external_resource_id: resource.to_string(),
        channel_id: format!("chan-{id}"),
        verification_token: "token".to_string(),
        callback_url: "https://example.com/webhooks".to_string(),
        expires_at,
    }
}

fn app(h: &Harness) -> axum::Router {
    create_app(AppState {
        db: h.db.clone(),
        pipeline: Arc::new(calsync::webhooks::WebhookPipeline::new(
            h.db.clone(),
            h.clock.clone(),
            h.queue.clone(),
            calsync::config::WebhookConfig::default(),
        )),
    })
}

/// Calendars watched by Google channels use the Google provider here so the
/// pipeline's calendar lookup matches the notification.
async fn google_calendar(h: &Harness, external_id: &str) -> Result<calsync::models::calendar::Model> {
    use calsync::models::enums::CalendarKind;
    use calsync::repositories::{CalendarRepository, NewCalendar};
    let calendars = CalendarRepository::new(&h.db, h.ctx);
    Ok(calendars
        .create(NewCalendar {
            name: "Watched".to_string(),
            description: None,
            email: None,
            external_id: external_id.to_string(),
            provider: CalendarProvider::Google,
            calendar_kind: CalendarKind::Personal,
            manages_available_windows: false,
            capacity: None,
            original_payload: None,
        })
        .await?)
}

#[tokio::test]
async fn google_notification_enqueues_sync() -> Result<()> {
    let mut h = harness().await?;
    let calendar = google_calendar(&h, "watched-cal").await?;

    let outcome = h
        .pipeline
        .handle(
            CalendarProvider::Google,
            h.tenant_id,
            google_headers("watched-cal"),
            HashMap::new(),
            "",
        )
        .await?;
    assert_eq!(outcome, WebhookOutcome::Accepted);

    // One sync enqueued, linked from the recorded webhook event.
    let job = h.receiver.try_recv()?;
    let Job::SyncCalendar { sync_id, tenant_id } = job else {
        panic!("expected sync job");
    };
    assert_eq!(tenant_id, h.tenant_id);

    let events = webhook_event::Entity::find()
        .filter(webhook_event::Column::TenantId.eq(h.tenant_id))
        .all(&h.db)
        .await?;
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].processing_status,
        WebhookProcessingStatus::Processed
    );
    assert_eq!(events[0].event_type, "exists");
    assert_eq!(events[0].external_calendar_id, calendar.external_id);
    assert_eq!(events[0].calendar_sync_id, Some(sync_id));
    Ok(())
}

#[tokio::test]
async fn duplicate_notifications_coalesce_within_window() -> Result<()> {
    let mut h = harness().await?;
    google_calendar(&h, "watched-cal").await?;

    for _ in 0..3 {
        h.pipeline
            .handle(
                CalendarProvider::Google,
                h.tenant_id,
                google_headers("watched-cal"),
                HashMap::new(),
                "",
            )
            .await?;
        h.clock.advance(Duration::seconds(30));
    }

    // All three deliveries collapse onto a single sync job.
    let mut sync_ids = Vec::new();
    while let Ok(job) = h.receiver.try_recv() {
        if let Job::SyncCalendar { sync_id, .. } = job {
            sync_ids.push(sync_id);
        }
    }
    assert_eq!(sync_ids.len(), 1);

    let events = webhook_event::Entity::find()
        .filter(webhook_event::Column::TenantId.eq(h.tenant_id))
        .all(&h.db)
        .await?;
    assert_eq!(events.len(), 3);
    assert!(
        events
            .iter()
            .all(|event| event.calendar_sync_id == Some(sync_ids[0])),
        "all deliveries link to the coalesced sync"
    );
    Ok(())
}

#[tokio::test]
async fn notifications_after_window_get_fresh_sync() -> Result<()> {
    let mut h = harness().await?;
    google_calendar(&h, "watched-cal").await?;

    h.pipeline
        .handle(
            CalendarProvider::Google,
            h.tenant_id,
            google_headers("watched-cal"),
            HashMap::new(),
            "",
        )
        .await?;

    // Past the coalesce window a new delivery gets its own sync.
    h.clock.advance(Duration::seconds(301));
    h.pipeline
        .handle(
            CalendarProvider::Google,
            h.tenant_id,
            google_headers("watched-cal"),
            HashMap::new(),
            "",
        )
        .await?;

    let mut sync_ids = Vec::new();
    while let Ok(Job::SyncCalendar { sync_id, .. }) = h.receiver.try_recv() {
        sync_ids.push(sync_id);
    }
    assert_eq!(sync_ids.len(), 2);
    assert_ne!(sync_ids[0], sync_ids[1]);
    Ok(())
}

#[tokio::test]
async fn google_sync_state_is_ignored() -> Result<()> {
    let mut h = harness().await?;
    google_calendar(&h, "watched-cal").await?;

    let mut headers = google_headers("watched-cal");
    headers.insert("x-goog-resource-state".to_string(), "sync".to_string());

    h.pipeline
        .handle(
            CalendarProvider::Google,
            h.tenant_id,
            headers,
            HashMap::new(),
            "",
        )
        .await?;

    assert!(h.receiver.try_recv().is_err(), "no sync enqueued");
    let events = webhook_event::Entity::find()
        .filter(webhook_event::Column::TenantId.eq(h.tenant_id))
        .all(&h.db)
        .await?;
    assert_eq!(events[0].processing_status, WebhookProcessingStatus::Ignored);
    Ok(())
}

#[tokio::test]
async fn unknown_calendar_marks_event_failed_but_acknowledges() -> Result<()> {
    let h = harness().await?;

    let outcome = h
        .pipeline
        .handle(
            CalendarProvider::Google,
            h.tenant_id,
            google_headers("never-imported"),
            HashMap::new(),
            "",
        )
        .await?;
    assert_eq!(outcome, WebhookOutcome::Accepted);

    let events = webhook_event::Entity::find()
        .filter(webhook_event::Column::TenantId.eq(h.tenant_id))
        .all(&h.db)
        .await?;
    assert_eq!(events[0].processing_status, WebhookProcessingStatus::Failed);
    assert!(events[0].error_message.is_some());
    Ok(())
}

#[tokio::test]
async fn google_endpoint_rejects_missing_headers() -> Result<()> {
    let h = harness().await?;
    let response = app(&h)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/webhooks/google-calendar/{}/", h.tenant_id))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Nothing was recorded for the rejected delivery.
    let events = webhook_event::Entity::find()
        .filter(webhook_event::Column::TenantId.eq(h.tenant_id))
        .all(&h.db)
        .await?;
    assert!(events.is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_tenant_is_a_404() -> Result<()> {
    let h = harness().await?;
    let response = app(&h)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/webhooks/google-calendar/{}/", Uuid::new_v4()))
                .header("x-goog-channel-id", "chan-1")
                .header("x-goog-resource-id", "res-1")
                .header("x-goog-resource-state", "exists")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn microsoft_validation_token_handshake() -> Result<()> {
    let h = harness().await?;

    // A script injection attempt is rejected before any reflection.
    let response = app(&h)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!(
                    "/webhooks/microsoft-calendar/{}/?validationToken=%3Cscript%3Ealert(1)%3C%2Fscript%3E",
                    h.tenant_id
                ))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // A canonical UUID is echoed back as plain text.
    let token = "f6c2e504-4a92-4a5c-9b35-d9c1c2a6ab10";
    let response = app(&h)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!(
                    "/webhooks/microsoft-calendar/{}/?validationToken={token}",
                    h.tenant_id
                ))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024).await?;
    assert_eq!(std::str::from_utf8(&body)?, token);
    Ok(())
}

#[tokio::test]
async fn find_expiring_flags_subscriptions_inside_the_horizon() -> Result<()> {
    let h = harness().await?;
    let cal_a = google_calendar(&h, "cal-a").await?;
    let cal_b = google_calendar(&h, "cal-b").await?;
    let now = chrono::Utc::now();

    let webhooks = WebhookRepository::new(&h.db, h.ctx);
    webhooks
        .upsert_subscription(
            cal_a.id,
            CalendarProvider::Google,
            &subscription_handle("sub-soon", "cal-a", (now + Duration::minutes(30)).naive_utc()),
        )
        .await?;
    webhooks
        .upsert_subscription(
            cal_b.id,
            CalendarProvider::Google,
            &subscription_handle("sub-later", "cal-b", (now + Duration::days(20)).naive_utc()),
        )
        .await?;

    let expiring = webhooks.find_expiring(Duration::hours(2)).await?;
    assert_eq!(expiring.len(), 1);
    assert_eq!(expiring[0].external_subscription_id, "sub-soon");

    // A tighter horizon excludes it.
    assert!(webhooks.find_expiring(Duration::minutes(5)).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn find_stale_flags_long_silent_subscriptions() -> Result<()> {
    let h = harness().await?;
    let cal_a = google_calendar(&h, "cal-a").await?;
    let cal_b = google_calendar(&h, "cal-b").await?;
    let cal_c = google_calendar(&h, "cal-c").await?;
    let now = chrono::Utc::now();

    let webhooks = WebhookRepository::new(&h.db, h.ctx);
    let silent = webhooks
        .upsert_subscription(
            cal_a.id,
            CalendarProvider::Google,
            &subscription_handle("sub-silent", "cal-a", (now + Duration::days(20)).naive_utc()),
        )
        .await?;
    webhooks
        .touch_last_notification(silent, now - Duration::days(5))
        .await?;

    let healthy = webhooks
        .upsert_subscription(
            cal_b.id,
            CalendarProvider::Google,
            &subscription_handle("sub-healthy", "cal-b", (now + Duration::days(20)).naive_utc()),
        )
        .await?;
    webhooks
        .touch_last_notification(healthy, now - Duration::hours(1))
        .await?;

    // Freshly armed, never notified: its creation time is recent, so it is
    // not stale yet.
    webhooks
        .upsert_subscription(
            cal_c.id,
            CalendarProvider::Google,
            &subscription_handle("sub-fresh", "cal-c", (now + Duration::days(20)).naive_utc()),
        )
        .await?;

    let stale = webhooks.find_stale(Duration::hours(48)).await?;
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].external_subscription_id, "sub-silent");

    // A wider silence allowance clears it.
    assert!(webhooks.find_stale(Duration::days(10)).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn expiring_subscriptions_enqueue_renewal_jobs() -> Result<()> {
    use calsync::config::JobRunnerConfig;
    use calsync::jobs::JobRunner;
    use calsync::service::CalendarService;
    use calsync::sync::SyncEngine;

    let mut h = harness().await?;
    let calendar = google_calendar(&h, "cal-a").await?;
    let now = chrono::Utc::now();

    let webhooks = WebhookRepository::new(&h.db, h.ctx);
    let subscription = webhooks
        .upsert_subscription(
            calendar.id,
            CalendarProvider::Google,
            &subscription_handle("sub-soon", "cal-a", (now + Duration::minutes(30)).naive_utc()),
        )
        .await?;

    let runner = JobRunner::new(
        h.db.clone(),
        Arc::new(SyncEngine::new(
            h.db.clone(),
            Arc::clone(&h.adapters),
            h.clock.clone(),
        )),
        Arc::new(CalendarService::new(
            h.db.clone(),
            h.clock.clone(),
            h.queue.clone(),
            Arc::clone(&h.adapters),
        )),
        JobRunnerConfig::default(),
    );

    let count = runner
        .enqueue_expiring_subscriptions(&h.queue, 2 * 3600)
        .await?;
    assert_eq!(count, 1);

    let Job::RenewSubscription {
        tenant_id,
        subscription_id,
    } = h.receiver.try_recv()?
    else {
        panic!("expected renewal job");
    };
    assert_eq!(tenant_id, h.tenant_id);
    assert_eq!(subscription_id, subscription.id);
    Ok(())
}

#[tokio::test]
async fn microsoft_notification_requires_known_subscription() -> Result<()> {
    let mut h = harness().await?;
    let calendar = create_synced_calendar(&h, "ms-cal", false).await?;

    let notification = serde_json::json!({
        "value": [{
            "subscriptionId": "sub-42",
            "changeType": "updated",
            "resource": format!("me/calendars/{}/events/evt-1", calendar.external_id),
        }]
    })
    .to_string();

    // Unknown subscription: refused as a validation failure.
    let err = h
        .pipeline
        .handle(
            CalendarProvider::Microsoft,
            h.tenant_id,
            HashMap::new(),
            HashMap::new(),
            &notification,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        calsync::error::CalendarError::WebhookValidationFailed(_)
    ));

    // Register the subscription; the same notification now processes. The
    // watched calendar is registered under the Microsoft provider.
    use calsync::models::enums::CalendarKind;
    use calsync::repositories::{CalendarRepository, NewCalendar};
    let calendars = CalendarRepository::new(&h.db, h.ctx);
    let ms_calendar = calendars
        .create(NewCalendar {
            name: "MS".to_string(),
            description: None,
            email: None,
            external_id: "ms-watched".to_string(),
            provider: CalendarProvider::Microsoft,
            calendar_kind: CalendarKind::Personal,
            manages_available_windows: false,
            capacity: None,
            original_payload: None,
        })
        .await?;

    let webhooks = WebhookRepository::new(&h.db, h.ctx);
    webhooks
        .upsert_subscription(
            ms_calendar.id,
            CalendarProvider::Microsoft,
            &SubscriptionHandle {
                external_subscription_id: "sub-42".to_string(),
                external_resource_id: "ms-watched".to_string(),
                channel_id: "chan".to_string(),
                verification_token: "token".to_string(),
                callback_url: "https://example.com/webhooks".to_string(),
                expires_at: test_utils::base_time().naive_utc() + Duration::days(3),
            },
        )
        .await?;

    let notification = serde_json::json!({
        "value": [{
            "subscriptionId": "sub-42",
            "changeType": "updated",
            "resource": "me/calendars/ms-watched/events/evt-1",
        }]
    })
    .to_string();
    let outcome = h
        .pipeline
        .handle(
            CalendarProvider::Microsoft,
            h.tenant_id,
            HashMap::new(),
            HashMap::new(),
            &notification,
        )
        .await?;
    assert_eq!(outcome, WebhookOutcome::Accepted);
    assert!(matches!(h.receiver.try_recv()?, Job::SyncCalendar { .. }));
    Ok(())
}
