//! Webhook ingestion pipeline.
//!
//! Per inbound notification: resolve the tenant strictly from the URL path,
//! run the provider validator, append a WebhookEvent with the raw payload,
//! then either coalesce onto a recent CalendarSync or enqueue a fresh one.
//! Processing failures after the event is recorded still acknowledge with
//! 200 so providers do not retry-storm; the failure lives on the event row.

pub mod parsers;
pub mod validators;

use std::collections::HashMap;
use std::sync::Arc;

use sea_orm::DatabaseConnection;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::WebhookConfig;
use crate::error::{CalendarError, CalendarResult};
use crate::jobs::{Job, JobQueue};
use crate::models::enums::{CalendarProvider, WebhookProcessingStatus};
use crate::repositories::{
    CalendarRepository, CalendarSyncRepository, TenantContext, TenantRepository, WebhookRepository,
};

/// What the HTTP layer should answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// 200 with an empty body.
    Accepted,
    /// 200 with the (escaped) validation token as the body.
    Challenge(String),
}

/// Google's subscription-confirmation resource state; carries no change.
const GOOGLE_SYNC_STATE: &str = "sync";

pub struct WebhookPipeline {
    db: DatabaseConnection,
    clock: Arc<dyn Clock>,
    queue: JobQueue,
    config: WebhookConfig,
}

impl WebhookPipeline {
    pub fn new(
        db: DatabaseConnection,
        clock: Arc<dyn Clock>,
        queue: JobQueue,
        config: WebhookConfig,
    ) -> Self {
        Self {
            db,
            clock,
            queue,
            config,
        }
    }

    /// Handles one inbound notification.
    ///
    /// Errors map to HTTP statuses upstream: `NotFound("tenant")` → 404,
    /// `WebhookValidationFailed` → 400, database errors before the event is
    /// recorded → 500. Everything after recording resolves to `Accepted`.
    #[instrument(skip(self, headers, query, body), fields(provider = provider.as_str(), tenant_id = %tenant_id))]
    pub async fn handle(
        &self,
        provider: CalendarProvider,
        tenant_id: Uuid,
        headers: HashMap<String, String>,
        query: HashMap<String, String>,
        body: &str,
    ) -> CalendarResult<WebhookOutcome> {
        // Tenant comes from the URL path alone; an unknown tenant is refused
        // outright rather than guessed at.
        let tenants = TenantRepository::new(&self.db);
        if tenants.get(tenant_id).await?.is_none() {
            warn!("webhook for unknown tenant");
            return Err(CalendarError::NotFound("tenant"));
        }
        let ctx = TenantContext::new(tenant_id);

        let payload: JsonValue = serde_json::from_str(body)
            .unwrap_or_else(|_| json!({ "raw": body }));

        // Microsoft subscription handshake: echo the token and stop. The
        // token must be a canonical UUID before it is reflected anywhere.
        if provider == CalendarProvider::Microsoft {
            if let Some(token) = query
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case("validationtoken"))
                .map(|(_, value)| value.clone())
            {
                if !validators::is_valid_validation_token(&token) {
                    return Err(CalendarError::WebhookValidationFailed(
                        "invalid validation token format".to_string(),
                    ));
                }
                info!("answering Microsoft subscription handshake");
                return Ok(WebhookOutcome::Challenge(html_escape(&token)));
            }
        }

        self.validate(ctx, provider, &headers, &payload).await?;

        let webhooks = WebhookRepository::new(&self.db, ctx);
        let event = webhooks
            .record_event(provider, payload.clone(), headers_to_json(&headers))
            .await?;
        let metric_labels = vec![("provider", provider.as_str().to_string())];
        metrics::counter!("webhook_events_recorded_total", &metric_labels).increment(1);

        // From here on the provider always gets a 200; failures are recorded
        // on the event row and retried through the sync machinery.
        match self.process(ctx, provider, &headers, &payload).await {
            Ok(ProcessOutcome::Ignored) => {
                webhooks
                    .finish_event(
                        event,
                        WebhookProcessingStatus::Ignored,
                        None,
                        None,
                        self.clock.now(),
                    )
                    .await?;
                Ok(WebhookOutcome::Accepted)
            }
            Ok(ProcessOutcome::Processed {
                event_type,
                external_calendar_id,
                calendar_sync_id,
            }) => {
                let event = webhooks
                    .set_event_parse_result(event, &event_type, &external_calendar_id)
                    .await?;
                webhooks
                    .finish_event(
                        event,
                        WebhookProcessingStatus::Processed,
                        None,
                        Some(calendar_sync_id),
                        self.clock.now(),
                    )
                    .await?;
                Ok(WebhookOutcome::Accepted)
            }
            Err(err) => {
                warn!(error = %err, "webhook processing failed");
                webhooks
                    .finish_event(
                        event,
                        WebhookProcessingStatus::Failed,
                        Some(err.to_string()),
                        None,
                        self.clock.now(),
                    )
                    .await?;
                Ok(WebhookOutcome::Accepted)
            }
        }
    }

    async fn validate(
        &self,
        ctx: TenantContext,
        provider: CalendarProvider,
        headers: &HashMap<String, String>,
        payload: &JsonValue,
    ) -> CalendarResult<()> {
        match provider {
            CalendarProvider::Google => validators::validate_google_headers(headers),
            CalendarProvider::Microsoft => {
                let webhooks = WebhookRepository::new(&self.db, ctx);
                let Some(subscription_id) = parsers::microsoft_subscription_id(payload) else {
                    return Err(CalendarError::WebhookValidationFailed(
                        "notification missing subscriptionId".to_string(),
                    ));
                };
                let known = webhooks
                    .get_active_by_external_id(provider, &subscription_id)
                    .await?;
                if known.is_none() {
                    return Err(CalendarError::WebhookValidationFailed(format!(
                        "unknown subscription: {subscription_id}"
                    )));
                }
                Ok(())
            }
            other => Err(CalendarError::WebhookValidationFailed(format!(
                "unsupported webhook provider: {}",
                other.as_str()
            ))),
        }
    }

    async fn process(
        &self,
        ctx: TenantContext,
        provider: CalendarProvider,
        headers: &HashMap<String, String>,
        payload: &JsonValue,
    ) -> CalendarResult<ProcessOutcome> {
        let (event_type, external_calendar_id) = match provider {
            CalendarProvider::Google => parsers::parse_google(headers),
            CalendarProvider::Microsoft => parsers::parse_microsoft(payload),
            _ => ("unknown".to_string(), "unknown".to_string()),
        };

        // Google fires a bare "sync" notification when a channel is armed.
        if provider == CalendarProvider::Google && event_type == GOOGLE_SYNC_STATE {
            debug!("ignoring Google channel sync notification");
            return Ok(ProcessOutcome::Ignored);
        }

        let calendars = CalendarRepository::new(&self.db, ctx);
        let calendar = calendars
            .get_by_external_id(provider, &external_calendar_id)
            .await?
            .ok_or(CalendarError::NotFound("calendar"))?;

        let webhooks = WebhookRepository::new(&self.db, ctx);
        if let Some(subscription) = webhooks
            .get_active_for_calendar(calendar.id, provider)
            .await?
        {
            webhooks
                .touch_last_notification(subscription, self.clock.now())
                .await?;
        }

        let now = self.clock.now();
        let syncs = CalendarSyncRepository::new(&self.db, ctx);

        // Duplicate deliveries inside the window collapse onto one sync.
        let coalesce_floor =
            now - chrono::Duration::seconds(self.config.coalesce_window_secs);
        if let Some(recent) = syncs.recent_active(calendar.id, coalesce_floor).await? {
            debug!(sync_id = %recent.id, "coalesced webhook onto recent sync");
            metrics::counter!("webhook_coalesced_total").increment(1);
            return Ok(ProcessOutcome::Processed {
                event_type,
                external_calendar_id,
                calendar_sync_id: recent.id,
            });
        }

        let window_start = (now - chrono::Duration::days(self.config.sync_window_past_days))
            .naive_utc();
        let window_end = (now + chrono::Duration::days(self.config.sync_window_future_days))
            .naive_utc();
        let sync = syncs
            .create(calendar.id, window_start, window_end, true, now)
            .await?;
        self.queue.enqueue(Job::SyncCalendar {
            tenant_id: ctx.tenant_id(),
            sync_id: sync.id,
        })?;
        info!(sync_id = %sync.id, "enqueued webhook-triggered sync");

        Ok(ProcessOutcome::Processed {
            event_type,
            external_calendar_id,
            calendar_sync_id: sync.id,
        })
    }
}

enum ProcessOutcome {
    Ignored,
    Processed {
        event_type: String,
        external_calendar_id: String,
        calendar_sync_id: Uuid,
    },
}

fn headers_to_json(headers: &HashMap<String, String>) -> JsonValue {
    JsonValue::Object(
        headers
            .iter()
            .map(|(key, value)| (key.clone(), JsonValue::String(value.clone())))
            .collect(),
    )
}

/// Minimal HTML escaping for reflected tokens.
fn html_escape(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for character in input.chars() {
        match character {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_escape_neutralizes_markup() {
        assert_eq!(
            html_escape("<script>alert(1)</script>"),
            "&lt;script&gt;alert(1)&lt;/script&gt;"
        );
        assert_eq!(
            html_escape("f6c2e504-4a92-4a5c-9b35-d9c1c2a6ab10"),
            "f6c2e504-4a92-4a5c-9b35-d9c1c2a6ab10"
        );
    }
}
