//! Webhook subscription and event repositories.

use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::adapters::SubscriptionHandle;
use crate::error::CalendarResult;
use crate::models::enums::{CalendarProvider, WebhookProcessingStatus};
use crate::models::webhook_event::{
    ActiveModel as WebhookEventActiveModel, Model as WebhookEventModel,
};
use crate::models::webhook_subscription::{
    ActiveModel as SubscriptionActiveModel, Column as SubscriptionColumn,
    Entity as WebhookSubscription, Model as SubscriptionModel,
};

use super::tenant::TenantContext;

pub struct WebhookRepository<'a, C: ConnectionTrait> {
    db: &'a C,
    ctx: TenantContext,
}

impl<'a, C: ConnectionTrait> WebhookRepository<'a, C> {
    pub fn new(db: &'a C, ctx: TenantContext) -> Self {
        Self { db, ctx }
    }

    /// Stores a provider subscription handle, replacing any previous channel
    /// for the same (calendar, provider).
    pub async fn upsert_subscription(
        &self,
        calendar_id: Uuid,
        provider: CalendarProvider,
        handle: &SubscriptionHandle,
    ) -> CalendarResult<SubscriptionModel> {
        let now = Utc::now();
        let expires_at =
            DateTime::<Utc>::from_naive_utc_and_offset(handle.expires_at, Utc);

        if let Some(existing) = self.get_subscription(calendar_id, provider).await? {
            let mut active = existing.into_active_model();
            active.external_subscription_id = Set(handle.external_subscription_id.clone());
            active.external_resource_id = Set(handle.external_resource_id.clone());
            active.callback_url = Set(handle.callback_url.clone());
            active.channel_id = Set(handle.channel_id.clone());
            active.verification_token = Set(handle.verification_token.clone());
            active.expires_at = Set(expires_at.into());
            active.is_active = Set(true);
            active.updated_at = Set(now.into());
            return Ok(active.update(self.db).await?);
        }

        let subscription = SubscriptionActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(self.ctx.tenant_id()),
            calendar_id: Set(calendar_id),
            provider: Set(provider),
            external_subscription_id: Set(handle.external_subscription_id.clone()),
            external_resource_id: Set(handle.external_resource_id.clone()),
            callback_url: Set(handle.callback_url.clone()),
            channel_id: Set(handle.channel_id.clone()),
            verification_token: Set(handle.verification_token.clone()),
            expires_at: Set(expires_at.into()),
            is_active: Set(true),
            last_notification_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        Ok(subscription.insert(self.db).await?)
    }

    pub async fn get_subscription(
        &self,
        calendar_id: Uuid,
        provider: CalendarProvider,
    ) -> CalendarResult<Option<SubscriptionModel>> {
        Ok(WebhookSubscription::find()
            .filter(SubscriptionColumn::TenantId.eq(self.ctx.tenant_id()))
            .filter(SubscriptionColumn::CalendarId.eq(calendar_id))
            .filter(SubscriptionColumn::Provider.eq(provider))
            .one(self.db)
            .await?)
    }

    /// Active subscription by the provider-assigned id (Microsoft lookup).
    pub async fn get_active_by_external_id(
        &self,
        provider: CalendarProvider,
        external_subscription_id: &str,
    ) -> CalendarResult<Option<SubscriptionModel>> {
        Ok(WebhookSubscription::find()
            .filter(SubscriptionColumn::TenantId.eq(self.ctx.tenant_id()))
            .filter(SubscriptionColumn::Provider.eq(provider))
            .filter(SubscriptionColumn::ExternalSubscriptionId.eq(external_subscription_id))
            .filter(SubscriptionColumn::IsActive.eq(true))
            .one(self.db)
            .await?)
    }

    /// Active subscription for a provider calendar id (Google channel → the
    /// calendar it watches).
    pub async fn get_active_for_calendar(
        &self,
        calendar_id: Uuid,
        provider: CalendarProvider,
    ) -> CalendarResult<Option<SubscriptionModel>> {
        Ok(self
            .get_subscription(calendar_id, provider)
            .await?
            .filter(|subscription| subscription.is_active))
    }

    /// Active subscriptions whose channel expires within the horizon,
    /// soonest first; the renewal job re-arms them.
    pub async fn find_expiring(
        &self,
        within: Duration,
    ) -> CalendarResult<Vec<SubscriptionModel>> {
        let deadline = Utc::now() + within;
        Ok(WebhookSubscription::find()
            .filter(SubscriptionColumn::TenantId.eq(self.ctx.tenant_id()))
            .filter(SubscriptionColumn::IsActive.eq(true))
            .filter(SubscriptionColumn::ExpiresAt.lte(deadline))
            .order_by_asc(SubscriptionColumn::ExpiresAt)
            .all(self.db)
            .await?)
    }

    /// Active subscriptions that have been silent for longer than
    /// `older_than` (never-notified channels fall back to their creation
    /// time). Surfaced to operators by the health report.
    pub async fn find_stale(
        &self,
        older_than: Duration,
    ) -> CalendarResult<Vec<SubscriptionModel>> {
        let floor = Utc::now() - older_than;
        Ok(WebhookSubscription::find()
            .filter(SubscriptionColumn::TenantId.eq(self.ctx.tenant_id()))
            .filter(SubscriptionColumn::IsActive.eq(true))
            .filter(
                Condition::any()
                    .add(SubscriptionColumn::LastNotificationAt.lt(floor))
                    .add(
                        Condition::all()
                            .add(SubscriptionColumn::LastNotificationAt.is_null())
                            .add(SubscriptionColumn::CreatedAt.lt(floor)),
                    ),
            )
            .order_by_asc(SubscriptionColumn::LastNotificationAt)
            .all(self.db)
            .await?)
    }

    pub async fn deactivate(
        &self,
        subscription: SubscriptionModel,
    ) -> CalendarResult<SubscriptionModel> {
        self.ctx
            .ensure_owns(subscription.tenant_id, "webhook subscription")?;
        let mut active = subscription.into_active_model();
        active.is_active = Set(false);
        active.updated_at = Set(Utc::now().into());
        Ok(active.update(self.db).await?)
    }

    pub async fn touch_last_notification(
        &self,
        subscription: SubscriptionModel,
        at: DateTime<Utc>,
    ) -> CalendarResult<SubscriptionModel> {
        self.ctx
            .ensure_owns(subscription.tenant_id, "webhook subscription")?;
        let mut active = subscription.into_active_model();
        active.last_notification_at = Set(Some(at.into()));
        active.updated_at = Set(at.into());
        Ok(active.update(self.db).await?)
    }

    /// Appends a pending WebhookEvent carrying the raw notification.
    pub async fn record_event(
        &self,
        provider: CalendarProvider,
        raw_payload: JsonValue,
        headers: JsonValue,
    ) -> CalendarResult<WebhookEventModel> {
        let event = WebhookEventActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(self.ctx.tenant_id()),
            provider: Set(provider),
            event_type: Set("unknown".to_string()),
            external_calendar_id: Set("unknown".to_string()),
            raw_payload: Set(raw_payload),
            headers: Set(headers),
            processing_status: Set(WebhookProcessingStatus::Pending),
            error_message: Set(None),
            processed_at: Set(None),
            calendar_sync_id: Set(None),
            created_at: Set(Utc::now().into()),
        };
        Ok(event.insert(self.db).await?)
    }

    pub async fn set_event_parse_result(
        &self,
        event: WebhookEventModel,
        event_type: &str,
        external_calendar_id: &str,
    ) -> CalendarResult<WebhookEventModel> {
        self.ctx.ensure_owns(event.tenant_id, "webhook event")?;
        let mut active = event.into_active_model();
        active.event_type = Set(event_type.to_string());
        active.external_calendar_id = Set(external_calendar_id.to_string());
        Ok(active.update(self.db).await?)
    }

    pub async fn finish_event(
        &self,
        event: WebhookEventModel,
        status: WebhookProcessingStatus,
        error_message: Option<String>,
        calendar_sync_id: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> CalendarResult<WebhookEventModel> {
        self.ctx.ensure_owns(event.tenant_id, "webhook event")?;
        let mut active = event.into_active_model();
        active.processing_status = Set(status);
        active.error_message = Set(error_message);
        active.processed_at = Set(Some(at.into()));
        if calendar_sync_id.is_some() {
            active.calendar_sync_id = Set(calendar_sync_id);
        }
        Ok(active.update(self.db).await?)
    }

}
