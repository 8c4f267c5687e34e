//! Calendar service facade.
//!
//! The entry point for user-originated operations: calendar creation
//! (application, virtual, bundle), event CRUD pushed through the provider,
//! recurring authoring (exceptions and bulk-modification continuations),
//! account/resource imports, manual availability and blocked windows,
//! webhook subscription lifecycle, and sync scheduling. Collaborators are
//! constructor-injected; tests supply the internal adapter and a fixed clock.

use std::sync::Arc;

use chrono::NaiveDateTime;
use chrono_tz::Tz;
use sea_orm::{DatabaseConnection, EntityTrait, IntoActiveModel, Set};
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{
    AdapterRegistry, AttendeeRecord, EventInput, ProviderAdapter, SubscriptionHandle,
    SubscriptionRequest,
};
use crate::availability::AvailabilityEngine;
use crate::clock::Clock;
use crate::error::{CalendarError, CalendarResult};
use crate::jobs::{Job, JobQueue};
use crate::models::calendar::Model as CalendarModel;
use crate::models::calendar_event::Model as EventModel;
use crate::models::calendar_sync::Model as SyncModel;
use crate::models::enums::{CalendarKind, CalendarProvider, EventStatus, RsvpStatus};
use crate::models::webhook_subscription::Model as SubscriptionModel;
use crate::recurrence::{RecurrenceError, RuleSpec};
use crate::repositories::{
    AttendanceRepository, AvailableTimeRepository, BlockedTimeRepository, CalendarRepository,
    CalendarSyncRepository, EventRepository, NewBlockedTime, NewCalendar, NewEvent,
    ORIGINAL_PAYLOAD_META_KEY, RecurrenceRuleRepository, TenantContext, WebhookRepository,
};

/// Input for creating an event through the service.
#[derive(Debug, Clone, Default)]
pub struct CreateEventInput {
    pub title: String,
    pub description: String,
    /// UTC naive interval plus the IANA zone it was authored in.
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
    pub timezone: String,
    /// Internal user ids attending.
    pub attendances: Vec<Uuid>,
    /// External attendees as (email, display name).
    pub external_attendees: Vec<(String, String)>,
    /// Resource calendar ids to allocate.
    pub resource_allocations: Vec<Uuid>,
    pub recurrence_rule: Option<RuleSpec>,
    /// Master event when creating an exception/instance.
    pub parent_event_id: Option<Uuid>,
    pub is_recurring_exception: bool,
}

/// Field updates for an existing event.
#[derive(Debug, Clone, Default)]
pub struct UpdateEventInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_at: Option<NaiveDateTime>,
    pub end_at: Option<NaiveDateTime>,
}

pub struct CalendarService {
    db: DatabaseConnection,
    clock: Arc<dyn Clock>,
    queue: JobQueue,
    adapters: Arc<AdapterRegistry>,
    availability: AvailabilityEngine,
    webhook_callback_base: String,
}

impl CalendarService {
    pub fn new(
        db: DatabaseConnection,
        clock: Arc<dyn Clock>,
        queue: JobQueue,
        adapters: Arc<AdapterRegistry>,
    ) -> Self {
        let availability = AvailabilityEngine::new(db.clone());
        Self {
            db,
            clock,
            queue,
            adapters,
            availability,
            webhook_callback_base: "https://localhost:8080/webhooks".to_string(),
        }
    }

    /// Overrides the public base URL provider callbacks are registered under.
    pub fn with_webhook_callback_base(mut self, base: &str) -> Self {
        self.webhook_callback_base = base.trim_end_matches('/').to_string();
        self
    }

    pub fn availability(&self) -> &AvailabilityEngine {
        &self.availability
    }

    fn adapter(&self, provider: CalendarProvider) -> CalendarResult<Arc<ProviderAdapter>> {
        self.adapters
            .adapter_for(provider)
            .ok_or(CalendarError::NotFound("provider adapter"))
    }

    fn validate_timezone(timezone: &str) -> CalendarResult<()> {
        timezone
            .parse::<Tz>()
            .map(|_| ())
            .map_err(|_| RecurrenceError::InvalidTimezone(timezone.to_string()).into())
    }

    /// Creates a provider-backed calendar and mirrors it locally.
    pub async fn create_application_calendar(
        &self,
        ctx: TenantContext,
        provider: CalendarProvider,
        name: &str,
    ) -> CalendarResult<CalendarModel> {
        let adapter = self.adapter(provider)?;
        let descriptor = adapter.create_calendar(name).await?;
        let calendars = CalendarRepository::new(&self.db, ctx);
        calendars
            .upsert_from_descriptor(&descriptor, CalendarKind::Personal, false)
            .await
    }

    /// Creates an internal virtual calendar (no provider linkage).
    pub async fn create_virtual_calendar(
        &self,
        ctx: TenantContext,
        name: &str,
        description: Option<&str>,
        manages_available_windows: bool,
    ) -> CalendarResult<CalendarModel> {
        let calendars = CalendarRepository::new(&self.db, ctx);
        calendars
            .create(NewCalendar {
                name: name.to_string(),
                description: description.map(String::from),
                email: None,
                external_id: String::new(),
                provider: CalendarProvider::Internal,
                calendar_kind: CalendarKind::Virtual,
                manages_available_windows,
                capacity: None,
                original_payload: None,
            })
            .await
    }

    /// Creates a bundle calendar over existing children; the optional primary
    /// must be one of them.
    pub async fn create_bundle_calendar(
        &self,
        ctx: TenantContext,
        name: &str,
        description: Option<&str>,
        child_ids: &[Uuid],
        primary_child_id: Option<Uuid>,
    ) -> CalendarResult<CalendarModel> {
        if let Some(primary) = primary_child_id {
            if !child_ids.contains(&primary) {
                return Err(CalendarError::InvalidPrimaryCalendar);
            }
        }

        let calendars = CalendarRepository::new(&self.db, ctx);
        let bundle = calendars
            .create(NewCalendar {
                name: name.to_string(),
                description: description.map(String::from),
                email: None,
                external_id: String::new(),
                provider: CalendarProvider::Internal,
                calendar_kind: CalendarKind::Bundle,
                manages_available_windows: false,
                capacity: None,
                original_payload: None,
            })
            .await?;

        for child_id in child_ids {
            // add_child re-checks that the child lives in this tenant.
            calendars.add_child(bundle.id, *child_id).await?;
        }
        if let Some(primary) = primary_child_id {
            calendars.set_primary_child(bundle.id, primary).await?;
        }

        calendars.require(bundle.id).await
    }

    /// Walks the provider's calendar list and mirrors each as a local row.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id(), provider = provider.as_str()))]
    pub async fn import_account_calendars(
        &self,
        ctx: TenantContext,
        provider: CalendarProvider,
    ) -> CalendarResult<usize> {
        let adapter = self.adapter(provider)?;
        let calendars = CalendarRepository::new(&self.db, ctx);

        let descriptors = adapter.list_account_calendars().await?;
        let count = descriptors.len();
        for descriptor in descriptors {
            calendars
                .upsert_from_descriptor(&descriptor, CalendarKind::Personal, false)
                .await?;
        }
        info!(count, "imported account calendars");
        Ok(count)
    }

    /// Walks the provider's resource directory and mirrors each resource as a
    /// resource calendar.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id(), provider = provider.as_str()))]
    pub async fn import_organization_resources(
        &self,
        ctx: TenantContext,
        provider: CalendarProvider,
    ) -> CalendarResult<usize> {
        let adapter = self.adapter(provider)?;
        let calendars = CalendarRepository::new(&self.db, ctx);

        let resources = adapter.list_resources().await?;
        let count = resources.len();
        for resource in resources {
            calendars.upsert_resource(provider, &resource).await?;
        }
        info!(count, "imported organization resources");
        Ok(count)
    }

    /// Queues a background import of the account's provider calendars.
    pub fn request_account_calendars_import(
        &self,
        ctx: TenantContext,
        provider: CalendarProvider,
    ) -> CalendarResult<()> {
        self.queue.enqueue(Job::ImportAccountCalendars {
            tenant_id: ctx.tenant_id(),
            provider,
        })
    }

    /// Queues a background import of the organization's provider resources.
    pub fn request_organization_resources_import(
        &self,
        ctx: TenantContext,
        provider: CalendarProvider,
    ) -> CalendarResult<()> {
        self.queue.enqueue(Job::ImportOrgResources {
            tenant_id: ctx.tenant_id(),
            provider,
        })
    }

    /// Schedules a sync of the calendar over the window and enqueues it.
    pub async fn request_calendar_sync(
        &self,
        ctx: TenantContext,
        calendar_id: Uuid,
        start_at: NaiveDateTime,
        end_at: NaiveDateTime,
        should_update_events: bool,
    ) -> CalendarResult<SyncModel> {
        let calendars = CalendarRepository::new(&self.db, ctx);
        let calendar = calendars.require(calendar_id).await?;

        let syncs = CalendarSyncRepository::new(&self.db, ctx);
        let sync = syncs
            .create(
                calendar.id,
                start_at,
                end_at,
                should_update_events,
                self.clock.now(),
            )
            .await?;
        self.queue.enqueue(Job::SyncCalendar {
            tenant_id: ctx.tenant_id(),
            sync_id: sync.id,
        })?;
        Ok(sync)
    }

    /// Creates an event, enforcing availability. Booking a bundle places the
    /// event on the primary child when free, else the first free child.
    pub async fn create_event(
        &self,
        ctx: TenantContext,
        calendar_id: Uuid,
        input: CreateEventInput,
    ) -> CalendarResult<EventModel> {
        Self::validate_timezone(&input.timezone)?;
        if input.end_at < input.start_at {
            return Err(CalendarError::Malformed(
                "event end precedes its start".to_string(),
            ));
        }

        let calendars = CalendarRepository::new(&self.db, ctx);
        let calendar = calendars.require(calendar_id).await?;

        let target = if calendar.is_bundle() {
            self.availability
                .pick_bundle_child(ctx, &calendar, input.start_at, input.end_at)
                .await?
        } else {
            self.availability
                .ensure_bookable(ctx, &calendar, input.start_at, input.end_at)
                .await?;
            calendar.clone()
        };

        // Provider first, so the local mirror records the assigned id.
        let mut external_id = String::new();
        let mut original_payload = None;
        if target.is_external() {
            let adapter = self.adapter(target.provider)?;
            let created = adapter
                .create_event(
                    &target.external_id,
                    &EventInput {
                        title: input.title.clone(),
                        description: input.description.clone(),
                        start: input.start_at,
                        end: input.end_at,
                        timezone: input.timezone.clone(),
                        attendees: self
                            .attendees_for_push(ctx, &input)
                            .await?,
                        recurrence_rule: input.recurrence_rule.clone(),
                        is_recurring_instance: input.is_recurring_exception,
                    },
                )
                .await?;
            external_id = created.external_id;
            original_payload = created.original_payload;
        }

        let events = EventRepository::new(&self.db, ctx);
        let rules = RecurrenceRuleRepository::new(&self.db, ctx);
        let attendance = AttendanceRepository::new(&self.db, ctx);

        let parent = match input.parent_event_id {
            Some(parent_id) => {
                let parent = events.require(parent_id).await?;
                if parent.recurrence_rule_id.is_none() {
                    return Err(CalendarError::Malformed(
                        "cannot create exception for non-recurring event".to_string(),
                    ));
                }
                Some(parent)
            }
            None => None,
        };

        let recurrence_rule_id = match (&input.recurrence_rule, &parent) {
            (Some(rule), None) => Some(rules.create(rule).await?.id),
            _ => None,
        };

        let event = events
            .insert(NewEvent {
                calendar_id: target.id,
                title: input.title.clone(),
                description: input.description.clone(),
                start_at: input.start_at,
                end_at: input.end_at,
                timezone: input.timezone.clone(),
                external_id,
                status: EventStatus::Confirmed,
                recurrence_rule_id,
                parent_event_id: parent.as_ref().map(|p| p.id),
                recurrence_id: parent.as_ref().map(|_| input.start_at),
                is_recurring_exception: input.is_recurring_exception,
                bulk_modification_parent_id: None,
                meta: original_payload
                    .map(|payload| json!({ ORIGINAL_PAYLOAD_META_KEY: payload })),
            })
            .await?;

        for user_id in &input.attendances {
            attendance
                .add_attendance(event.id, *user_id, RsvpStatus::Pending)
                .await?;
        }
        for (email, name) in &input.external_attendees {
            let attendee = attendance
                .get_or_create_external_attendee(email, name)
                .await?;
            attendance
                .add_external_attendance(event.id, attendee.id, RsvpStatus::Pending)
                .await?;
        }
        for resource_id in &input.resource_allocations {
            // The resource must be a calendar inside this tenant.
            calendars.require(*resource_id).await?;
            attendance
                .add_resource_allocation(event.id, *resource_id, RsvpStatus::Accepted)
                .await?;
        }

        Ok(event)
    }

    /// Convenience wrapper: a recurring event is an event with a rule.
    pub async fn create_recurring_event(
        &self,
        ctx: TenantContext,
        calendar_id: Uuid,
        mut input: CreateEventInput,
        rule: RuleSpec,
    ) -> CalendarResult<EventModel> {
        input.recurrence_rule = Some(rule);
        input.parent_event_id = None;
        input.is_recurring_exception = false;
        self.create_event(ctx, calendar_id, input).await
    }

    /// Cancels or modifies one occurrence of a recurring event.
    pub async fn create_recurring_exception(
        &self,
        ctx: TenantContext,
        parent_event_id: Uuid,
        occurrence_start: NaiveDateTime,
        modification: Option<UpdateEventInput>,
    ) -> CalendarResult<EventModel> {
        let events = EventRepository::new(&self.db, ctx);
        let parent = events.require(parent_event_id).await?;
        if parent.recurrence_rule_id.is_none() {
            return Err(CalendarError::Malformed(
                "cannot create exception for non-recurring event".to_string(),
            ));
        }

        let duration = parent.end_at - parent.start_at;
        let (status, title, description, start_at, end_at) = match &modification {
            None => (
                EventStatus::Cancelled,
                parent.title.clone(),
                parent.description.clone(),
                occurrence_start,
                occurrence_start + duration,
            ),
            Some(update) => (
                EventStatus::Confirmed,
                update.title.clone().unwrap_or_else(|| parent.title.clone()),
                update
                    .description
                    .clone()
                    .unwrap_or_else(|| parent.description.clone()),
                update.start_at.unwrap_or(occurrence_start),
                update.end_at.unwrap_or(occurrence_start + duration),
            ),
        };

        events
            .insert(NewEvent {
                calendar_id: parent.calendar_id,
                title,
                description,
                start_at,
                end_at,
                timezone: parent.timezone.clone(),
                external_id: String::new(),
                status,
                recurrence_rule_id: None,
                parent_event_id: Some(parent.id),
                recurrence_id: Some(occurrence_start),
                is_recurring_exception: true,
                bulk_modification_parent_id: None,
                meta: None,
            })
            .await
    }

    /// Forks a recurring series: occurrences of `parent` from `split_start`
    /// onward are superseded by the continuation. A missing rule bulk-cancels
    /// the tail.
    pub async fn create_bulk_modification_continuation(
        &self,
        ctx: TenantContext,
        parent_event_id: Uuid,
        split_start: NaiveDateTime,
        rule: Option<RuleSpec>,
        update: Option<UpdateEventInput>,
    ) -> CalendarResult<EventModel> {
        let events = EventRepository::new(&self.db, ctx);
        let rules = RecurrenceRuleRepository::new(&self.db, ctx);

        let parent = events.require(parent_event_id).await?;
        if parent.recurrence_rule_id.is_none() {
            return Err(CalendarError::Malformed(
                "cannot fork a non-recurring event".to_string(),
            ));
        }
        if events.continuation_of(parent.id).await?.is_some() {
            return Err(CalendarError::Malformed(
                "event already has a continuation".to_string(),
            ));
        }

        let duration = parent.end_at - parent.start_at;
        let update = update.unwrap_or_default();
        let recurrence_rule_id = match &rule {
            Some(rule) => Some(rules.create(rule).await?.id),
            None => None,
        };

        events
            .insert(NewEvent {
                calendar_id: parent.calendar_id,
                title: update.title.unwrap_or_else(|| parent.title.clone()),
                description: update
                    .description
                    .unwrap_or_else(|| parent.description.clone()),
                start_at: update.start_at.unwrap_or(split_start),
                end_at: update.end_at.unwrap_or(split_start + duration),
                timezone: parent.timezone.clone(),
                external_id: String::new(),
                status: EventStatus::Confirmed,
                recurrence_rule_id,
                parent_event_id: None,
                recurrence_id: None,
                is_recurring_exception: false,
                bulk_modification_parent_id: Some(parent.id),
                meta: None,
            })
            .await
    }

    /// Updates an event locally and, for provider-backed events we authored,
    /// pushes the change upstream first.
    pub async fn update_event(
        &self,
        ctx: TenantContext,
        event_id: Uuid,
        update: UpdateEventInput,
    ) -> CalendarResult<EventModel> {
        let events = EventRepository::new(&self.db, ctx);
        let calendars = CalendarRepository::new(&self.db, ctx);

        let event = events.require(event_id).await?;
        let calendar = calendars.require(event.calendar_id).await?;

        let title = update.title.clone().unwrap_or_else(|| event.title.clone());
        let description = update
            .description
            .clone()
            .unwrap_or_else(|| event.description.clone());
        let start_at = update.start_at.unwrap_or(event.start_at);
        let end_at = update.end_at.unwrap_or(event.end_at);

        if calendar.is_external() && !event.external_id.is_empty() {
            let adapter = self.adapter(calendar.provider)?;
            adapter
                .update_event(
                    &calendar.external_id,
                    &event.external_id,
                    &EventInput {
                        title: title.clone(),
                        description: description.clone(),
                        start: start_at,
                        end: end_at,
                        timezone: event.timezone.clone(),
                        attendees: Vec::new(),
                        recurrence_rule: None,
                        is_recurring_instance: event.is_recurring_exception,
                    },
                )
                .await?;
        }

        let mut active = event.into_active_model();
        active.title = Set(title);
        active.description = Set(description);
        active.start_at = Set(start_at);
        active.end_at = Set(end_at);
        active.updated_at = Set(self.clock.now().into());
        events.update(active).await
    }

    /// Deletes an event; `delete_series` also removes its instances and
    /// exceptions.
    pub async fn delete_event(
        &self,
        ctx: TenantContext,
        event_id: Uuid,
        delete_series: bool,
    ) -> CalendarResult<()> {
        let events = EventRepository::new(&self.db, ctx);
        let calendars = CalendarRepository::new(&self.db, ctx);

        let event = events.require(event_id).await?;
        let calendar = calendars.require(event.calendar_id).await?;

        if calendar.is_external() && !event.external_id.is_empty() {
            let adapter = self.adapter(calendar.provider)?;
            adapter
                .delete_event(&calendar.external_id, &event.external_id)
                .await?;
        }

        if delete_series {
            for instance in events.exceptions_of(event.id).await? {
                events.delete(instance).await?;
            }
        }
        events.delete(event).await?;
        Ok(())
    }

    /// Moves an event to another calendar: fetch the provider's current
    /// state, create on the target, then delete the source. Not atomic across
    /// providers; a failed delete leaves a duplicate for the caller to
    /// reconcile.
    pub async fn transfer_event(
        &self,
        ctx: TenantContext,
        event_id: Uuid,
        new_calendar_id: Uuid,
    ) -> CalendarResult<EventModel> {
        let events = EventRepository::new(&self.db, ctx);
        let calendars = CalendarRepository::new(&self.db, ctx);

        let event = events.require(event_id).await?;
        let source_calendar = calendars.require(event.calendar_id).await?;
        calendars.require(new_calendar_id).await?;

        let mut input = CreateEventInput {
            title: event.title.clone(),
            description: event.description.clone(),
            start_at: event.start_at,
            end_at: event.end_at,
            timezone: event.timezone.clone(),
            ..Default::default()
        };

        if source_calendar.is_external() && !event.external_id.is_empty() {
            let adapter = self.adapter(source_calendar.provider)?;
            let current = adapter
                .get_event(&source_calendar.external_id, &event.external_id)
                .await?;
            input.title = current.title;
            input.description = current.description;
            input.start_at = current.start;
            input.end_at = current.end;
            if let Some(timezone) = current.timezone {
                input.timezone = timezone;
            }
        }

        let created = self.create_event(ctx, new_calendar_id, input).await?;

        if let Err(err) = self.delete_event(ctx, event_id, false).await {
            warn!(
                error = %err,
                "transfer source delete failed; duplicate remains"
            );
            return Err(err);
        }
        Ok(created)
    }

    /// Creates explicit availability windows; only calendars that manage
    /// their windows accept them.
    pub async fn bulk_create_availability_windows(
        &self,
        ctx: TenantContext,
        calendar_id: Uuid,
        windows: &[(NaiveDateTime, NaiveDateTime)],
        timezone: &str,
    ) -> CalendarResult<usize> {
        Self::validate_timezone(timezone)?;
        let calendars = CalendarRepository::new(&self.db, ctx);
        let calendar = calendars.require(calendar_id).await?;
        if !calendar.manages_available_windows {
            return Err(CalendarError::InvalidCalendarOperation);
        }

        let available = AvailableTimeRepository::new(&self.db, ctx);
        for (start_at, end_at) in windows {
            available
                .insert(calendar.id, *start_at, *end_at, timezone)
                .await?;
        }
        Ok(windows.len())
    }

    /// Creates manual blocked times (no provider linkage).
    pub async fn bulk_create_manual_blocked_times(
        &self,
        ctx: TenantContext,
        calendar_id: Uuid,
        blocks: &[(NaiveDateTime, NaiveDateTime, String)],
        timezone: &str,
    ) -> CalendarResult<usize> {
        Self::validate_timezone(timezone)?;
        let calendars = CalendarRepository::new(&self.db, ctx);
        let calendar = calendars.require(calendar_id).await?;

        let blocked = BlockedTimeRepository::new(&self.db, ctx);
        for (start_at, end_at, reason) in blocks {
            blocked
                .insert(NewBlockedTime {
                    calendar_id: calendar.id,
                    start_at: *start_at,
                    end_at: *end_at,
                    timezone: timezone.to_string(),
                    reason: reason.clone(),
                    external_id: String::new(),
                    recurrence_rule_id: None,
                    recurrence_id: None,
                    is_recurring_exception: false,
                    bulk_modification_parent_id: None,
                    meta: None,
                })
                .await?;
        }
        Ok(blocks.len())
    }

    /// Arms a push channel for the calendar and records the subscription.
    pub async fn subscribe_calendar(
        &self,
        ctx: TenantContext,
        calendar_id: Uuid,
        ttl_secs: i64,
    ) -> CalendarResult<SubscriptionModel> {
        let calendars = CalendarRepository::new(&self.db, ctx);
        let calendar = calendars.require(calendar_id).await?;
        let adapter = self.adapter(calendar.provider)?;

        let channel_id = Uuid::new_v4().to_string();
        let verification_token = generate_verification_token();
        let callback_url = format!(
            "{}/{}/{}/",
            self.webhook_callback_base,
            webhook_path_segment(calendar.provider),
            ctx.tenant_id()
        );

        let handle = adapter
            .create_subscription(&SubscriptionRequest {
                resource_external_id: calendar.external_id.clone(),
                callback_url,
                channel_id,
                verification_token,
                ttl_secs,
            })
            .await?;

        let webhooks = WebhookRepository::new(&self.db, ctx);
        webhooks
            .upsert_subscription(calendar.id, calendar.provider, &handle)
            .await
    }

    /// Re-arms a subscription before it expires.
    pub async fn renew_subscription(
        &self,
        ctx: TenantContext,
        subscription_id: Uuid,
    ) -> CalendarResult<SubscriptionModel> {
        let webhooks = WebhookRepository::new(&self.db, ctx);
        let calendars = CalendarRepository::new(&self.db, ctx);

        let subscription = crate::models::webhook_subscription::Entity::find_by_id(subscription_id)
            .one(&self.db)
            .await?
            .ok_or(CalendarError::NotFound("webhook subscription"))?;
        ctx.ensure_owns(subscription.tenant_id, "webhook subscription")?;

        let calendar = calendars.require(subscription.calendar_id).await?;
        let adapter = self.adapter(subscription.provider)?;

        let handle = SubscriptionHandle {
            external_subscription_id: subscription.external_subscription_id.clone(),
            external_resource_id: subscription.external_resource_id.clone(),
            channel_id: subscription.channel_id.clone(),
            verification_token: subscription.verification_token.clone(),
            callback_url: subscription.callback_url.clone(),
            expires_at: subscription.expires_at.naive_utc(),
        };
        let renewed = adapter.renew_subscription(&handle).await?;

        info!(calendar_id = %calendar.id, "renewed webhook subscription");
        webhooks
            .upsert_subscription(calendar.id, subscription.provider, &renewed)
            .await
    }

    /// Cancels the provider channel and deactivates the local subscription.
    pub async fn unsubscribe_calendar(
        &self,
        ctx: TenantContext,
        calendar_id: Uuid,
    ) -> CalendarResult<()> {
        let calendars = CalendarRepository::new(&self.db, ctx);
        let webhooks = WebhookRepository::new(&self.db, ctx);

        let calendar = calendars.require(calendar_id).await?;
        let Some(subscription) = webhooks
            .get_subscription(calendar.id, calendar.provider)
            .await?
        else {
            return Ok(());
        };

        let adapter = self.adapter(calendar.provider)?;
        let handle = SubscriptionHandle {
            external_subscription_id: subscription.external_subscription_id.clone(),
            external_resource_id: subscription.external_resource_id.clone(),
            channel_id: subscription.channel_id.clone(),
            verification_token: subscription.verification_token.clone(),
            callback_url: subscription.callback_url.clone(),
            expires_at: subscription.expires_at.naive_utc(),
        };
        match adapter.cancel_subscription(&handle).await {
            Ok(()) | Err(crate::adapters::AdapterError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }

        webhooks.deactivate(subscription).await?;
        Ok(())
    }

    /// Builds the attendee list pushed to providers on create.
    async fn attendees_for_push(
        &self,
        ctx: TenantContext,
        input: &CreateEventInput,
    ) -> CalendarResult<Vec<AttendeeRecord>> {
        let calendars = CalendarRepository::new(&self.db, ctx);
        let mut attendees: Vec<AttendeeRecord> = input
            .external_attendees
            .iter()
            .map(|(email, name)| AttendeeRecord {
                email: email.clone(),
                name: name.clone(),
                status: RsvpStatus::Pending,
            })
            .collect();

        for resource_id in &input.resource_allocations {
            let resource = calendars.require(*resource_id).await?;
            if let Some(email) = resource.email {
                attendees.push(AttendeeRecord {
                    email,
                    name: resource.name,
                    status: RsvpStatus::Accepted,
                });
            }
        }
        Ok(attendees)
    }
}

fn webhook_path_segment(provider: CalendarProvider) -> &'static str {
    match provider {
        CalendarProvider::Google => "google-calendar",
        CalendarProvider::Microsoft => "microsoft-calendar",
        _ => "unknown",
    }
}

fn generate_verification_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
