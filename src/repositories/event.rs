//! CalendarEvent repository.

use chrono::{NaiveDateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{CalendarError, CalendarResult};
use crate::models::calendar_event::{
    ActiveModel as EventActiveModel, Column as EventColumn, Entity as CalendarEvent,
    Model as EventModel,
};
use crate::models::enums::EventStatus;

use super::tenant::TenantContext;

/// Meta key marking an instance whose master has not been synced yet.
pub const PENDING_PARENT_META_KEY: &str = "pending_parent_external_id";
/// Meta key holding the provider's latest raw payload.
pub const ORIGINAL_PAYLOAD_META_KEY: &str = "latest_original_payload";

/// Fields for creating an event row.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub calendar_id: Uuid,
    pub title: String,
    pub description: String,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
    pub timezone: String,
    pub external_id: String,
    pub status: EventStatus,
    pub recurrence_rule_id: Option<Uuid>,
    pub parent_event_id: Option<Uuid>,
    pub recurrence_id: Option<NaiveDateTime>,
    pub is_recurring_exception: bool,
    pub bulk_modification_parent_id: Option<Uuid>,
    pub meta: Option<JsonValue>,
}

impl NewEvent {
    pub fn into_active_model(self, tenant_id: Uuid) -> EventActiveModel {
        let now = Utc::now();
        EventActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            calendar_id: Set(self.calendar_id),
            title: Set(self.title),
            description: Set(self.description),
            start_at: Set(self.start_at),
            end_at: Set(self.end_at),
            timezone: Set(self.timezone),
            external_id: Set(self.external_id),
            status: Set(self.status),
            recurrence_rule_id: Set(self.recurrence_rule_id),
            parent_event_id: Set(self.parent_event_id),
            recurrence_id: Set(self.recurrence_id),
            is_recurring_exception: Set(self.is_recurring_exception),
            bulk_modification_parent_id: Set(self.bulk_modification_parent_id),
            meta: Set(self.meta),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
    }
}

pub struct EventRepository<'a, C: ConnectionTrait> {
    db: &'a C,
    ctx: TenantContext,
}

impl<'a, C: ConnectionTrait> EventRepository<'a, C> {
    pub fn new(db: &'a C, ctx: TenantContext) -> Self {
        Self { db, ctx }
    }

    fn scoped(&self) -> sea_orm::Select<CalendarEvent> {
        CalendarEvent::find().filter(EventColumn::TenantId.eq(self.ctx.tenant_id()))
    }

    pub async fn insert(&self, new: NewEvent) -> CalendarResult<EventModel> {
        Ok(new
            .into_active_model(self.ctx.tenant_id())
            .insert(self.db)
            .await?)
    }

    pub async fn get(&self, event_id: Uuid) -> CalendarResult<Option<EventModel>> {
        Ok(self
            .scoped()
            .filter(EventColumn::Id.eq(event_id))
            .one(self.db)
            .await?)
    }

    pub async fn require(&self, event_id: Uuid) -> CalendarResult<EventModel> {
        self.get(event_id)
            .await?
            .ok_or(CalendarError::NotFound("calendar event"))
    }

    /// Event by provider id, searched tenant-wide so recurring instances can
    /// find masters that live on the same account but were mirrored earlier.
    pub async fn get_by_external_id(
        &self,
        external_id: &str,
    ) -> CalendarResult<Option<EventModel>> {
        Ok(self
            .scoped()
            .filter(EventColumn::ExternalId.eq(external_id))
            .one(self.db)
            .await?)
    }

    /// Events whose interval is contained in the window (sync baseline).
    pub async fn find_in_window(
        &self,
        calendar_id: Uuid,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> CalendarResult<Vec<EventModel>> {
        Ok(self
            .scoped()
            .filter(EventColumn::CalendarId.eq(calendar_id))
            .filter(EventColumn::StartAt.gte(start))
            .filter(EventColumn::EndAt.lte(end))
            .order_by_asc(EventColumn::StartAt)
            .all(self.db)
            .await?)
    }

    /// Non-recurring events intersecting the window across the given
    /// calendars (availability path).
    pub async fn find_overlapping_non_recurring(
        &self,
        calendar_ids: &[Uuid],
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> CalendarResult<Vec<EventModel>> {
        Ok(self
            .scoped()
            .filter(EventColumn::CalendarId.is_in(calendar_ids.to_vec()))
            .filter(EventColumn::RecurrenceRuleId.is_null())
            .filter(EventColumn::ParentEventId.is_null())
            .filter(EventColumn::BulkModificationParentId.is_null())
            .filter(EventColumn::Status.eq(EventStatus::Confirmed))
            .filter(EventColumn::StartAt.lt(end))
            .filter(EventColumn::EndAt.gt(start))
            .order_by_asc(EventColumn::StartAt)
            .all(self.db)
            .await?)
    }

    /// Recurring masters that could produce occurrences before `end`.
    pub async fn find_recurring_masters(
        &self,
        calendar_ids: &[Uuid],
        end: NaiveDateTime,
    ) -> CalendarResult<Vec<EventModel>> {
        Ok(self
            .scoped()
            .filter(EventColumn::CalendarId.is_in(calendar_ids.to_vec()))
            .filter(EventColumn::RecurrenceRuleId.is_not_null())
            .filter(EventColumn::ParentEventId.is_null())
            .filter(EventColumn::BulkModificationParentId.is_null())
            .filter(EventColumn::StartAt.lte(end))
            .order_by_asc(EventColumn::StartAt)
            .all(self.db)
            .await?)
    }

    /// Exceptions/instances attached to a master.
    pub async fn exceptions_of(&self, master_id: Uuid) -> CalendarResult<Vec<EventModel>> {
        Ok(self
            .scoped()
            .filter(EventColumn::ParentEventId.eq(master_id))
            .order_by_asc(EventColumn::StartAt)
            .all(self.db)
            .await?)
    }

    /// The continuation superseding `event_id`, if the series was forked.
    pub async fn continuation_of(&self, event_id: Uuid) -> CalendarResult<Option<EventModel>> {
        Ok(self
            .scoped()
            .filter(EventColumn::BulkModificationParentId.eq(event_id))
            .one(self.db)
            .await?)
    }

    pub async fn update(&self, model: EventActiveModel) -> CalendarResult<EventModel> {
        Ok(model.update(self.db).await?)
    }

    pub async fn delete(&self, event: EventModel) -> CalendarResult<()> {
        self.ctx.ensure_owns(event.tenant_id, "calendar event")?;
        CalendarEvent::delete_many()
            .filter(EventColumn::TenantId.eq(self.ctx.tenant_id()))
            .filter(EventColumn::Id.eq(event.id))
            .exec(self.db)
            .await?;
        Ok(())
    }

    pub async fn delete_by_external_ids(
        &self,
        calendar_id: Uuid,
        external_ids: &[String],
    ) -> CalendarResult<u64> {
        if external_ids.is_empty() {
            return Ok(0);
        }
        let result = CalendarEvent::delete_many()
            .filter(EventColumn::TenantId.eq(self.ctx.tenant_id()))
            .filter(EventColumn::CalendarId.eq(calendar_id))
            .filter(EventColumn::ExternalId.is_in(external_ids.to_vec()))
            .exec(self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Events on the calendar still waiting for their master to be synced.
    pub async fn find_with_pending_parent(
        &self,
        calendar_id: Uuid,
    ) -> CalendarResult<Vec<EventModel>> {
        let candidates = self
            .scoped()
            .filter(EventColumn::CalendarId.eq(calendar_id))
            .filter(EventColumn::ParentEventId.is_null())
            .filter(EventColumn::Meta.is_not_null())
            .all(self.db)
            .await?;

        Ok(candidates
            .into_iter()
            .filter(|event| {
                event
                    .meta
                    .as_ref()
                    .and_then(|meta| meta.get(PENDING_PARENT_META_KEY))
                    .is_some()
            })
            .collect())
    }

    /// Links an orphaned instance to its now-present master and clears the
    /// pending marker.
    pub async fn relink_to_parent(
        &self,
        instance: EventModel,
        parent_id: Uuid,
    ) -> CalendarResult<EventModel> {
        self.ctx.ensure_owns(instance.tenant_id, "calendar event")?;
        let start_at = instance.start_at;
        let mut meta = instance.meta.clone().unwrap_or_else(|| JsonValue::Object(Default::default()));
        if let Some(object) = meta.as_object_mut() {
            object.remove(PENDING_PARENT_META_KEY);
        }

        let mut active = instance.into_active_model();
        active.parent_event_id = Set(Some(parent_id));
        active.recurrence_id = Set(Some(start_at));
        active.meta = Set(Some(meta));
        active.updated_at = Set(Utc::now().into());
        Ok(active.update(self.db).await?)
    }
}
