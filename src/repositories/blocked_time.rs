//! BlockedTime repository.

use chrono::{NaiveDateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::CalendarResult;
use crate::models::blocked_time::{
    ActiveModel as BlockedTimeActiveModel, Column as BlockedTimeColumn, Entity as BlockedTime,
    Model as BlockedTimeModel,
};

use super::event::PENDING_PARENT_META_KEY;
use super::tenant::TenantContext;

/// Fields for creating a blocked time row.
#[derive(Debug, Clone)]
pub struct NewBlockedTime {
    pub calendar_id: Uuid,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
    pub timezone: String,
    pub reason: String,
    pub external_id: String,
    pub recurrence_rule_id: Option<Uuid>,
    pub recurrence_id: Option<NaiveDateTime>,
    pub is_recurring_exception: bool,
    pub bulk_modification_parent_id: Option<Uuid>,
    pub meta: Option<JsonValue>,
}

impl NewBlockedTime {
    pub fn into_active_model(self, tenant_id: Uuid) -> BlockedTimeActiveModel {
        let now = Utc::now();
        BlockedTimeActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            calendar_id: Set(self.calendar_id),
            start_at: Set(self.start_at),
            end_at: Set(self.end_at),
            timezone: Set(self.timezone),
            reason: Set(self.reason),
            external_id: Set(self.external_id),
            recurrence_rule_id: Set(self.recurrence_rule_id),
            recurrence_id: Set(self.recurrence_id),
            is_recurring_exception: Set(self.is_recurring_exception),
            bulk_modification_parent_id: Set(self.bulk_modification_parent_id),
            meta: Set(self.meta),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
    }
}

pub struct BlockedTimeRepository<'a, C: ConnectionTrait> {
    db: &'a C,
    ctx: TenantContext,
}

impl<'a, C: ConnectionTrait> BlockedTimeRepository<'a, C> {
    pub fn new(db: &'a C, ctx: TenantContext) -> Self {
        Self { db, ctx }
    }

    fn scoped(&self) -> sea_orm::Select<BlockedTime> {
        BlockedTime::find().filter(BlockedTimeColumn::TenantId.eq(self.ctx.tenant_id()))
    }

    pub async fn insert(&self, new: NewBlockedTime) -> CalendarResult<BlockedTimeModel> {
        Ok(new
            .into_active_model(self.ctx.tenant_id())
            .insert(self.db)
            .await?)
    }

    /// Blocks whose interval is contained in the window (sync baseline).
    pub async fn find_in_window(
        &self,
        calendar_id: Uuid,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> CalendarResult<Vec<BlockedTimeModel>> {
        Ok(self
            .scoped()
            .filter(BlockedTimeColumn::CalendarId.eq(calendar_id))
            .filter(BlockedTimeColumn::StartAt.gte(start))
            .filter(BlockedTimeColumn::EndAt.lte(end))
            .order_by_asc(BlockedTimeColumn::StartAt)
            .all(self.db)
            .await?)
    }

    /// Blocks intersecting the window across calendars (availability path).
    pub async fn find_overlapping(
        &self,
        calendar_ids: &[Uuid],
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> CalendarResult<Vec<BlockedTimeModel>> {
        Ok(self
            .scoped()
            .filter(BlockedTimeColumn::CalendarId.is_in(calendar_ids.to_vec()))
            .filter(BlockedTimeColumn::StartAt.lt(end))
            .filter(BlockedTimeColumn::EndAt.gt(start))
            .order_by_asc(BlockedTimeColumn::StartAt)
            .all(self.db)
            .await?)
    }

    pub async fn update(
        &self,
        model: BlockedTimeActiveModel,
    ) -> CalendarResult<BlockedTimeModel> {
        Ok(model.update(self.db).await?)
    }

    pub async fn delete_by_external_ids(
        &self,
        calendar_id: Uuid,
        external_ids: &[String],
    ) -> CalendarResult<u64> {
        if external_ids.is_empty() {
            return Ok(0);
        }
        let result = BlockedTime::delete_many()
            .filter(BlockedTimeColumn::TenantId.eq(self.ctx.tenant_id()))
            .filter(BlockedTimeColumn::CalendarId.eq(calendar_id))
            .filter(BlockedTimeColumn::ExternalId.is_in(external_ids.to_vec()))
            .exec(self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Blocks still holding a pending-parent marker.
    pub async fn find_with_pending_parent(
        &self,
        calendar_id: Uuid,
    ) -> CalendarResult<Vec<BlockedTimeModel>> {
        let candidates = self
            .scoped()
            .filter(BlockedTimeColumn::CalendarId.eq(calendar_id))
            .filter(BlockedTimeColumn::Meta.is_not_null())
            .all(self.db)
            .await?;

        Ok(candidates
            .into_iter()
            .filter(|block| {
                block
                    .meta
                    .as_ref()
                    .and_then(|meta| meta.get(PENDING_PARENT_META_KEY))
                    .is_some()
            })
            .collect())
    }

    /// Clears the pending-parent marker once the master exists locally.
    pub async fn clear_pending_parent(
        &self,
        block: BlockedTimeModel,
    ) -> CalendarResult<BlockedTimeModel> {
        self.ctx.ensure_owns(block.tenant_id, "blocked time")?;
        let mut meta = block
            .meta
            .clone()
            .unwrap_or_else(|| JsonValue::Object(Default::default()));
        if let Some(object) = meta.as_object_mut() {
            object.remove(PENDING_PARENT_META_KEY);
        }
        let mut active = block.into_active_model();
        active.meta = Set(Some(meta));
        active.updated_at = Set(Utc::now().into());
        Ok(active.update(self.db).await?)
    }
}
