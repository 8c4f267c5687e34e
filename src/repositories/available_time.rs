//! AvailableTime repository.

use chrono::{NaiveDateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::error::CalendarResult;
use crate::models::available_time::{
    ActiveModel as AvailableTimeActiveModel, Column as AvailableTimeColumn, Entity as AvailableTime,
    Model as AvailableTimeModel,
};

use super::tenant::TenantContext;

pub struct AvailableTimeRepository<'a, C: ConnectionTrait> {
    db: &'a C,
    ctx: TenantContext,
}

impl<'a, C: ConnectionTrait> AvailableTimeRepository<'a, C> {
    pub fn new(db: &'a C, ctx: TenantContext) -> Self {
        Self { db, ctx }
    }

    pub async fn insert(
        &self,
        calendar_id: Uuid,
        start_at: NaiveDateTime,
        end_at: NaiveDateTime,
        timezone: &str,
    ) -> CalendarResult<AvailableTimeModel> {
        let now = Utc::now();
        let window = AvailableTimeActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(self.ctx.tenant_id()),
            calendar_id: Set(calendar_id),
            start_at: Set(start_at),
            end_at: Set(end_at),
            timezone: Set(timezone.to_string()),
            recurrence_rule_id: Set(None),
            recurrence_id: Set(None),
            is_recurring_exception: Set(false),
            bulk_modification_parent_id: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        Ok(window.insert(self.db).await?)
    }

    /// Windows contained in the range, ascending.
    pub async fn find_in_window(
        &self,
        calendar_id: Uuid,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> CalendarResult<Vec<AvailableTimeModel>> {
        Ok(AvailableTime::find()
            .filter(AvailableTimeColumn::TenantId.eq(self.ctx.tenant_id()))
            .filter(AvailableTimeColumn::CalendarId.eq(calendar_id))
            .filter(AvailableTimeColumn::StartAt.gte(start))
            .filter(AvailableTimeColumn::EndAt.lte(end))
            .order_by_asc(AvailableTimeColumn::StartAt)
            .all(self.db)
            .await?)
    }

    /// Plain (non-recurring, non-exception) windows intersecting the range.
    pub async fn find_plain_overlapping(
        &self,
        calendar_id: Uuid,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> CalendarResult<Vec<AvailableTimeModel>> {
        Ok(AvailableTime::find()
            .filter(AvailableTimeColumn::TenantId.eq(self.ctx.tenant_id()))
            .filter(AvailableTimeColumn::CalendarId.eq(calendar_id))
            .filter(AvailableTimeColumn::RecurrenceRuleId.is_null())
            .filter(AvailableTimeColumn::IsRecurringException.eq(false))
            .filter(AvailableTimeColumn::BulkModificationParentId.is_null())
            .filter(AvailableTimeColumn::StartAt.lt(end))
            .filter(AvailableTimeColumn::EndAt.gt(start))
            .order_by_asc(AvailableTimeColumn::StartAt)
            .all(self.db)
            .await?)
    }

    /// Recurring window masters that could produce occurrences before `end`.
    pub async fn find_recurring_masters(
        &self,
        calendar_id: Uuid,
        end: NaiveDateTime,
    ) -> CalendarResult<Vec<AvailableTimeModel>> {
        Ok(AvailableTime::find()
            .filter(AvailableTimeColumn::TenantId.eq(self.ctx.tenant_id()))
            .filter(AvailableTimeColumn::CalendarId.eq(calendar_id))
            .filter(AvailableTimeColumn::RecurrenceRuleId.is_not_null())
            .filter(AvailableTimeColumn::IsRecurringException.eq(false))
            .filter(AvailableTimeColumn::BulkModificationParentId.is_null())
            .filter(AvailableTimeColumn::StartAt.lte(end))
            .order_by_asc(AvailableTimeColumn::StartAt)
            .all(self.db)
            .await?)
    }

    /// Per-occurrence override rows for the calendar's recurring windows.
    pub async fn exceptions_for(
        &self,
        calendar_id: Uuid,
    ) -> CalendarResult<Vec<AvailableTimeModel>> {
        Ok(AvailableTime::find()
            .filter(AvailableTimeColumn::TenantId.eq(self.ctx.tenant_id()))
            .filter(AvailableTimeColumn::CalendarId.eq(calendar_id))
            .filter(AvailableTimeColumn::IsRecurringException.eq(true))
            .all(self.db)
            .await?)
    }

    /// The continuation superseding a recurring window series, if forked.
    pub async fn continuation_of(
        &self,
        window_id: Uuid,
    ) -> CalendarResult<Option<AvailableTimeModel>> {
        Ok(AvailableTime::find()
            .filter(AvailableTimeColumn::TenantId.eq(self.ctx.tenant_id()))
            .filter(AvailableTimeColumn::BulkModificationParentId.eq(window_id))
            .one(self.db)
            .await?)
    }

    pub async fn delete_ids(&self, ids: &[Uuid]) -> CalendarResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = AvailableTime::delete_many()
            .filter(AvailableTimeColumn::TenantId.eq(self.ctx.tenant_id()))
            .filter(AvailableTimeColumn::Id.is_in(ids.to_vec()))
            .exec(self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
