//! CalendarSync repository.
//!
//! Status transitions: not_started → in_progress → success | failed. The
//! in-progress claim is guarded twice: a conditional UPDATE on status and the
//! partial unique index allowing one in-flight sync per calendar.

use chrono::{DateTime, NaiveDateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, QuerySelect, RuntimeErr, Set,
};
use uuid::Uuid;

use crate::error::{CalendarError, CalendarResult};
use crate::models::calendar_sync::{
    ActiveModel as SyncActiveModel, Column as SyncColumn, Entity as CalendarSync,
    Model as SyncModel,
};
use crate::models::enums::CalendarSyncStatus;

use super::tenant::TenantContext;

/// Partial unique index guarding single-flight per calendar.
const SINGLE_INFLIGHT_INDEX: &str = "idx_calendar_syncs_single_inflight";

pub(crate) fn is_unique_violation(err: &DbErr) -> bool {
    match err {
        DbErr::Exec(RuntimeErr::SqlxError(sea_orm::SqlxError::Database(db_err))) => {
            let code = db_err.code();
            matches!(db_err.constraint(), Some(SINGLE_INFLIGHT_INDEX))
                || matches!(code.as_deref(), Some("23505") | Some("2067") | Some("1555"))
        }
        _ => false,
    }
}

pub struct CalendarSyncRepository<'a, C: ConnectionTrait> {
    db: &'a C,
    ctx: TenantContext,
}

impl<'a, C: ConnectionTrait> CalendarSyncRepository<'a, C> {
    pub fn new(db: &'a C, ctx: TenantContext) -> Self {
        Self { db, ctx }
    }

    fn scoped(&self) -> sea_orm::Select<CalendarSync> {
        CalendarSync::find().filter(SyncColumn::TenantId.eq(self.ctx.tenant_id()))
    }

    pub async fn create(
        &self,
        calendar_id: Uuid,
        start_at: NaiveDateTime,
        end_at: NaiveDateTime,
        should_update_events: bool,
        scheduled_at: DateTime<Utc>,
    ) -> CalendarResult<SyncModel> {
        // Creation time comes from the caller's clock so coalescing windows
        // behave deterministically under an injected clock.
        let now = scheduled_at;
        let sync = SyncActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(self.ctx.tenant_id()),
            calendar_id: Set(calendar_id),
            start_at: Set(start_at),
            end_at: Set(end_at),
            status: Set(CalendarSyncStatus::NotStarted),
            should_update_events: Set(should_update_events),
            next_sync_token: Set(None),
            error_message: Set(None),
            attempts: Set(0),
            scheduled_at: Set(scheduled_at.into()),
            retry_after: Set(None),
            started_at: Set(None),
            finished_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        Ok(sync.insert(self.db).await?)
    }

    pub async fn get(&self, sync_id: Uuid) -> CalendarResult<Option<SyncModel>> {
        Ok(self
            .scoped()
            .filter(SyncColumn::Id.eq(sync_id))
            .one(self.db)
            .await?)
    }

    pub async fn require(&self, sync_id: Uuid) -> CalendarResult<SyncModel> {
        self.get(sync_id)
            .await?
            .ok_or(CalendarError::NotFound("calendar sync"))
    }

    /// Atomically claims a not_started sync, transitioning it to in_progress.
    /// Returns None when someone else already claimed it; a conflicting
    /// in-flight sync on the same calendar surfaces as `SyncInProgress`.
    pub async fn try_claim(&self, sync: &SyncModel) -> CalendarResult<Option<SyncModel>> {
        let now = Utc::now();
        let result = CalendarSync::update_many()
            .col_expr(SyncColumn::Status, Expr::value(CalendarSyncStatus::InProgress))
            .col_expr(SyncColumn::StartedAt, Expr::value(now))
            .col_expr(SyncColumn::UpdatedAt, Expr::value(now))
            .col_expr(
                SyncColumn::Attempts,
                Expr::value(Expr::col(SyncColumn::Attempts).add(1)),
            )
            .filter(SyncColumn::TenantId.eq(self.ctx.tenant_id()))
            .filter(SyncColumn::Id.eq(sync.id))
            .filter(SyncColumn::Status.eq(CalendarSyncStatus::NotStarted))
            .exec(self.db)
            .await;

        match result {
            Ok(update) if update.rows_affected == 1 => Ok(self.get(sync.id).await?),
            Ok(_) => Ok(None),
            Err(err) if is_unique_violation(&err) => {
                Err(CalendarError::SyncInProgress(sync.calendar_id))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn mark_success(
        &self,
        sync: SyncModel,
        next_sync_token: Option<String>,
    ) -> CalendarResult<SyncModel> {
        self.ctx.ensure_owns(sync.tenant_id, "calendar sync")?;
        let now = Utc::now();
        let mut active = sync.into_active_model();
        active.status = Set(CalendarSyncStatus::Success);
        if next_sync_token.is_some() {
            active.next_sync_token = Set(next_sync_token);
        }
        active.error_message = Set(None);
        active.finished_at = Set(Some(now.into()));
        active.updated_at = Set(now.into());
        Ok(active.update(self.db).await?)
    }

    /// Records a retryable failure: status back to not_started with a
    /// retry_after so the runner picks it up after the backoff.
    pub async fn mark_retry(
        &self,
        sync: SyncModel,
        error_message: &str,
        retry_after: DateTime<Utc>,
    ) -> CalendarResult<SyncModel> {
        self.ctx.ensure_owns(sync.tenant_id, "calendar sync")?;
        let now = Utc::now();
        let mut active = sync.into_active_model();
        active.status = Set(CalendarSyncStatus::NotStarted);
        active.error_message = Set(Some(error_message.to_string()));
        active.retry_after = Set(Some(retry_after.into()));
        active.updated_at = Set(now.into());
        Ok(active.update(self.db).await?)
    }

    /// Records a terminal failure.
    pub async fn mark_failed(
        &self,
        sync: SyncModel,
        error_message: &str,
    ) -> CalendarResult<SyncModel> {
        self.ctx.ensure_owns(sync.tenant_id, "calendar sync")?;
        let now = Utc::now();
        let mut active = sync.into_active_model();
        active.status = Set(CalendarSyncStatus::Failed);
        active.error_message = Set(Some(error_message.to_string()));
        active.finished_at = Set(Some(now.into()));
        active.updated_at = Set(now.into());
        Ok(active.update(self.db).await?)
    }

    /// Sync token recorded by the calendar's most recent successful sync.
    pub async fn latest_success_token(&self, calendar_id: Uuid) -> CalendarResult<Option<String>> {
        let latest = self
            .scoped()
            .filter(SyncColumn::CalendarId.eq(calendar_id))
            .filter(SyncColumn::Status.eq(CalendarSyncStatus::Success))
            .order_by_desc(SyncColumn::FinishedAt)
            .limit(1)
            .one(self.db)
            .await?;
        Ok(latest.and_then(|sync| sync.next_sync_token).filter(|t| !t.is_empty()))
    }

    /// Most recent non-failed sync for the calendar created at or after
    /// `since`; duplicate webhook deliveries coalesce onto it.
    pub async fn recent_active(
        &self,
        calendar_id: Uuid,
        since: DateTime<Utc>,
    ) -> CalendarResult<Option<SyncModel>> {
        Ok(self
            .scoped()
            .filter(SyncColumn::CalendarId.eq(calendar_id))
            .filter(SyncColumn::Status.ne(CalendarSyncStatus::Failed))
            .filter(SyncColumn::CreatedAt.gte(since))
            .order_by_desc(SyncColumn::CreatedAt)
            .limit(1)
            .one(self.db)
            .await?)
    }
}
