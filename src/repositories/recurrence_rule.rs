//! RecurrenceRule repository.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::error::{CalendarError, CalendarResult};
use crate::models::recurrence_rule::{
    ActiveModel as RuleActiveModel, Column as RuleColumn, Entity as RecurrenceRule,
    Model as RuleModel,
};
use crate::recurrence::RuleSpec;

use super::tenant::TenantContext;

pub struct RecurrenceRuleRepository<'a, C: ConnectionTrait> {
    db: &'a C,
    ctx: TenantContext,
}

impl<'a, C: ConnectionTrait> RecurrenceRuleRepository<'a, C> {
    pub fn new(db: &'a C, ctx: TenantContext) -> Self {
        Self { db, ctx }
    }

    /// Persists a validated rule spec, returning the stored row.
    pub async fn create(&self, spec: &RuleSpec) -> CalendarResult<RuleModel> {
        let (frequency, interval, count, until, by_weekday, by_month_day, by_month) =
            spec.column_values();
        let rule = RuleActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(self.ctx.tenant_id()),
            frequency: Set(frequency),
            interval: Set(interval),
            count: Set(count),
            until: Set(until),
            by_weekday: Set(by_weekday),
            by_month_day: Set(by_month_day),
            by_month: Set(by_month),
            created_at: Set(Utc::now().into()),
        };
        Ok(rule.insert(self.db).await?)
    }

    pub async fn get(&self, rule_id: Uuid) -> CalendarResult<Option<RuleModel>> {
        Ok(RecurrenceRule::find()
            .filter(RuleColumn::TenantId.eq(self.ctx.tenant_id()))
            .filter(RuleColumn::Id.eq(rule_id))
            .one(self.db)
            .await?)
    }

    pub async fn require(&self, rule_id: Uuid) -> CalendarResult<RuleModel> {
        self.get(rule_id)
            .await?
            .ok_or(CalendarError::NotFound("recurrence rule"))
    }
}
