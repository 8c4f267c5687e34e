//! WebhookSubscription entity model.
//!
//! One active push channel per (tenant, calendar, provider). An active
//! subscription implies `expires_at` is in the future; the renewal job
//! re-arms channels approaching expiry.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

use super::enums::CalendarProvider;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "webhook_subscriptions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub calendar_id: Uuid,
    pub provider: CalendarProvider,

    /// Subscription id assigned by the provider.
    pub external_subscription_id: String,
    /// Resource id the provider watches.
    pub external_resource_id: String,

    pub callback_url: String,
    /// Channel id we generated when arming the subscription.
    pub channel_id: String,
    /// Token echoed back by the provider for notification authenticity.
    pub verification_token: String,

    pub expires_at: DateTimeWithTimeZone,
    pub is_active: bool,
    pub last_notification_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::calendar::Entity",
        from = "Column::CalendarId",
        to = "super::calendar::Column::Id"
    )]
    Calendar,
}

impl Related<super::calendar::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Calendar.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
