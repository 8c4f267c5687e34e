//! Calendar repository: calendars, bundle membership, provider upserts.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::adapters::{CalendarDescriptor, ResourceDescriptor};
use crate::error::{CalendarError, CalendarResult};
use crate::models::calendar::{
    ActiveModel as CalendarActiveModel, Column as CalendarColumn, Entity as Calendar,
    Model as CalendarModel,
};
use crate::models::children_calendar_relationship::{
    ActiveModel as ChildRelActiveModel, Column as ChildRelColumn,
    Entity as ChildrenCalendarRelationship,
};
use crate::models::enums::{CalendarKind, CalendarProvider};

use super::tenant::TenantContext;

/// Fields for creating a calendar row.
#[derive(Debug, Clone)]
pub struct NewCalendar {
    pub name: String,
    pub description: Option<String>,
    pub email: Option<String>,
    pub external_id: String,
    pub provider: CalendarProvider,
    pub calendar_kind: CalendarKind,
    pub manages_available_windows: bool,
    pub capacity: Option<i32>,
    pub original_payload: Option<JsonValue>,
}

pub struct CalendarRepository<'a, C: ConnectionTrait> {
    db: &'a C,
    ctx: TenantContext,
}

impl<'a, C: ConnectionTrait> CalendarRepository<'a, C> {
    pub fn new(db: &'a C, ctx: TenantContext) -> Self {
        Self { db, ctx }
    }

    pub async fn create(&self, new: NewCalendar) -> CalendarResult<CalendarModel> {
        let now = Utc::now();
        let calendar = CalendarActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(self.ctx.tenant_id()),
            name: Set(new.name),
            description: Set(new.description),
            email: Set(new.email),
            external_id: Set(new.external_id),
            provider: Set(new.provider),
            calendar_kind: Set(new.calendar_kind),
            manages_available_windows: Set(new.manages_available_windows),
            capacity: Set(new.capacity),
            primary_child_id: Set(None),
            original_payload: Set(new.original_payload),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        Ok(calendar.insert(self.db).await?)
    }

    pub async fn get(&self, calendar_id: Uuid) -> CalendarResult<Option<CalendarModel>> {
        Ok(Calendar::find()
            .filter(CalendarColumn::TenantId.eq(self.ctx.tenant_id()))
            .filter(CalendarColumn::Id.eq(calendar_id))
            .one(self.db)
            .await?)
    }

    pub async fn require(&self, calendar_id: Uuid) -> CalendarResult<CalendarModel> {
        self.get(calendar_id)
            .await?
            .ok_or(CalendarError::NotFound("calendar"))
    }

    pub async fn get_by_external_id(
        &self,
        provider: CalendarProvider,
        external_id: &str,
    ) -> CalendarResult<Option<CalendarModel>> {
        Ok(Calendar::find()
            .filter(CalendarColumn::TenantId.eq(self.ctx.tenant_id()))
            .filter(CalendarColumn::Provider.eq(provider))
            .filter(CalendarColumn::ExternalId.eq(external_id))
            .one(self.db)
            .await?)
    }

    /// Inserts or refreshes a provider-described calendar, keyed on
    /// (tenant, external_id, provider).
    pub async fn upsert_from_descriptor(
        &self,
        descriptor: &CalendarDescriptor,
        kind: CalendarKind,
        manages_available_windows: bool,
    ) -> CalendarResult<CalendarModel> {
        match self
            .get_by_external_id(descriptor.provider, &descriptor.external_id)
            .await?
        {
            Some(existing) => {
                let mut active = existing.into_active_model();
                active.name = Set(descriptor.name.clone());
                active.description = Set(if descriptor.description.is_empty() {
                    None
                } else {
                    Some(descriptor.description.clone())
                });
                active.email = Set(descriptor.email.clone());
                active.original_payload = Set(descriptor.original_payload.clone());
                active.updated_at = Set(Utc::now().into());
                Ok(active.update(self.db).await?)
            }
            None => {
                self.create(NewCalendar {
                    name: descriptor.name.clone(),
                    description: if descriptor.description.is_empty() {
                        None
                    } else {
                        Some(descriptor.description.clone())
                    },
                    email: descriptor.email.clone(),
                    external_id: descriptor.external_id.clone(),
                    provider: descriptor.provider,
                    calendar_kind: kind,
                    manages_available_windows,
                    capacity: None,
                    original_payload: descriptor.original_payload.clone(),
                })
                .await
            }
        }
    }

    /// Inserts or refreshes a resource calendar from a provider resource.
    pub async fn upsert_resource(
        &self,
        provider: CalendarProvider,
        resource: &ResourceDescriptor,
    ) -> CalendarResult<CalendarModel> {
        match self
            .get_by_external_id(provider, &resource.external_id)
            .await?
        {
            Some(existing) => {
                let mut active = existing.into_active_model();
                active.name = Set(resource.name.clone());
                active.email = Set(resource.email.clone());
                active.capacity = Set(resource.capacity);
                active.original_payload = Set(resource.original_payload.clone());
                active.updated_at = Set(Utc::now().into());
                Ok(active.update(self.db).await?)
            }
            None => {
                self.create(NewCalendar {
                    name: resource.name.clone(),
                    description: if resource.description.is_empty() {
                        None
                    } else {
                        Some(resource.description.clone())
                    },
                    email: resource.email.clone(),
                    external_id: resource.external_id.clone(),
                    provider,
                    calendar_kind: CalendarKind::Resource,
                    manages_available_windows: false,
                    capacity: resource.capacity,
                    original_payload: resource.original_payload.clone(),
                })
                .await
            }
        }
    }

    /// Children of a bundle, in stable creation order.
    pub async fn children(&self, bundle_id: Uuid) -> CalendarResult<Vec<CalendarModel>> {
        let relationships = ChildrenCalendarRelationship::find()
            .filter(ChildRelColumn::TenantId.eq(self.ctx.tenant_id()))
            .filter(ChildRelColumn::ParentCalendarId.eq(bundle_id))
            .order_by_asc(ChildRelColumn::CreatedAt)
            .all(self.db)
            .await?;

        let mut children = Vec::with_capacity(relationships.len());
        for relationship in relationships {
            if let Some(child) = self.get(relationship.child_calendar_id).await? {
                children.push(child);
            }
        }
        Ok(children)
    }

    pub async fn add_child(&self, bundle_id: Uuid, child_id: Uuid) -> CalendarResult<()> {
        // Both ends must exist inside the tenant (I3).
        self.require(bundle_id).await?;
        self.require(child_id).await?;

        let relationship = ChildRelActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(self.ctx.tenant_id()),
            parent_calendar_id: Set(bundle_id),
            child_calendar_id: Set(child_id),
            created_at: Set(Utc::now().into()),
        };
        relationship.insert(self.db).await?;
        Ok(())
    }

    /// Designates the bundle's primary child; it must already be a member.
    pub async fn set_primary_child(&self, bundle_id: Uuid, child_id: Uuid) -> CalendarResult<()> {
        let children = self.children(bundle_id).await?;
        if !children.iter().any(|child| child.id == child_id) {
            return Err(CalendarError::InvalidPrimaryCalendar);
        }

        let bundle = self.require(bundle_id).await?;
        let mut active = bundle.into_active_model();
        active.primary_child_id = Set(Some(child_id));
        active.updated_at = Set(Utc::now().into());
        active.update(self.db).await?;
        Ok(())
    }
}
