//! Tenant context and tenant repository.
//!
//! [`TenantContext`] is the capability every repository call requires; each
//! query binds the tenant id in its WHERE clause, so a cross-tenant read or
//! join is structurally impossible rather than a code-review concern.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, Set};
use uuid::Uuid;

use crate::error::{CalendarError, CalendarResult};
use crate::models::tenant::{
    ActiveModel as TenantActiveModel, Entity as Tenant, Model as TenantModel,
};

/// Proof of "which tenant am I acting for"; required by every repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: Uuid,
}

impl TenantContext {
    pub fn new(tenant_id: Uuid) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    /// Asserts an already-loaded entity belongs to this tenant. A mismatch is
    /// a programmer error and aborts the operation.
    pub fn ensure_owns(&self, entity_tenant_id: Uuid, what: &str) -> CalendarResult<()> {
        if entity_tenant_id == self.tenant_id {
            Ok(())
        } else {
            Err(CalendarError::TenantViolation(format!(
                "{what} belongs to tenant {entity_tenant_id}, not {}",
                self.tenant_id
            )))
        }
    }
}

/// Repository for tenant rows themselves (the only unscoped repository).
pub struct TenantRepository<'a, C: ConnectionTrait> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> TenantRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    pub async fn create(&self, name: Option<String>) -> CalendarResult<TenantModel> {
        let tenant = TenantActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name),
            created_at: Set(Utc::now().into()),
        };
        Ok(tenant.insert(self.db).await?)
    }

    pub async fn get(&self, tenant_id: Uuid) -> CalendarResult<Option<TenantModel>> {
        Ok(Tenant::find_by_id(tenant_id).one(self.db).await?)
    }

    /// All tenants; used by maintenance sweeps that fan out per tenant.
    pub async fn list(&self) -> CalendarResult<Vec<TenantModel>> {
        Ok(Tenant::find().all(self.db).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_owns_rejects_foreign_entities() {
        let ctx = TenantContext::new(Uuid::new_v4());
        let other = Uuid::new_v4();
        assert!(ctx.ensure_owns(ctx.tenant_id(), "calendar").is_ok());
        let err = ctx.ensure_owns(other, "calendar").unwrap_err();
        assert!(matches!(err, CalendarError::TenantViolation(_)));
    }
}
