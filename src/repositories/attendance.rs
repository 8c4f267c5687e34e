//! Attendance repositories: internal attendances, external attendees and
//! their attendances, and resource allocations.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, QueryFilter, Set,
};
use uuid::Uuid;

use crate::error::CalendarResult;
use crate::models::enums::RsvpStatus;
use crate::models::event_attendance::{
    ActiveModel as AttendanceActiveModel, Column as AttendanceColumn, Entity as EventAttendance,
    Model as AttendanceModel,
};
use crate::models::event_external_attendance::{
    ActiveModel as ExternalAttendanceActiveModel, Column as ExternalAttendanceColumn,
    Entity as EventExternalAttendance, Model as ExternalAttendanceModel,
};
use crate::models::external_attendee::{
    ActiveModel as ExternalAttendeeActiveModel, Column as ExternalAttendeeColumn,
    Entity as ExternalAttendee, Model as ExternalAttendeeModel,
};
use crate::models::resource_allocation::{
    ActiveModel as AllocationActiveModel, Column as AllocationColumn, Entity as ResourceAllocation,
    Model as AllocationModel,
};

use super::tenant::TenantContext;

pub struct AttendanceRepository<'a, C: ConnectionTrait> {
    db: &'a C,
    ctx: TenantContext,
}

impl<'a, C: ConnectionTrait> AttendanceRepository<'a, C> {
    pub fn new(db: &'a C, ctx: TenantContext) -> Self {
        Self { db, ctx }
    }

    pub async fn add_attendance(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        status: RsvpStatus,
    ) -> CalendarResult<AttendanceModel> {
        let attendance = AttendanceActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(self.ctx.tenant_id()),
            event_id: Set(event_id),
            user_id: Set(user_id),
            status: Set(status),
            created_at: Set(Utc::now().into()),
        };
        Ok(attendance.insert(self.db).await?)
    }

    pub async fn attendances_of(&self, event_id: Uuid) -> CalendarResult<Vec<AttendanceModel>> {
        Ok(EventAttendance::find()
            .filter(AttendanceColumn::TenantId.eq(self.ctx.tenant_id()))
            .filter(AttendanceColumn::EventId.eq(event_id))
            .all(self.db)
            .await?)
    }

    pub async fn get_or_create_external_attendee(
        &self,
        email: &str,
        name: &str,
    ) -> CalendarResult<ExternalAttendeeModel> {
        if let Some(existing) = ExternalAttendee::find()
            .filter(ExternalAttendeeColumn::TenantId.eq(self.ctx.tenant_id()))
            .filter(ExternalAttendeeColumn::Email.eq(email))
            .one(self.db)
            .await?
        {
            return Ok(existing);
        }

        let attendee = ExternalAttendeeActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(self.ctx.tenant_id()),
            email: Set(email.to_string()),
            name: Set(name.to_string()),
            created_at: Set(Utc::now().into()),
        };
        Ok(attendee.insert(self.db).await?)
    }

    pub async fn add_external_attendance(
        &self,
        event_id: Uuid,
        external_attendee_id: Uuid,
        status: RsvpStatus,
    ) -> CalendarResult<ExternalAttendanceModel> {
        let attendance = ExternalAttendanceActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(self.ctx.tenant_id()),
            event_id: Set(event_id),
            external_attendee_id: Set(external_attendee_id),
            status: Set(status),
            created_at: Set(Utc::now().into()),
        };
        Ok(attendance.insert(self.db).await?)
    }

    pub async fn external_attendances_of(
        &self,
        event_id: Uuid,
    ) -> CalendarResult<Vec<(ExternalAttendanceModel, Option<ExternalAttendeeModel>)>> {
        let attendances = EventExternalAttendance::find()
            .filter(ExternalAttendanceColumn::TenantId.eq(self.ctx.tenant_id()))
            .filter(ExternalAttendanceColumn::EventId.eq(event_id))
            .all(self.db)
            .await?;

        let mut result = Vec::with_capacity(attendances.len());
        for attendance in attendances {
            let attendee = ExternalAttendee::find()
                .filter(ExternalAttendeeColumn::TenantId.eq(self.ctx.tenant_id()))
                .filter(ExternalAttendeeColumn::Id.eq(attendance.external_attendee_id))
                .one(self.db)
                .await?;
            result.push((attendance, attendee));
        }
        Ok(result)
    }

    pub async fn set_external_attendance_status(
        &self,
        attendance: ExternalAttendanceModel,
        status: RsvpStatus,
    ) -> CalendarResult<ExternalAttendanceModel> {
        self.ctx
            .ensure_owns(attendance.tenant_id, "external attendance")?;
        let mut active = attendance.into_active_model();
        active.status = Set(status);
        Ok(active.update(self.db).await?)
    }

    pub async fn add_resource_allocation(
        &self,
        event_id: Uuid,
        resource_calendar_id: Uuid,
        status: RsvpStatus,
    ) -> CalendarResult<AllocationModel> {
        let allocation = AllocationActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(self.ctx.tenant_id()),
            event_id: Set(event_id),
            resource_calendar_id: Set(resource_calendar_id),
            status: Set(status),
            created_at: Set(Utc::now().into()),
        };
        Ok(allocation.insert(self.db).await?)
    }

    pub async fn allocations_of(&self, event_id: Uuid) -> CalendarResult<Vec<AllocationModel>> {
        Ok(ResourceAllocation::find()
            .filter(AllocationColumn::TenantId.eq(self.ctx.tenant_id()))
            .filter(AllocationColumn::EventId.eq(event_id))
            .all(self.db)
            .await?)
    }
}
