//! Tenant operations.

use super::{Ctx, assign_guid, reread, require, require_name};
use crate::enumeration::{Cursor, EnumerationOrder, EnumerationQuery, EnumerationResult, Scope};
use crate::filter::Filter;
use crate::storage::Cascade;
use crate::types::{LoomError, Tenant, timestamp_now};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Operations on [`Tenant`] records.
pub struct TenantMethods<'a> {
    ctx: Ctx<'a>,
}

impl<'a> TenantMethods<'a> {
    pub(crate) fn new(ctx: Ctx<'a>) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.ctx.cancel = token;
        self
    }

    pub fn create(&self, tenant: Tenant) -> Result<Tenant, LoomError> {
        let mut tenant = tenant;
        assign_guid(&mut tenant.guid);
        let created = self.ctx.mutate(tenant.guid, |cascade| insert(cascade, tenant))?;
        tracing::debug!(tenant = %created.guid, "tenant created");
        Ok(created)
    }

    /// Create every tenant or none.
    pub fn create_many(&self, tenants: Vec<Tenant>) -> Result<Vec<Tenant>, LoomError> {
        let created = self.ctx.mutate(Uuid::nil(), |cascade| {
            tenants
                .into_iter()
                .map(|mut tenant| {
                    assign_guid(&mut tenant.guid);
                    insert(cascade, tenant)
                })
                .collect::<Result<Vec<_>, _>>()
        })?;
        tracing::debug!(count = created.len(), "tenants created");
        Ok(created)
    }

    pub fn read_by_guid(&self, guid: Uuid) -> Result<Option<Tenant>, LoomError> {
        self.ctx.read(Scope::TENANTS, guid)
    }

    pub fn read_by_guids(&self, guids: &[Uuid]) -> Result<Vec<Tenant>, LoomError> {
        self.ctx.read_guids(Scope::TENANTS, guids)
    }

    pub fn read_many(
        &self,
        filter: Filter,
        ordering: EnumerationOrder,
    ) -> Result<Cursor<Tenant>, LoomError> {
        self.ctx.cursor(Scope::TENANTS, filter, ordering)
    }

    pub fn read_first(
        &self,
        filter: Filter,
        ordering: EnumerationOrder,
    ) -> Result<Option<Tenant>, LoomError> {
        self.ctx.first(Scope::TENANTS, filter, ordering)
    }

    pub fn enumerate(&self, query: &EnumerationQuery) -> Result<EnumerationResult<Tenant>, LoomError> {
        self.ctx.enumerate(Scope::TENANTS, query)
    }

    pub fn exists_by_guid(&self, guid: Uuid) -> Result<bool, LoomError> {
        self.ctx.exists::<Tenant>(Scope::TENANTS, guid)
    }

    pub fn update(&self, tenant: Tenant) -> Result<Tenant, LoomError> {
        require_name(&tenant.name, "tenant name")?;
        let updated: Tenant = self.ctx.mutate(tenant.guid, |cascade| {
            let batch = cascade.batch();
            let existing: Tenant = require(batch, Scope::TENANTS, tenant.guid)?;
            let mut tenant = tenant;
            tenant.created_utc = existing.created_utc;
            tenant.last_update_utc = timestamp_now();
            batch.replace(&tenant)?;
            reread(batch, tenant.guid, tenant.guid)
        })?;
        tracing::debug!(tenant = %updated.guid, "tenant updated");
        Ok(updated)
    }

    /// Delete a tenant and everything it owns.
    pub fn delete_by_guid(&self, guid: Uuid) -> Result<(), LoomError> {
        self.ctx.mutate(guid, |cascade| {
            cascade
                .tenant()?
                .ok_or_else(|| LoomError::not_found("tenant", guid))
        })?;
        tracing::info!(tenant = %guid, "tenant deleted");
        Ok(())
    }
}

fn insert(cascade: &mut Cascade<'_>, mut tenant: Tenant) -> Result<Tenant, LoomError> {
    require_name(&tenant.name, "tenant name")?;
    let now = timestamp_now();
    (tenant.created_utc, tenant.last_update_utc) = (now, now);
    let batch = cascade.batch();
    batch.insert(&tenant)?;
    reread(batch, tenant.guid, tenant.guid)
}
