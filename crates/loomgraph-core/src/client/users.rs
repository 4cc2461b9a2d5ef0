//! User and credential operations.
//!
//! Emails are unique per tenant (case-insensitive). Credentials are owned by
//! their user through the ownership index, so deleting a user finds its
//! credentials without a scan.

use super::{Ctx, assign_guid, require, require_guid, require_name, reread};
use crate::enumeration::{Cursor, EnumerationOrder, EnumerationQuery, EnumerationResult, Scope};
use crate::filter::Filter;
use crate::storage::{Cascade, RecordKind, StoreRead};
use crate::types::{Credential, LoomError, Tenant, User, timestamp_now};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// =============================================================================
// USERS
// =============================================================================

/// Operations on [`User`] records.
pub struct UserMethods<'a> {
    ctx: Ctx<'a>,
}

impl<'a> UserMethods<'a> {
    pub(crate) fn new(ctx: Ctx<'a>) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.ctx.cancel = token;
        self
    }

    pub fn create(&self, user: User) -> Result<User, LoomError> {
        let created = self
            .ctx
            .mutate(user.tenant_guid, |cascade| insert_user(cascade, user))?;
        tracing::debug!(tenant = %created.tenant_guid, user = %created.guid, "user created");
        Ok(created)
    }

    /// Create every user or none. Each user is moved into `tenant`.
    pub fn create_many(&self, tenant: Uuid, users: Vec<User>) -> Result<Vec<User>, LoomError> {
        self.ctx.mutate(tenant, |cascade| {
            users
                .into_iter()
                .map(|mut user| {
                    user.tenant_guid = tenant;
                    insert_user(cascade, user)
                })
                .collect()
        })
    }

    pub fn read_by_guid(&self, tenant: Uuid, guid: Uuid) -> Result<Option<User>, LoomError> {
        self.ctx.read(Scope::tenant(tenant), guid)
    }

    pub fn read_by_guids(&self, tenant: Uuid, guids: &[Uuid]) -> Result<Vec<User>, LoomError> {
        self.ctx.read_guids(Scope::tenant(tenant), guids)
    }

    /// The user with `email` (case-insensitive), if any.
    pub fn read_by_email(&self, tenant: Uuid, email: &str) -> Result<Option<User>, LoomError> {
        let cursor = self.ctx.cursor::<User>(
            Scope::tenant(tenant),
            Filter::new(),
            EnumerationOrder::CreatedAscending,
        )?;
        for user in cursor {
            let user = user?;
            if user.email.eq_ignore_ascii_case(email.trim()) {
                return Ok(Some(user));
            }
        }
        Ok(None)
    }

    pub fn read_many(
        &self,
        tenant: Uuid,
        filter: Filter,
        ordering: EnumerationOrder,
    ) -> Result<Cursor<User>, LoomError> {
        self.ctx.cursor(Scope::tenant(tenant), filter, ordering)
    }

    pub fn read_first(
        &self,
        tenant: Uuid,
        filter: Filter,
        ordering: EnumerationOrder,
    ) -> Result<Option<User>, LoomError> {
        self.ctx.first(Scope::tenant(tenant), filter, ordering)
    }

    pub fn enumerate(
        &self,
        tenant: Uuid,
        query: &EnumerationQuery,
    ) -> Result<EnumerationResult<User>, LoomError> {
        self.ctx.enumerate(Scope::tenant(tenant), query)
    }

    pub fn exists_by_guid(&self, tenant: Uuid, guid: Uuid) -> Result<bool, LoomError> {
        self.ctx.exists::<User>(Scope::tenant(tenant), guid)
    }

    pub fn update(&self, user: User) -> Result<User, LoomError> {
        validate_user(&user)?;
        self.ctx.mutate(user.tenant_guid, |cascade| {
            let batch = cascade.batch();
            let scope = Scope::tenant(user.tenant_guid);
            let existing: User = require(batch, scope, user.guid)?;
            ensure_email_free(cascade, &user)?;
            let mut user = user;
            user.created_utc = existing.created_utc;
            user.last_update_utc = timestamp_now();
            batch.replace(&user)?;
            reread(batch, user.tenant_guid, user.guid)
        })
    }

    /// Delete a user; without `force`, a user with credentials is a
    /// conflict. With `force` its credentials go too.
    pub fn delete_by_guid(&self, tenant: Uuid, guid: Uuid, force: bool) -> Result<(), LoomError> {
        self.ctx.mutate(tenant, |cascade| {
            cascade
                .user(guid, force)?
                .ok_or_else(|| LoomError::not_found("user", guid))
        })?;
        tracing::debug!(tenant = %tenant, user = %guid, "user deleted");
        Ok(())
    }

    /// Delete every user of the tenant with their credentials.
    pub fn delete_all_in_tenant(&self, tenant: Uuid) -> Result<usize, LoomError> {
        self.ctx.mutate(tenant, |cascade| {
            let mut removed = 0;
            for guid in cascade.keys(RecordKind::User, Uuid::nil())? {
                removed += usize::from(cascade.user(guid, true)?.is_some());
            }
            Ok(removed)
        })
    }
}

fn validate_user(user: &User) -> Result<(), LoomError> {
    require_guid(user.tenant_guid, "tenant")?;
    require_name(&user.email, "user email")
}

fn insert_user(cascade: &mut Cascade<'_>, mut user: User) -> Result<User, LoomError> {
    validate_user(&user)?;
    assign_guid(&mut user.guid);
    let batch = cascade.batch();
    require::<Tenant>(batch, Scope::TENANTS, user.tenant_guid)?;
    ensure_email_free(cascade, &user)?;
    let now = timestamp_now();
    (user.created_utc, user.last_update_utc) = (now, now);
    batch.insert(&user)?;
    reread(batch, user.tenant_guid, user.guid)
}

fn ensure_email_free(cascade: &Cascade<'_>, user: &User) -> Result<(), LoomError> {
    let batch = cascade.batch();
    for guid in cascade.keys(RecordKind::User, Uuid::nil())? {
        if guid == user.guid {
            continue;
        }
        if let Some(other) = batch.get_raw::<User>(user.tenant_guid, guid)?
            && other.email.eq_ignore_ascii_case(user.email.trim())
        {
            return Err(LoomError::conflict(format!(
                "email {} is already used by user {guid}",
                user.email
            )));
        }
    }
    Ok(())
}

// =============================================================================
// CREDENTIALS
// =============================================================================

/// Operations on [`Credential`] records.
pub struct CredentialMethods<'a> {
    ctx: Ctx<'a>,
}

impl<'a> CredentialMethods<'a> {
    pub(crate) fn new(ctx: Ctx<'a>) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.ctx.cancel = token;
        self
    }

    pub fn create(&self, credential: Credential) -> Result<Credential, LoomError> {
        let created = self.ctx.mutate(credential.tenant_guid, |cascade| {
            insert_credential(cascade, credential)
        })?;
        tracing::debug!(tenant = %created.tenant_guid, credential = %created.guid, "credential created");
        Ok(created)
    }

    /// Create every credential or none. Each credential is moved into
    /// `tenant`.
    pub fn create_many(
        &self,
        tenant: Uuid,
        credentials: Vec<Credential>,
    ) -> Result<Vec<Credential>, LoomError> {
        self.ctx.mutate(tenant, |cascade| {
            credentials
                .into_iter()
                .map(|mut credential| {
                    credential.tenant_guid = tenant;
                    insert_credential(cascade, credential)
                })
                .collect()
        })
    }

    pub fn read_by_guid(&self, tenant: Uuid, guid: Uuid) -> Result<Option<Credential>, LoomError> {
        self.ctx.read(Scope::tenant(tenant), guid)
    }

    pub fn read_by_guids(
        &self,
        tenant: Uuid,
        guids: &[Uuid],
    ) -> Result<Vec<Credential>, LoomError> {
        self.ctx.read_guids(Scope::tenant(tenant), guids)
    }

    /// The credential carrying `token`, if any.
    pub fn read_by_bearer_token(
        &self,
        tenant: Uuid,
        token: &str,
    ) -> Result<Option<Credential>, LoomError> {
        let cursor = self.ctx.cursor::<Credential>(
            Scope::tenant(tenant),
            Filter::new(),
            EnumerationOrder::CreatedAscending,
        )?;
        for credential in cursor {
            let credential = credential?;
            if credential.bearer_token == token {
                return Ok(Some(credential));
            }
        }
        Ok(None)
    }

    /// Credentials issued to one user, oldest first.
    pub fn read_for_user(&self, tenant: Uuid, user: Uuid) -> Result<Vec<Credential>, LoomError> {
        let snapshot = self.ctx.snapshot()?;
        let guids = snapshot.owned(tenant, user, RecordKind::Credential)?;
        let mut credentials = self.ctx.read_guids::<Credential>(Scope::tenant(tenant), &guids)?;
        credentials.sort_by_key(crate::storage::Record::order_key);
        Ok(credentials)
    }

    pub fn read_many(
        &self,
        tenant: Uuid,
        filter: Filter,
        ordering: EnumerationOrder,
    ) -> Result<Cursor<Credential>, LoomError> {
        self.ctx.cursor(Scope::tenant(tenant), filter, ordering)
    }

    pub fn read_first(
        &self,
        tenant: Uuid,
        filter: Filter,
        ordering: EnumerationOrder,
    ) -> Result<Option<Credential>, LoomError> {
        self.ctx.first(Scope::tenant(tenant), filter, ordering)
    }

    pub fn enumerate(
        &self,
        tenant: Uuid,
        query: &EnumerationQuery,
    ) -> Result<EnumerationResult<Credential>, LoomError> {
        self.ctx.enumerate(Scope::tenant(tenant), query)
    }

    pub fn exists_by_guid(&self, tenant: Uuid, guid: Uuid) -> Result<bool, LoomError> {
        self.ctx.exists::<Credential>(Scope::tenant(tenant), guid)
    }

    /// Replace a credential. Moving it to another user relinks ownership.
    pub fn update(&self, credential: Credential) -> Result<Credential, LoomError> {
        validate_credential(&credential)?;
        self.ctx.mutate(credential.tenant_guid, |cascade| {
            let batch = cascade.batch();
            let scope = Scope::tenant(credential.tenant_guid);
            let existing: Credential = require(batch, scope, credential.guid)?;
            require::<User>(batch, scope, credential.user_guid)?;
            let mut credential = credential;
            credential.created_utc = existing.created_utc;
            credential.last_update_utc = timestamp_now();
            batch.replace(&credential)?;
            if existing.user_guid != credential.user_guid {
                let (tenant, guid) = (credential.tenant_guid, credential.guid);
                batch.unlink_owned(tenant, existing.user_guid, RecordKind::Credential, guid)?;
                batch.link_owned(tenant, credential.user_guid, RecordKind::Credential, guid)?;
            }
            reread(batch, credential.tenant_guid, credential.guid)
        })
    }

    pub fn delete_by_guid(&self, tenant: Uuid, guid: Uuid) -> Result<(), LoomError> {
        self.ctx.mutate(tenant, |cascade| {
            cascade
                .credential(guid)?
                .ok_or_else(|| LoomError::not_found("credential", guid))
        })?;
        tracing::debug!(tenant = %tenant, credential = %guid, "credential deleted");
        Ok(())
    }

    pub fn delete_for_user(&self, tenant: Uuid, user: Uuid) -> Result<usize, LoomError> {
        self.ctx.mutate(tenant, |cascade| {
            let mut removed = 0;
            for guid in cascade.batch().owned(tenant, user, RecordKind::Credential)? {
                removed += usize::from(cascade.credential(guid)?.is_some());
            }
            Ok(removed)
        })
    }

    pub fn delete_all_in_tenant(&self, tenant: Uuid) -> Result<usize, LoomError> {
        self.ctx.mutate(tenant, |cascade| {
            let mut removed = 0;
            for guid in cascade.keys(RecordKind::Credential, Uuid::nil())? {
                removed += usize::from(cascade.credential(guid)?.is_some());
            }
            Ok(removed)
        })
    }
}

fn validate_credential(credential: &Credential) -> Result<(), LoomError> {
    require_guid(credential.tenant_guid, "tenant")?;
    require_guid(credential.user_guid, "user")?;
    require_name(&credential.bearer_token, "bearer token")
}

fn insert_credential(
    cascade: &mut Cascade<'_>,
    mut credential: Credential,
) -> Result<Credential, LoomError> {
    validate_credential(&credential)?;
    assign_guid(&mut credential.guid);
    let batch = cascade.batch();
    require::<User>(batch, Scope::tenant(credential.tenant_guid), credential.user_guid)?;
    let now = timestamp_now();
    (credential.created_utc, credential.last_update_utc) = (now, now);
    batch.insert(&credential)?;
    batch.link_owned(
        credential.tenant_guid,
        credential.user_guid,
        RecordKind::Credential,
        credential.guid,
    )?;
    reread(batch, credential.tenant_guid, credential.guid)
}
