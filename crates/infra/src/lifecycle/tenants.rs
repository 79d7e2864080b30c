//! Organization tenants.

use chrono::Utc;
use tracing::instrument;

use keyward_auth::authorize::{authorize_tenant_create, authorize_tenant_read, authorize_tenant_write};
use keyward_auth::tenant::validate_tenant_name;
use keyward_auth::{AuthenticatedRequest, Membership, MembershipType, OWNER_ROLE, Tenant, TenantType};
use keyward_core::{DomainResult, TenantId};

use super::IdentityContext;

#[derive(Debug, Clone)]
pub struct TenantService {
    ctx: IdentityContext,
}

impl TenantService {
    pub fn new(ctx: IdentityContext) -> Self {
        Self { ctx }
    }

    /// Create an organization tenant owned by `actor`.
    #[instrument(skip(self, actor, name), fields(actor = %actor.user_id()), err)]
    pub async fn create_tenant(
        &self,
        actor: &AuthenticatedRequest,
        name: &str,
    ) -> DomainResult<(Tenant, Membership)> {
        authorize_tenant_create(actor)?;
        let now = Utc::now();
        let tenant = Tenant::new(name, TenantType::Organization, now)?;
        let owner = Membership::active(
            tenant.id,
            actor.user_id(),
            MembershipType::Owner,
            [OWNER_ROLE].into_iter().collect(),
            now,
        )?;

        self.ctx
            .deadline
            .run(
                "insert_tenant_with_owner",
                self.ctx.store.insert_tenant_with_owner(&tenant, &owner),
            )
            .await?;
        tracing::info!(tenant_id = %tenant.id, "tenant created");
        Ok((tenant, owner))
    }

    #[instrument(skip(self, actor), fields(actor = %actor.user_id()), err)]
    pub async fn get_tenant(&self, actor: &AuthenticatedRequest, id: TenantId) -> DomainResult<Tenant> {
        let tenant = self.ctx.tenant(id).await?;
        authorize_tenant_read(actor, &tenant)?;
        Ok(tenant)
    }

    #[instrument(skip(self, actor, name), fields(actor = %actor.user_id()), err)]
    pub async fn rename_tenant(
        &self,
        actor: &AuthenticatedRequest,
        id: TenantId,
        name: &str,
    ) -> DomainResult<Tenant> {
        authorize_tenant_write(actor, id)?;
        let name = validate_tenant_name(name)?;
        self.ctx
            .deadline
            .run("rename_tenant", self.ctx.store.rename_tenant(id, &name))
            .await
    }

    /// Archive the tenant and drop its memberships.
    ///
    /// Membership removal continues past failures; the first one is returned.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id()), err)]
    pub async fn archive_tenant(&self, actor: &AuthenticatedRequest, id: TenantId) -> DomainResult<()> {
        authorize_tenant_write(actor, id)?;
        self.ctx
            .deadline
            .run("archive_tenant", self.ctx.store.archive_tenant(id))
            .await?;

        let members = self
            .ctx
            .deadline
            .run("tenant_memberships", self.ctx.store.tenant_memberships(id))
            .await?;
        let mut first_error = None;
        for member in members {
            let removed = self
                .ctx
                .deadline
                .run("delete_membership", self.ctx.store.delete_membership(id, member.user_id))
                .await;
            if let Err(err) = removed {
                tracing::error!(tenant_id = %id, user_id = %member.user_id, error = %err, "membership cascade failed");
                first_error.get_or_insert(err);
            }
        }
        tracing::info!(tenant_id = %id, "tenant archived");
        first_error.map_or(Ok(()), Err)
    }
}
