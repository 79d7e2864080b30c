//! Service-account API keys.

use chrono::Utc;
use tracing::instrument;

use keyward_auth::authorize::{authorize_api_key_read, authorize_api_key_write};
use keyward_auth::{ApiKey, ApiKeyClaims, AuthenticatedRequest, IssuedToken};
use keyward_core::{ApiKeyId, DomainError, DomainResult, TenantId, UserId};

use super::IdentityContext;

/// A stored key and the bearer credential naming it.
#[derive(Debug, Clone)]
pub struct IssuedApiKey {
    pub key: ApiKey,
    pub credential: IssuedToken,
}

#[derive(Debug, Clone)]
pub struct ApiKeyService {
    ctx: IdentityContext,
}

impl ApiKeyService {
    pub fn new(ctx: IdentityContext) -> Self {
        Self { ctx }
    }

    /// Issue a key for service account `user`, acting within `tenant`.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id()), err)]
    pub async fn issue_key(
        &self,
        actor: &AuthenticatedRequest,
        user: UserId,
        tenant: TenantId,
    ) -> DomainResult<IssuedApiKey> {
        authorize_api_key_write(actor, user)?;
        let owner = self.ctx.user(user).await?;
        if !owner.is_service() {
            return Err(DomainError::validation("API keys are issued to service accounts only"));
        }
        match self.ctx.membership(tenant, user).await {
            Ok(m) if m.is_active() => {}
            Ok(_) | Err(DomainError::NotFound) => {
                return Err(DomainError::validation(
                    "service account has no active membership in tenant",
                ));
            }
            Err(err) => return Err(err),
        }

        let key = ApiKey::new(user, tenant, Utc::now());
        self.ctx.deadline.run("insert_key", self.ctx.store.insert_key(&key)).await?;
        let credential = self.ctx.tokens.issue_for(user, &ApiKeyClaims { api_key: key.id })?;
        tracing::info!(api_key = %key.id, user_id = %user, tenant_id = %tenant, "API key issued");
        Ok(IssuedApiKey { key, credential })
    }

    #[instrument(skip(self, actor), fields(actor = %actor.user_id()), err)]
    pub async fn get_key(&self, actor: &AuthenticatedRequest, id: ApiKeyId) -> DomainResult<ApiKey> {
        let key = self.ctx.deadline.run("get_key", self.ctx.store.get_key(id)).await?;
        authorize_api_key_read(actor, key.user_id)?;
        Ok(key)
    }

    #[instrument(skip(self, actor), fields(actor = %actor.user_id()), err)]
    pub async fn list_keys(&self, actor: &AuthenticatedRequest, user: UserId) -> DomainResult<Vec<ApiKey>> {
        authorize_api_key_read(actor, user)?;
        self.ctx.deadline.run("user_keys", self.ctx.store.user_keys(user)).await
    }

    /// Revoked keys stop authenticating on the next request.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id()), err)]
    pub async fn revoke_key(&self, actor: &AuthenticatedRequest, id: ApiKeyId) -> DomainResult<()> {
        let key = self.ctx.deadline.run("get_key", self.ctx.store.get_key(id)).await?;
        authorize_api_key_write(actor, key.user_id)?;
        self.ctx.deadline.run("delete_key", self.ctx.store.delete_key(id)).await?;
        tracing::info!(api_key = %id, "API key revoked");
        Ok(())
    }
}
