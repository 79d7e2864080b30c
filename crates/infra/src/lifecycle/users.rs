//! User accounts: creation with an implicit individual tenant, reads,
//! patches and deletion with orphaned-tenant archival.

use chrono::Utc;
use tracing::instrument;

use keyward_auth::authorize::{
    authorize_user_create, authorize_user_delete, authorize_user_read, authorize_user_write, require,
};
use keyward_auth::password::hash_password;
use keyward_auth::user::normalize_email;
use keyward_auth::{
    AccountType, AuthenticatedRequest, GrantMode, Membership, MembershipType, NewUser, OWNER_ROLE,
    Permission, Tenant, TenantType, User, UserPatch,
};
use keyward_core::{DomainError, DomainResult, UserId};

use super::IdentityContext;
use super::credentials::CredentialService;
use crate::notify::{NotificationPurpose, notify_best_effort};

/// A new account together with its individual tenant and owner membership.
#[derive(Debug, Clone)]
pub struct CreatedUser {
    pub user: User,
    pub tenant: Tenant,
    pub membership: Membership,
}

#[derive(Debug, Clone)]
pub struct UserService {
    ctx: IdentityContext,
}

impl UserService {
    pub fn new(ctx: IdentityContext) -> Self {
        Self { ctx }
    }

    /// Create an account on behalf of `actor`.
    ///
    /// The account type comes from the permission family the actor holds,
    /// and every requested role must pass the delegation guard. The new
    /// user owns an individual tenant and receives the requested roles
    /// there in addition to `owner`.
    #[instrument(skip(self, actor, new), fields(actor = %actor.user_id()), err)]
    pub async fn create_user(&self, actor: &AuthenticatedRequest, new: NewUser) -> DomainResult<CreatedUser> {
        let email = normalize_email(&new.email)?;
        let name = new.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("name must not be empty"));
        }
        let roles = self.ctx.known_roles(&new.roles)?;
        let account_type = authorize_user_create(actor, new.account_type, &roles)?;

        let now = Utc::now();
        let mut user = User::new(&email, name, account_type, now)?;
        if let Some(password) = new.password.as_deref() {
            user = user.with_password_hash(hash_password(password)?);
        }
        let tenant = Tenant::new(&email, TenantType::Individual, now)?;
        let mut membership_roles = roles;
        membership_roles.insert(OWNER_ROLE);
        let membership = Membership::active(tenant.id, user.id, MembershipType::Owner, membership_roles, now)?;

        // Nothing fallible may follow the account write.
        let welcome = match account_type {
            AccountType::Regular => Some(
                CredentialService::new(self.ctx.clone())
                    .reset_notification(&user, NotificationPurpose::NewUser)?,
            ),
            AccountType::Service => None,
        };

        self.ctx
            .deadline
            .run("insert_account", self.ctx.store.insert_account(&user, &tenant, &membership))
            .await?;
        tracing::info!(user_id = %user.id, tenant_id = %tenant.id, account_type = account_type.as_str(), "user created");

        if let Some(welcome) = welcome {
            notify_best_effort(self.ctx.notifier.as_ref(), welcome).await;
        }

        Ok(CreatedUser {
            user,
            tenant,
            membership,
        })
    }

    #[instrument(skip(self, actor), fields(actor = %actor.user_id()), err)]
    pub async fn get_user(&self, actor: &AuthenticatedRequest, id: UserId) -> DomainResult<User> {
        let user = self.ctx.user(id).await?;
        authorize_user_read(actor, &user)?;
        Ok(user)
    }

    /// Patch name, verification flag or account type.
    ///
    /// Changing the verification flag is an administrative action: the
    /// self-scoped write permission does not cover it.
    #[instrument(skip(self, actor, patch), fields(actor = %actor.user_id()), err)]
    pub async fn update_user(
        &self,
        actor: &AuthenticatedRequest,
        id: UserId,
        patch: UserPatch,
    ) -> DomainResult<User> {
        if patch.is_empty() {
            return Err(DomainError::validation("empty user patch"));
        }
        let user = self.ctx.user(id).await?;
        let account_type = authorize_user_write(actor, &user, patch.account_type)?;
        if patch.email_verified.is_some() {
            let admin = match account_type {
                AccountType::Regular => [Permission::UsersFullControl, Permission::UsersWrite],
                AccountType::Service => [
                    Permission::UsersFullControlService,
                    Permission::UsersWriteService,
                ],
            };
            require(actor, &admin, GrantMode::Any)?;
        }
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(DomainError::validation("name must not be empty"));
            }
        }

        self.ctx
            .deadline
            .run("update_user", self.ctx.store.update_user(id, &patch))
            .await
    }

    /// Delete the account, then archive every individual tenant it was the
    /// sole member of.
    ///
    /// If any archival fails the deletion is reported failed, although the
    /// user record is already gone.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id()), err)]
    pub async fn delete_user(&self, actor: &AuthenticatedRequest, id: UserId) -> DomainResult<()> {
        let user = self.ctx.user(id).await?;
        authorize_user_delete(actor, &user)?;

        let candidates: Vec<_> = self
            .ctx
            .deadline
            .run("tenants_sole_member", self.ctx.store.tenants_sole_member(id))
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();

        self.ctx.deadline.run("delete_user", self.ctx.store.delete_user(id)).await?;
        tracing::info!(user_id = %id, "user deleted");

        self.ctx.archive_orphaned(candidates).await.map(|_| ())
    }
}
