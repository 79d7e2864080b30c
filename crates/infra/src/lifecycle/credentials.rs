//! Login, session refresh, request authentication and the generation-bound
//! password-reset and email-change flows.

use tracing::instrument;

use keyward_auth::authorize::authorize_user_write;
use keyward_auth::password::{hash_password, verify_password};
use keyward_auth::user::normalize_email;
use keyward_auth::{
    AccessClaims, AuthenticatedRequest, EmailUpdateClaims, IssuedToken, Membership,
    MembershipStatus, PasswordResetClaims, SessionClaims, TokenPurpose, User,
};
use keyward_core::{DomainError, DomainResult, ExpectedGeneration, TenantId, UserId};

use super::{IdentityContext, not_found_as};
use crate::notify::{Notification, NotificationPurpose, notify_best_effort};
use crate::store::GuardedChange;

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginSession {
    pub user: User,
    pub membership: Membership,
    pub session: IssuedToken,
}

#[derive(Debug, Clone)]
pub struct CredentialService {
    ctx: IdentityContext,
}

impl CredentialService {
    pub fn new(ctx: IdentityContext) -> Self {
        Self { ctx }
    }

    /// Password login into `tenant`, or into the user's default tenant.
    ///
    /// The default is the user's active owner membership of an individual
    /// tenant, else the first active membership. An invited-only membership
    /// never yields a session.
    #[instrument(skip(self, email, password), fields(tenant_id = ?tenant), err)]
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        tenant: Option<TenantId>,
    ) -> DomainResult<LoginSession> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(DomainError::Unauthorized);
        }

        let user = self
            .ctx
            .deadline
            .run("get_user_by_email", self.ctx.store.get_user_by_email(email.trim()))
            .await
            .map_err(|e| not_found_as(e, DomainError::Unauthorized))?;
        let Some(hash) = user.password_hash.as_deref() else {
            return Err(DomainError::Unauthorized);
        };
        if !verify_password(password, hash)? {
            tracing::info!(user_id = %user.id, "login rejected: bad password");
            return Err(DomainError::Unauthorized);
        }
        if !user.email_verified {
            return Err(DomainError::forbidden("email address is not verified"));
        }

        let membership = match tenant {
            Some(tenant) => {
                let membership = self
                    .ctx
                    .membership(tenant, user.id)
                    .await
                    .map_err(|e| not_found_as(e, DomainError::Unauthorized))?;
                if membership.status == MembershipStatus::Invited {
                    return Err(DomainError::forbidden("tenant invitation not accepted"));
                }
                membership
            }
            None => self.default_membership(user.id).await?,
        };

        let session = self.issue_session_token(&user, &membership)?;
        tracing::info!(user_id = %user.id, tenant_id = %membership.tenant_id, "login succeeded");
        Ok(LoginSession {
            user,
            membership,
            session,
        })
    }

    async fn default_membership(&self, user: UserId) -> DomainResult<Membership> {
        let active: Vec<Membership> = self
            .ctx
            .deadline
            .run("user_memberships", self.ctx.store.user_memberships(user))
            .await?
            .into_iter()
            .filter(Membership::is_active)
            .collect();

        for membership in active.iter().filter(|m| m.is_owner()) {
            let tenant = self.ctx.tenant(membership.tenant_id).await?;
            if tenant.is_individual() && !tenant.archived {
                return Ok(membership.clone());
            }
        }
        active
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::forbidden("no active tenant membership"))
    }

    /// Session credential snapshotting the membership's roles.
    pub fn issue_session_token(&self, user: &User, membership: &Membership) -> DomainResult<IssuedToken> {
        if !membership.is_active() || membership.user_id != user.id {
            return Err(DomainError::forbidden("membership is not active"));
        }
        let claims = SessionClaims {
            email: user.email.clone(),
            name: user.name.clone(),
            roles: membership.roles.iter().cloned().collect(),
            tenant: membership.tenant_id,
        };
        self.ctx.tokens.issue_for(user.id, &claims)
    }

    /// Re-issue a session with a fresh lifetime. The role snapshot is taken
    /// again from the current membership.
    #[instrument(skip(self, token), err)]
    pub async fn refresh(&self, token: &str) -> DomainResult<IssuedToken> {
        let verified = self.ctx.tokens.verify_for::<SessionClaims>(token)?;
        let user = self
            .ctx
            .user(verified.subject())
            .await
            .map_err(|e| not_found_as(e, DomainError::Unauthorized))?;
        let membership = self
            .ctx
            .membership(verified.custom.tenant, user.id)
            .await
            .map_err(|e| not_found_as(e, DomainError::Unauthorized))?;
        if !membership.is_active() {
            return Err(DomainError::forbidden("membership is not active"));
        }

        let settings = self.ctx.tokens.settings(TokenPurpose::Refresh)?;
        let claims = SessionClaims {
            email: user.email.clone(),
            name: user.name.clone(),
            roles: membership.roles.iter().cloned().collect(),
            tenant: membership.tenant_id,
        };
        self.ctx
            .tokens
            .issue(user.id, &settings.audience, &claims, settings.max_age)
    }

    /// Resolve a bearer credential (session or API key) into the caller.
    #[instrument(skip(self, token), err)]
    pub async fn authenticate(&self, token: &str) -> DomainResult<AuthenticatedRequest> {
        let verified = self
            .ctx
            .tokens
            .verify_purpose::<AccessClaims>(token, TokenPurpose::Session)?;
        let user = self
            .ctx
            .user(verified.subject())
            .await
            .map_err(|e| not_found_as(e, DomainError::Unauthorized))?;

        let (tenant, api_key) = match verified.custom {
            AccessClaims::Session(claims) => (claims.tenant, None),
            AccessClaims::ApiKey(claims) => {
                let key = self
                    .ctx
                    .deadline
                    .run("get_key", self.ctx.store.get_key(claims.api_key))
                    .await
                    .map_err(|e| not_found_as(e, DomainError::Unauthorized))?;
                if key.user_id != user.id {
                    return Err(DomainError::Unauthorized);
                }
                if !user.is_service() {
                    return Err(DomainError::forbidden("API keys belong to service accounts"));
                }
                (key.tenant_id, Some(key.id))
            }
        };

        let membership = self
            .ctx
            .membership(tenant, user.id)
            .await
            .map_err(|e| not_found_as(e, DomainError::Unauthorized))?;
        if !membership.is_active() {
            return Err(DomainError::forbidden("membership is not active"));
        }

        let grant = self.ctx.enforcer.resolve(&membership.roles);
        Ok(AuthenticatedRequest {
            user,
            membership,
            grant,
            api_key,
        })
    }

    /// Always succeeds for unknown addresses so callers cannot probe accounts.
    #[instrument(skip(self, email), err)]
    pub async fn request_password_reset(&self, email: &str) -> DomainResult<()> {
        let user = match self
            .ctx
            .deadline
            .run("get_user_by_email", self.ctx.store.get_user_by_email(email.trim()))
            .await
        {
            Ok(user) => user,
            Err(DomainError::NotFound) => {
                tracing::debug!("password reset requested for unknown address");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        self.send_reset(&user, NotificationPurpose::PasswordReset).await
    }

    /// Issue a reset token bound to the current `password_gen` and mail it.
    pub(crate) async fn send_reset(&self, user: &User, purpose: NotificationPurpose) -> DomainResult<()> {
        let notification = self.reset_notification(user, purpose)?;
        notify_best_effort(self.ctx.notifier.as_ref(), notification).await;
        Ok(())
    }

    /// Reset-token notification for `user`, ready to send.
    pub(crate) fn reset_notification(
        &self,
        user: &User,
        purpose: NotificationPurpose,
    ) -> DomainResult<Notification> {
        let issued = self.ctx.tokens.issue_for(
            user.id,
            &PasswordResetClaims {
                r#gen: user.password_gen,
            },
        )?;
        let link = self.ctx.tokens.settings(TokenPurpose::PasswordReset)?.audience.clone();
        Ok(Notification::new(purpose, user).with_token(issued.token, issued.max_age, link))
    }

    /// Set a new password with a reset token.
    ///
    /// The token's generation must equal the stored one, and the change is a
    /// single compare-and-increment, so at most one of several outstanding
    /// tokens can ever be used.
    #[instrument(skip(self, token, new_password), err)]
    pub async fn reset_password(&self, token: &str, new_password: &str) -> DomainResult<User> {
        if new_password.is_empty() {
            return Err(DomainError::validation("password must not be empty"));
        }
        let verified = self.ctx.tokens.verify_for::<PasswordResetClaims>(token)?;
        let user = self
            .ctx
            .user(verified.subject())
            .await
            .map_err(|e| not_found_as(e, DomainError::InvalidToken))?;
        verified.ensure_current(user.password_gen)?;

        let hash = hash_password(new_password)?;
        let update = self
            .ctx
            .deadline
            .run(
                "update_user_generation_guarded",
                self.ctx.store.update_user_generation_guarded(
                    user.id,
                    GuardedChange::Password { hash },
                    ExpectedGeneration(verified.custom.r#gen),
                ),
            )
            .await
            .map_err(superseded)?;
        tracing::info!(user_id = %user.id, password_gen = %update.user.password_gen, "password reset");
        Ok(update.user)
    }

    /// Start an email change for `target`; the confirmation goes to the new
    /// address.
    #[instrument(skip(self, actor, new_email), fields(actor = %actor.user_id(), user_id = %target), err)]
    pub async fn request_email_update(
        &self,
        actor: &AuthenticatedRequest,
        target: UserId,
        new_email: &str,
    ) -> DomainResult<()> {
        let user = self.ctx.user(target).await?;
        authorize_user_write(actor, &user, None)?;
        let email = normalize_email(new_email)?;
        self.ensure_email_free(&email, user.id).await?;

        let issued = self.ctx.tokens.issue_for(
            user.id,
            &EmailUpdateClaims {
                email: email.clone(),
                r#gen: user.email_gen,
            },
        )?;
        let link = self.ctx.tokens.settings(TokenPurpose::EmailUpdate)?.audience.clone();
        notify_best_effort(
            self.ctx.notifier.as_ref(),
            Notification::new(NotificationPurpose::EmailUpdateRequest, &user)
                .to(email)
                .with_token(issued.token, issued.max_age, link),
        )
        .await;
        Ok(())
    }

    /// Apply a confirmed email change and tell the previous address about it.
    #[instrument(skip(self, token), err)]
    pub async fn complete_email_update(&self, token: &str) -> DomainResult<User> {
        let verified = self.ctx.tokens.verify_for::<EmailUpdateClaims>(token)?;
        let user = self
            .ctx
            .user(verified.subject())
            .await
            .map_err(|e| not_found_as(e, DomainError::InvalidToken))?;
        verified.ensure_current(user.email_gen)?;
        self.ensure_email_free(&verified.custom.email, user.id).await?;

        let update = self
            .ctx
            .deadline
            .run(
                "update_user_generation_guarded",
                self.ctx.store.update_user_generation_guarded(
                    user.id,
                    GuardedChange::Email {
                        email: verified.custom.email.clone(),
                    },
                    ExpectedGeneration(verified.custom.r#gen),
                ),
            )
            .await
            .map_err(superseded)?;

        if let Some(previous) = &update.previous_email {
            notify_best_effort(
                self.ctx.notifier.as_ref(),
                Notification::new(NotificationPurpose::EmailUpdated, &update.user).to(previous.clone()),
            )
            .await;
        }
        tracing::info!(user_id = %user.id, email_gen = %update.user.email_gen, "email updated");
        Ok(update.user)
    }

    async fn ensure_email_free(&self, email: &str, owner: UserId) -> DomainResult<()> {
        match self
            .ctx
            .deadline
            .run("get_user_by_email", self.ctx.store.get_user_by_email(email))
            .await
        {
            Ok(existing) if existing.id != owner => Err(DomainError::conflict("email in use")),
            Ok(_) | Err(DomainError::NotFound) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// A lost compare-and-increment means another change consumed the generation
/// first; the presented token is stale.
fn superseded(err: DomainError) -> DomainError {
    match err {
        DomainError::GenerationConflict(msg) => {
            tracing::info!(reason = %msg, "generation-bound token superseded");
            DomainError::TokenExpired
        }
        other => other,
    }
}
