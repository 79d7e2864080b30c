//! Tenant membership state machine.
//!
//! ```text
//!            invite                 accept (idempotent)
//! (absent) ─────────▶ Invited ─────────────────────────▶ Active
//!                       │  ▲                               │
//!                       │  └── re-invite: new terms+token  │
//!                       └──────────── delete ◀─────────────┘
//! ```
//!
//! Status never moves backwards. Removing a membership can leave an
//! individual tenant without active members; such tenants are archived.

use chrono::Utc;
use tracing::instrument;

use keyward_auth::authorize::{
    authorize_membership_delete, authorize_membership_invite, authorize_membership_patch,
    authorize_tenant_memberships_read, authorize_user_memberships_read,
};
use keyward_auth::{
    AcceptOutcome, AuthenticatedRequest, IssuedToken, Membership, MembershipPatch,
    MembershipStatus, MembershipType, RoleSet, TenantInviteClaims, TokenPurpose,
};
use keyward_core::{DomainError, DomainResult, TenantId, UserId};

use super::{IdentityContext, not_found_as};
use crate::notify::{Notification, NotificationPurpose, notify_best_effort};

/// An invited membership and the capability that completes it.
#[derive(Debug, Clone)]
pub struct Invitation {
    pub membership: Membership,
    pub invite: IssuedToken,
}

#[derive(Debug, Clone)]
pub struct MembershipService {
    ctx: IdentityContext,
}

impl MembershipService {
    pub fn new(ctx: IdentityContext) -> Self {
        Self { ctx }
    }

    /// Invite `user` into `tenant` with `roles` (the default role when empty).
    ///
    /// Re-inviting a still-invited user replaces the pending roles and type
    /// and sends a fresh token; any other existing membership fails with
    /// `MembershipExists`.
    #[instrument(
        skip(self, actor, roles),
        fields(actor = %actor.user_id(), tenant_id = %tenant, user_id = %user),
        err
    )]
    pub async fn invite(
        &self,
        actor: &AuthenticatedRequest,
        tenant: TenantId,
        user: UserId,
        roles: &RoleSet,
        membership_type: MembershipType,
    ) -> DomainResult<Invitation> {
        let roles = self.ctx.known_roles(roles)?;
        authorize_membership_invite(actor, tenant, &roles)?;

        let target_tenant = self.ctx.tenant(tenant).await?;
        if target_tenant.archived {
            return Err(DomainError::validation("tenant is archived"));
        }
        let invitee = self.ctx.user(user).await?;

        let membership = match self.ctx.membership(tenant, user).await {
            Ok(mut existing) if existing.status == MembershipStatus::Invited => {
                // Roles being replaced need delegation rights as well.
                let replaced: RoleSet = existing.roles.union(&roles).cloned().collect();
                authorize_membership_invite(actor, tenant, &replaced)?;
                if existing.reinvite(membership_type, roles, Utc::now())? {
                    self.ctx
                        .deadline
                        .run("update_membership", self.ctx.store.update_membership(&existing))
                        .await?;
                }
                tracing::info!("membership already invited; resending token");
                existing
            }
            Ok(_) => return Err(DomainError::MembershipExists),
            Err(DomainError::NotFound) => {
                let invited = Membership::invited(tenant, user, membership_type, roles, Utc::now())?;
                self.ctx
                    .deadline
                    .run("create_membership", self.ctx.store.create_membership(&invited))
                    .await?;
                invited
            }
            Err(err) => return Err(err),
        };

        let invite = self
            .ctx
            .tokens
            .issue_for(user, &TenantInviteClaims { tenant_invite: tenant })?;
        let link = self.ctx.tokens.settings(TokenPurpose::TenantInvite)?.audience.clone();
        notify_best_effort(
            self.ctx.notifier.as_ref(),
            Notification::new(NotificationPurpose::TenantInvite, &invitee)
                .with_token(invite.token.clone(), invite.max_age, link)
                .for_tenant(tenant),
        )
        .await;

        Ok(Invitation { membership, invite })
    }

    /// Consume an invite credential.
    ///
    /// Accepting an already active membership is a successful no-op.
    #[instrument(skip(self, token), err)]
    pub async fn accept(&self, token: &str) -> DomainResult<(Membership, AcceptOutcome)> {
        let verified = self.ctx.tokens.verify_for::<TenantInviteClaims>(token)?;
        let tenant = verified.custom.tenant_invite;
        let mut membership = self
            .ctx
            .membership(tenant, verified.subject())
            .await
            .map_err(|e| not_found_as(e, DomainError::InvalidToken))?;

        let outcome = membership.accept(Utc::now());
        if outcome == AcceptOutcome::Activated {
            self.ctx
                .deadline
                .run("update_membership", self.ctx.store.update_membership(&membership))
                .await?;
            tracing::info!(tenant_id = %tenant, user_id = %membership.user_id, "invitation accepted");
        }
        Ok((membership, outcome))
    }

    /// Add/remove roles or change the membership type.
    ///
    /// Every role named in the patch, added or removed, must be delegable by
    /// the actor.
    #[instrument(
        skip(self, actor, patch),
        fields(actor = %actor.user_id(), tenant_id = %tenant, user_id = %user),
        err
    )]
    pub async fn update_membership(
        &self,
        actor: &AuthenticatedRequest,
        tenant: TenantId,
        user: UserId,
        patch: &MembershipPatch,
    ) -> DomainResult<Membership> {
        let current = self.ctx.membership(tenant, user).await?;
        authorize_membership_patch(actor, &current, patch)?;
        if !patch.add_roles.is_empty() {
            self.ctx.known_roles(&patch.add_roles)?;
        }

        let owners = self
            .ctx
            .deadline
            .run("tenant_memberships", self.ctx.store.tenant_memberships(tenant))
            .await?
            .iter()
            .filter(|m| m.is_owner())
            .count();
        let next = patch.apply(&current, owners, Utc::now())?;

        self.ctx
            .deadline
            .run("update_membership", self.ctx.store.update_membership(&next))
            .await?;
        Ok(next)
    }

    /// Remove a membership, then archive any individual tenant of the user
    /// that no longer has an active member.
    #[instrument(
        skip(self, actor),
        fields(actor = %actor.user_id(), tenant_id = %tenant, user_id = %user),
        err
    )]
    pub async fn delete_membership(
        &self,
        actor: &AuthenticatedRequest,
        tenant: TenantId,
        user: UserId,
    ) -> DomainResult<()> {
        let target = self.ctx.membership(tenant, user).await?;
        authorize_membership_delete(actor, &target)?;

        self.ctx
            .deadline
            .run("delete_membership", self.ctx.store.delete_membership(tenant, user))
            .await?;

        let mut candidates = vec![tenant];
        candidates.extend(
            self.ctx
                .deadline
                .run("tenants_sole_member", self.ctx.store.tenants_sole_member(user))
                .await?
                .into_iter()
                .map(|t| t.id)
                .filter(|id| *id != tenant),
        );
        self.ctx.archive_orphaned(candidates).await.map(|_| ())
    }

    #[instrument(skip(self, actor), fields(actor = %actor.user_id()), err)]
    pub async fn list_tenant_memberships(
        &self,
        actor: &AuthenticatedRequest,
        tenant: TenantId,
    ) -> DomainResult<Vec<Membership>> {
        authorize_tenant_memberships_read(actor, tenant)?;
        self.ctx
            .deadline
            .run("tenant_memberships", self.ctx.store.tenant_memberships(tenant))
            .await
    }

    #[instrument(skip(self, actor), fields(actor = %actor.user_id()), err)]
    pub async fn list_user_memberships(
        &self,
        actor: &AuthenticatedRequest,
        user: UserId,
    ) -> DomainResult<Vec<Membership>> {
        authorize_user_memberships_read(actor, user)?;
        self.ctx
            .deadline
            .run("user_memberships", self.ctx.store.user_memberships(user))
            .await
    }
}
