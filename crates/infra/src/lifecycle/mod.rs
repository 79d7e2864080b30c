//! Lifecycle services: the operations the transport layer calls.
//!
//! Each service composes the pure decision points from `keyward-auth` with
//! the storage, token and notification boundaries. One request flows like
//! this:
//!
//! ```text
//! bearer token
//!   ↓
//! 1. Verify signature, algorithm, expiry and audience (TokenFactory)
//!   ↓
//! 2. Load user + membership named by the credential (IdentityStore)
//!   ↓
//! 3. Resolve the membership's roles into a grant (Enforcer)
//!   ↓
//! 4. Decision point for the operation (+ delegation guard)
//!   ↓
//! 5. Storage mutation, each call under the request deadline
//!   ↓
//! 6. Best-effort notification
//! ```
//!
//! Nothing is cached between requests: every decision reads its own
//! snapshot, so role changes apply on the next request.

pub mod api_keys;
pub mod bootstrap;
pub mod credentials;
pub mod memberships;
pub mod tenants;
pub mod users;

pub use api_keys::{ApiKeyService, IssuedApiKey};
pub use bootstrap::bootstrap_admin;
pub use credentials::{CredentialService, LoginSession};
pub use memberships::{Invitation, MembershipService};
pub use tenants::TenantService;
pub use users::{CreatedUser, UserService};

use std::sync::Arc;

use keyward_auth::{Enforcer, Membership, RoleCatalogue, RoleSet, Tenant, TokenFactory, User};
use keyward_core::{DomainError, DomainResult, TenantId, UserId};

use crate::config::ServiceConfig;
use crate::deadline::Deadline;
use crate::notify::Notifier;
use crate::store::IdentityStore;

/// Shared collaborators of every lifecycle service. Cheap to clone.
#[derive(Clone)]
pub struct IdentityContext {
    pub store: Arc<dyn IdentityStore>,
    pub enforcer: Enforcer,
    pub tokens: TokenFactory,
    pub notifier: Arc<dyn Notifier>,
    pub deadline: Deadline,
}

impl core::fmt::Debug for IdentityContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IdentityContext")
            .field("tokens", &self.tokens)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl IdentityContext {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        enforcer: Enforcer,
        tokens: TokenFactory,
        notifier: Arc<dyn Notifier>,
        deadline: Deadline,
    ) -> Self {
        Self {
            store,
            enforcer,
            tokens,
            notifier,
            deadline,
        }
    }

    /// Wire a context from configuration.
    pub fn from_config(
        config: &ServiceConfig,
        store: Arc<dyn IdentityStore>,
        notifier: Arc<dyn Notifier>,
    ) -> DomainResult<Self> {
        let catalogue = Arc::new(config.catalogue()?);
        Ok(Self::new(
            store,
            Enforcer::new(catalogue),
            config.token_factory()?,
            notifier,
            config.deadline(),
        ))
    }

    pub fn catalogue(&self) -> &RoleCatalogue {
        self.enforcer.catalogue()
    }

    pub(crate) async fn user(&self, id: UserId) -> DomainResult<User> {
        self.deadline.run("get_user", self.store.get_user(id)).await
    }

    pub(crate) async fn tenant(&self, id: TenantId) -> DomainResult<Tenant> {
        self.deadline.run("get_tenant", self.store.get_tenant(id)).await
    }

    pub(crate) async fn membership(&self, tenant: TenantId, user: UserId) -> DomainResult<Membership> {
        self.deadline
            .run("get_membership", self.store.get_membership(tenant, user))
            .await
    }

    /// Every role must be declared in the catalogue; an empty set becomes the
    /// catalogue's default role.
    pub(crate) fn known_roles(&self, roles: &RoleSet) -> DomainResult<RoleSet> {
        if roles.is_empty() {
            return Ok([self.catalogue().default_role().clone()].into_iter().collect());
        }
        if let Some(unknown) = roles.iter().find(|r| !self.catalogue().contains_role(r)) {
            return Err(DomainError::validation(format!("unknown role '{unknown}'")));
        }
        Ok(roles.clone())
    }

    /// Archive every individual tenant among `candidates` that has no active
    /// membership left.
    ///
    /// Keeps going after a failure and returns the first error once every
    /// candidate was tried.
    pub(crate) async fn archive_orphaned(
        &self,
        candidates: impl IntoIterator<Item = TenantId>,
    ) -> DomainResult<Vec<TenantId>> {
        let mut archived = Vec::new();
        let mut first_error = None;

        for tenant_id in candidates {
            match self.archive_if_orphaned(tenant_id).await {
                Ok(true) => archived.push(tenant_id),
                Ok(false) => {}
                Err(err) => {
                    tracing::error!(tenant_id = %tenant_id, error = %err, "orphaned tenant archival failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(archived),
        }
    }

    async fn archive_if_orphaned(&self, tenant_id: TenantId) -> DomainResult<bool> {
        let tenant = match self.tenant(tenant_id).await {
            Ok(tenant) => tenant,
            Err(DomainError::NotFound) => return Ok(false),
            Err(err) => return Err(err),
        };
        if !tenant.is_individual() || tenant.archived {
            return Ok(false);
        }

        let members = self
            .deadline
            .run("tenant_memberships", self.store.tenant_memberships(tenant_id))
            .await?;
        if members.iter().any(Membership::is_active) {
            return Ok(false);
        }

        self.deadline
            .run("archive_tenant", self.store.archive_tenant(tenant_id))
            .await?;
        tracing::info!(tenant_id = %tenant_id, "archived orphaned individual tenant");
        Ok(true)
    }
}

/// Storage `NotFound` on a record named by a credential means the credential
/// no longer refers to anything.
pub(crate) fn not_found_as(err: DomainError, replacement: DomainError) -> DomainError {
    match err {
        DomainError::NotFound => replacement,
        other => other,
    }
}
