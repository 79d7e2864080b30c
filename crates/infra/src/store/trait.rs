use async_trait::async_trait;

use keyward_auth::{ApiKey, Membership, Tenant, User, UserPatch};
use keyward_core::{ApiKeyId, DomainResult, ExpectedGeneration, TenantId, UserId};

/// Change applied together with a generation bump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardedChange {
    /// New password hash; bumps `password_gen` and marks the email verified
    /// (only the mailbox owner can complete a reset).
    Password { hash: String },
    /// New email address; bumps `email_gen` and marks the email verified.
    Email { email: String },
}

/// Outcome of a guarded update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardedUpdate {
    pub user: User,
    /// Address held before an email change.
    pub previous_email: Option<String>,
}

/// User records.
///
/// Implementations translate backend failures into domain errors: a taken
/// email is `Conflict`, a missing row is `NotFound`, a deadline is
/// `Unavailable`.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert_user(&self, user: &User) -> DomainResult<()>;

    /// Provision a new account atomically: the user, its individual tenant
    /// and the owner membership are all written or none is.
    async fn insert_account(
        &self,
        user: &User,
        tenant: &Tenant,
        owner: &Membership,
    ) -> DomainResult<()>;

    async fn get_user(&self, id: UserId) -> DomainResult<User>;

    async fn get_user_by_email(&self, email: &str) -> DomainResult<User>;

    async fn update_user(&self, id: UserId, patch: &UserPatch) -> DomainResult<User>;

    /// Single conditional update: apply `change` and bump the matching
    /// generation only if it still equals `expected`. Zero rows affected means
    /// a concurrent change won; that is reported as `GenerationConflict`. A
    /// taken address on an email change stays a plain `Conflict`.
    async fn update_user_generation_guarded(
        &self,
        id: UserId,
        change: GuardedChange,
        expected: ExpectedGeneration,
    ) -> DomainResult<GuardedUpdate>;

    /// Removes the user together with its memberships and API keys.
    async fn delete_user(&self, id: UserId) -> DomainResult<()>;

    async fn count_users(&self) -> DomainResult<u64>;
}

#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn insert_tenant(&self, tenant: &Tenant) -> DomainResult<()>;

    /// Insert a tenant together with its first owner membership, atomically.
    async fn insert_tenant_with_owner(&self, tenant: &Tenant, owner: &Membership) -> DomainResult<()>;

    async fn get_tenant(&self, id: TenantId) -> DomainResult<Tenant>;

    async fn rename_tenant(&self, id: TenantId, name: &str) -> DomainResult<Tenant>;

    /// Soft delete. Archiving an archived tenant is a no-op.
    async fn archive_tenant(&self, id: TenantId) -> DomainResult<()>;

    /// Non-archived tenants in which `user` is the only member.
    async fn tenants_sole_member(&self, user: UserId) -> DomainResult<Vec<Tenant>>;
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn get_membership(&self, tenant: TenantId, user: UserId) -> DomainResult<Membership>;

    /// A second membership for the same pair fails with `MembershipExists`.
    async fn create_membership(&self, membership: &Membership) -> DomainResult<()>;

    /// Persist type, status and roles of an existing membership.
    async fn update_membership(&self, membership: &Membership) -> DomainResult<()>;

    async fn delete_membership(&self, tenant: TenantId, user: UserId) -> DomainResult<()>;

    async fn tenant_memberships(&self, tenant: TenantId) -> DomainResult<Vec<Membership>>;

    async fn user_memberships(&self, user: UserId) -> DomainResult<Vec<Membership>>;
}

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn insert_key(&self, key: &ApiKey) -> DomainResult<()>;

    async fn get_key(&self, id: ApiKeyId) -> DomainResult<ApiKey>;

    async fn user_keys(&self, user: UserId) -> DomainResult<Vec<ApiKey>>;

    async fn delete_key(&self, id: ApiKeyId) -> DomainResult<()>;
}

/// Everything the lifecycle services need from storage.
pub trait IdentityStore: UserStore + TenantStore + MembershipStore + ApiKeyStore {}

impl<S> IdentityStore for S where S: UserStore + TenantStore + MembershipStore + ApiKeyStore {}
