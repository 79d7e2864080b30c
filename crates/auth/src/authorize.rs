//! Authorization decision points.
//!
//! Each function combines the caller's grant, the delegation guard and the
//! membership context to allow or deny one operation. They perform no IO: the
//! caller loads the records involved and passes them in.
//!
//! - No IO
//! - No caching (decisions use the request's own snapshot)
//! - Denial is the default

use keyward_core::{DomainError, DomainResult, TenantId, UserId};

use crate::account_type::{Acting, PermissionFamily, USERS_CREATE, USERS_READ, USERS_WRITE, resolve_account_type};
use crate::delegation::require_delegation;
use crate::enforcer::{GrantMode, check_permission};
use crate::membership::{Membership, MembershipPatch};
use crate::permissions::Permission;
use crate::principal::AuthenticatedRequest;
use crate::roles::RoleSet;
use crate::tenant::Tenant;
use crate::user::{AccountType, User};

/// Fail with `Forbidden` unless `required` is satisfied in `mode`.
pub fn require(actor: &AuthenticatedRequest, required: &[Permission], mode: GrantMode) -> DomainResult<()> {
    if check_permission(&actor.grant, required, mode) {
        return Ok(());
    }
    let names: Vec<String> = required.iter().map(ToString::to_string).collect();
    Err(DomainError::forbidden(format!("missing permission: {}", names.join(" | "))))
}

/// `base` plus the self-scoped variant when the actor is the subject.
fn with_self(mut base: Vec<Permission>, self_scoped: Permission, is_self: bool) -> Vec<Permission> {
    if is_self {
        base.push(self_scoped);
    }
    base
}

fn acting(actor: &AuthenticatedRequest, is_self: bool) -> Acting<'_> {
    Acting {
        grant: &actor.grant,
        account_type: actor.account_type(),
        is_self,
    }
}

fn full_control_for(account_type: AccountType) -> Permission {
    match account_type {
        AccountType::Regular => Permission::UsersFullControl,
        AccountType::Service => Permission::UsersFullControlService,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

fn authorize_user(
    actor: &AuthenticatedRequest,
    family: &PermissionFamily,
    target: &User,
    requested: Option<AccountType>,
) -> DomainResult<AccountType> {
    resolve_account_type(
        acting(actor, actor.is_self(target.id)),
        family,
        requested,
        Some(target.account_type),
    )
}

pub fn authorize_user_read(actor: &AuthenticatedRequest, target: &User) -> DomainResult<()> {
    authorize_user(actor, &USERS_READ, target, None).map(|_| ())
}

pub fn authorize_user_write(
    actor: &AuthenticatedRequest,
    target: &User,
    requested: Option<AccountType>,
) -> DomainResult<AccountType> {
    authorize_user(actor, &USERS_WRITE, target, requested)
}

/// User creation: resolves the new account's type and runs the delegation
/// guard over the roles it will receive.
pub fn authorize_user_create(
    actor: &AuthenticatedRequest,
    requested: Option<AccountType>,
    roles: &RoleSet,
) -> DomainResult<AccountType> {
    let account_type = resolve_account_type(acting(actor, false), &USERS_CREATE, requested, None)?;
    require_delegation(&actor.grant, roles, &full_control_for(account_type))?;
    Ok(account_type)
}

/// Deleting a user removes every membership, so it needs full control over
/// the account family.
pub fn authorize_user_delete(actor: &AuthenticatedRequest, target: &User) -> DomainResult<()> {
    let full = full_control_for(target.account_type);
    if actor.is_self(target.id) {
        return require(actor, &[full, Permission::UsersWriteSelf], GrantMode::Any);
    }
    require(actor, &[full], GrantMode::Any)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tenants
// ─────────────────────────────────────────────────────────────────────────────

pub fn authorize_tenant_create(actor: &AuthenticatedRequest) -> DomainResult<()> {
    require(
        actor,
        &[Permission::TenantsFullControl, Permission::TenantsCreate],
        GrantMode::Any,
    )
}

pub fn authorize_tenant_read(actor: &AuthenticatedRequest, tenant: &Tenant) -> DomainResult<()> {
    let mut perms = vec![Permission::TenantsFullControl, Permission::TenantsRead];
    if actor.is_member_of(tenant.id) {
        perms.push(Permission::TenantsReadOwned);
    }
    require(actor, &perms, GrantMode::Any)
}

/// Full control, tenant-wide write, or owner-scoped write on the actor's own
/// tenant.
pub fn authorize_tenant_write(actor: &AuthenticatedRequest, tenant: TenantId) -> DomainResult<()> {
    let mut perms = vec![Permission::TenantsFullControl, Permission::TenantsWrite];
    if actor.owns(tenant) {
        perms.push(Permission::TenantsWriteOwned);
    }
    require(actor, &perms, GrantMode::Any)
}

// ─────────────────────────────────────────────────────────────────────────────
// Memberships
// ─────────────────────────────────────────────────────────────────────────────

pub fn authorize_membership_invite(
    actor: &AuthenticatedRequest,
    tenant: TenantId,
    roles: &RoleSet,
) -> DomainResult<()> {
    authorize_tenant_write(actor, tenant)?;
    require_delegation(&actor.grant, roles, &Permission::TenantsFullControl)
}

pub fn authorize_membership_patch(
    actor: &AuthenticatedRequest,
    target: &Membership,
    patch: &MembershipPatch,
) -> DomainResult<()> {
    authorize_tenant_write(actor, target.tenant_id)?;
    require_delegation(&actor.grant, &patch.touched_roles(), &Permission::TenantsFullControl)
}

/// Self-removal is always allowed; otherwise the same rights as a patch.
pub fn authorize_membership_delete(actor: &AuthenticatedRequest, target: &Membership) -> DomainResult<()> {
    if actor.is_self(target.user_id) {
        return Ok(());
    }
    authorize_tenant_write(actor, target.tenant_id)
}

pub fn authorize_tenant_memberships_read(actor: &AuthenticatedRequest, tenant: TenantId) -> DomainResult<()> {
    let mut perms = vec![Permission::TenantsFullControl, Permission::TenantsRead];
    if actor.is_member_of(tenant) {
        perms.push(Permission::TenantsReadOwned);
    }
    require(actor, &perms, GrantMode::Any)
}

pub fn authorize_user_memberships_read(actor: &AuthenticatedRequest, user: UserId) -> DomainResult<()> {
    let perms = with_self(
        vec![
            Permission::TenantsFullControl,
            Permission::UsersFullControl,
            Permission::TenantsRead,
            Permission::UsersRead,
        ],
        Permission::UsersReadSelf,
        actor.is_self(user),
    );
    require(actor, &perms, GrantMode::Any)
}

// ─────────────────────────────────────────────────────────────────────────────
// API keys
// ─────────────────────────────────────────────────────────────────────────────

pub fn authorize_api_key_write(actor: &AuthenticatedRequest, owner: UserId) -> DomainResult<()> {
    let perms = with_self(
        vec![Permission::UsersFullControlService, Permission::ApiKeysWrite],
        Permission::UsersWriteSelf,
        actor.is_self(owner),
    );
    require(actor, &perms, GrantMode::Any)
}

pub fn authorize_api_key_read(actor: &AuthenticatedRequest, owner: UserId) -> DomainResult<()> {
    let perms = with_self(
        vec![Permission::UsersFullControlService, Permission::ApiKeysRead],
        Permission::UsersReadSelf,
        actor.is_self(owner),
    );
    require(actor, &perms, GrantMode::Any)
}
