use chrono::Utc;
use tracing::instrument;

use keyward_auth::password::hash_password;
use keyward_auth::user::normalize_email;
use keyward_auth::{
    ADMIN_ROLE, AccountType, Membership, MembershipType, OWNER_ROLE, Tenant, TenantType, User,
};
use keyward_core::{DomainError, DomainResult};

use super::IdentityContext;

/// Create the first administrator when the directory is empty.
///
/// Returns `None` when any user already exists. The administrator is
/// verified and owns its individual tenant with the `admin` role.
#[instrument(skip(ctx, password), err)]
pub async fn bootstrap_admin(
    ctx: &IdentityContext,
    email: &str,
    password: &str,
) -> DomainResult<Option<User>> {
    if !ctx.catalogue().contains_role(&ADMIN_ROLE) {
        return Err(DomainError::validation("role catalogue has no 'admin' role"));
    }
    let existing = ctx.deadline.run("count_users", ctx.store.count_users()).await?;
    if existing > 0 {
        tracing::info!(existing, "directory not empty; skipping admin bootstrap");
        return Ok(None);
    }

    let email = normalize_email(email)?;
    let now = Utc::now();
    let admin = User::new(&email, "Administrator", AccountType::Regular, now)?
        .with_password_hash(hash_password(password)?)
        .verified();
    let tenant = Tenant::new(&email, TenantType::Individual, now)?;
    let membership = Membership::active(
        tenant.id,
        admin.id,
        MembershipType::Owner,
        [OWNER_ROLE, ADMIN_ROLE].into_iter().collect(),
        now,
    )?;

    ctx.deadline
        .run("insert_account", ctx.store.insert_account(&admin, &tenant, &membership))
        .await?;
    tracing::info!(user_id = %admin.id, tenant_id = %tenant.id, "bootstrap administrator created");
    Ok(Some(admin))
}
