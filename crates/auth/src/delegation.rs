//! Delegation guard: a principal may only hand out roles it could itself
//! delegate.

use keyward_core::{DomainError, DomainResult};

use crate::enforcer::EffectiveGrant;
use crate::permissions::Permission;
use crate::roles::{RoleName, RoleSet};

/// `true` when the actor holds `full_control`, or `delegate:<role>` for every
/// target role. Partial coverage is a denial. An empty target set is allowed.
pub fn can_delegate<'a, I>(grant: &EffectiveGrant, targets: I, full_control: &Permission) -> bool
where
    I: IntoIterator<Item = &'a RoleName>,
{
    if grant.is_any_granted(std::slice::from_ref(full_control)) {
        return true;
    }
    let required: Vec<Permission> = targets
        .into_iter()
        .map(|role| Permission::delegate(role.clone()))
        .collect();
    grant.is_all_granted(&required)
}

/// Same check, failing with `Forbidden` that names the first missing role.
pub fn require_delegation<'a, I>(
    grant: &EffectiveGrant,
    targets: I,
    full_control: &Permission,
) -> DomainResult<()>
where
    I: IntoIterator<Item = &'a RoleName> + Clone,
{
    if can_delegate(grant, targets.clone(), full_control) {
        return Ok(());
    }
    let missing = targets
        .into_iter()
        .find(|role| !grant.is_any_granted(&[Permission::delegate((*role).clone())]))
        .map(|role| role.to_string())
        .unwrap_or_default();
    Err(DomainError::forbidden(format!("cannot delegate role '{missing}'")))
}

/// Roles whose assignment changes between `before` and `after`: both added
/// and removed roles need delegation rights.
pub fn changed_roles(before: &RoleSet, after: &RoleSet) -> RoleSet {
    before.symmetric_difference(after).cloned().collect()
}
