//! Role resolution and permission queries.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::catalogue::RoleCatalogue;
use crate::permissions::Permission;
use crate::roles::{RoleName, RoleSet};

/// How a list of required permissions is matched against a grant.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GrantMode {
    /// At least one of the permissions.
    Any,
    /// Every permission.
    All,
}

/// Union of the permissions of every resolved role.
///
/// There is no explicit deny: absence of a permission is the only form of
/// denial, and an empty grant denies everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectiveGrant {
    roles: RoleSet,
    permissions: HashSet<Permission>,
}

impl EffectiveGrant {
    pub fn deny_all() -> Self {
        Self::default()
    }

    /// Roles that contributed to this grant (unknown names excluded).
    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    pub fn permissions(&self) -> BTreeSet<&Permission> {
        self.permissions.iter().collect()
    }

    /// `false` for an empty `perms` list.
    pub fn is_any_granted(&self, perms: &[Permission]) -> bool {
        perms.iter().any(|p| self.permissions.contains(p))
    }

    /// Vacuously `true` for an empty `perms` list; callers that must not
    /// accept an empty requirement go through [`check_permission`].
    pub fn is_all_granted(&self, perms: &[Permission]) -> bool {
        perms.iter().all(|p| self.permissions.contains(p))
    }
}

/// Permission check with an explicit mode. An empty requirement is denied.
pub fn check_permission(grant: &EffectiveGrant, required: &[Permission], mode: GrantMode) -> bool {
    if required.is_empty() {
        return false;
    }
    match mode {
        GrantMode::Any => grant.is_any_granted(required),
        GrantMode::All => grant.is_all_granted(required),
    }
}

/// Resolves held role names against the catalogue.
#[derive(Debug, Clone)]
pub struct Enforcer {
    catalogue: Arc<RoleCatalogue>,
}

impl Enforcer {
    pub fn new(catalogue: Arc<RoleCatalogue>) -> Self {
        Self { catalogue }
    }

    pub fn catalogue(&self) -> &RoleCatalogue {
        &self.catalogue
    }

    /// Unknown names contribute nothing; an empty or wholly unknown set yields
    /// a grant that denies everything.
    pub fn resolve<'a, I>(&self, names: I) -> EffectiveGrant
    where
        I: IntoIterator<Item = &'a RoleName>,
    {
        let mut grant = EffectiveGrant::deny_all();
        for name in names {
            match self.catalogue.definition(name) {
                Some(role) => {
                    grant.roles.insert(role.name.clone());
                    grant.permissions.extend(role.permissions.iter().cloned());
                }
                None => tracing::warn!(role = %name, "ignoring unknown role"),
            }
        }
        grant
    }
}
