//! Static role catalogue: permission descriptions, role definitions and the
//! read-only introspection queries used by discovery endpoints.
//!
//! The catalogue is loaded once at startup and never mutated afterwards.
//! Enforcement goes through [`crate::Enforcer`]; nothing here changes a
//! decision.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use keyward_core::{DomainError, DomainResult};

use crate::permissions::Permission;
use crate::roles::RoleName;

const BUILTIN_CATALOGUE: &str = include_str!("builtin_roles.json");

#[derive(Debug, Deserialize)]
struct CatalogueFile {
    #[serde(default)]
    permissions: BTreeMap<String, String>,
    #[serde(default)]
    roles: BTreeMap<String, RoleEntry>,
}

#[derive(Debug, Deserialize)]
struct RoleEntry {
    #[serde(default)]
    description: String,
    #[serde(default)]
    permissions: Vec<String>,
    #[serde(default)]
    default: bool,
}

/// One role and the permissions it grants directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleDefinition {
    pub name: RoleName,
    pub description: String,
    pub permissions: BTreeSet<Permission>,
}

impl RoleDefinition {
    pub fn grants(&self, permission: &Permission) -> bool {
        self.permissions.contains(permission)
    }
}

/// Introspection view of a permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionDescription {
    pub permission: Permission,
    pub description: String,
    /// Roles granting this permission, sorted by name.
    pub roles: Vec<RoleName>,
}

#[derive(Debug, Clone)]
pub struct RoleCatalogue {
    permissions: BTreeMap<Permission, String>,
    roles: BTreeMap<RoleName, RoleDefinition>,
    default_role: RoleName,
}

impl RoleCatalogue {
    /// Catalogue shipped with the service.
    pub fn builtin() -> DomainResult<Self> {
        Self::from_json_str(BUILTIN_CATALOGUE)
    }

    pub fn load(path: impl AsRef<Path>) -> DomainResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DomainError::validation(format!("cannot read role catalogue {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> DomainResult<Self> {
        let file: CatalogueFile = serde_json::from_str(raw)
            .map_err(|e| DomainError::validation(format!("malformed role catalogue: {e}")))?;
        Self::from_file(file)
    }

    fn from_file(file: CatalogueFile) -> DomainResult<Self> {
        let mut permissions = BTreeMap::new();
        for (name, description) in file.permissions {
            permissions.insert(name.parse::<Permission>()?, description);
        }

        let mut roles = BTreeMap::new();
        let mut defaults = Vec::new();
        for (name, entry) in file.roles {
            let role = RoleName::parse(&name)?;
            let mut granted = BTreeSet::new();
            for raw in &entry.permissions {
                let permission: Permission = raw.parse()?;
                if !permissions.contains_key(&permission) {
                    return Err(DomainError::validation(format!(
                        "role '{role}' references undeclared permission '{raw}'"
                    )));
                }
                granted.insert(permission);
            }
            if entry.default {
                defaults.push(role.clone());
            }
            roles.insert(
                role.clone(),
                RoleDefinition {
                    name: role,
                    description: entry.description,
                    permissions: granted,
                },
            );
        }

        for permission in permissions.keys() {
            if let Some(target) = permission.delegated_role() {
                if !roles.contains_key(target) {
                    return Err(DomainError::validation(format!(
                        "'{permission}' delegates unknown role '{target}'"
                    )));
                }
            }
        }

        let default_role = match defaults.as_slice() {
            [only] => only.clone(),
            other => {
                return Err(DomainError::validation(format!(
                    "exactly one default role must be defined, got {}",
                    other.len()
                )));
            }
        };

        Ok(Self {
            permissions,
            roles,
            default_role,
        })
    }

    /// Role assigned to users created without an explicit role set.
    pub fn default_role(&self) -> &RoleName {
        &self.default_role
    }

    pub fn contains_role(&self, name: &RoleName) -> bool {
        self.roles.contains_key(name)
    }

    pub(crate) fn definition(&self, name: &RoleName) -> Option<&RoleDefinition> {
        self.roles.get(name)
    }

    pub fn role(&self, name: &RoleName) -> DomainResult<&RoleDefinition> {
        self.roles.get(name).ok_or(DomainError::NotFound)
    }

    pub fn permission(&self, permission: &Permission) -> DomainResult<PermissionDescription> {
        let description = self.permissions.get(permission).ok_or(DomainError::NotFound)?;
        Ok(self.describe(permission, description))
    }

    /// Roles holding **all** of `having` (every role when empty), sorted by name.
    pub fn list_roles(&self, having: &[Permission]) -> Vec<&RoleDefinition> {
        self.roles
            .values()
            .filter(|role| having.iter().all(|p| role.grants(p)))
            .collect()
    }

    /// Permissions held by **all** of `held_by` (every permission when empty).
    ///
    /// Fails with `NotFound` when a filter names an unknown role.
    pub fn list_permissions(&self, held_by: &[RoleName]) -> DomainResult<Vec<PermissionDescription>> {
        let filters = held_by
            .iter()
            .map(|name| self.role(name))
            .collect::<DomainResult<Vec<_>>>()?;

        Ok(self
            .permissions
            .iter()
            .filter(|(permission, _)| filters.iter().all(|role| role.grants(permission)))
            .map(|(permission, description)| self.describe(permission, description))
            .collect())
    }

    fn describe(&self, permission: &Permission, description: &str) -> PermissionDescription {
        PermissionDescription {
            permission: permission.clone(),
            description: description.to_string(),
            roles: self
                .roles
                .values()
                .filter(|role| role.grants(permission))
                .map(|role| role.name.clone())
                .collect(),
        }
    }
}
