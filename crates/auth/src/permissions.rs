use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use keyward_core::{DomainError, DomainResult};

use crate::roles::RoleName;

/// Prefix of the reserved delegation permission shape `delegate:<role>`.
pub const DELEGATE_PREFIX: &str = "delegate:";

/// Permission identifier.
///
/// The set is finite: every name a catalogue may reference is a variant here,
/// plus the parameterised `delegate:<role>` family. Unknown names are rejected
/// when the catalogue is loaded rather than silently ignored at check time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Permission {
    UsersRead,
    UsersWrite,
    UsersFullControl,
    UsersReadSelf,
    UsersWriteSelf,
    UsersReadLogs,
    UsersReadService,
    UsersWriteService,
    UsersFullControlService,
    TenantsRead,
    TenantsWrite,
    TenantsFullControl,
    TenantsReadOwned,
    TenantsWriteOwned,
    TenantsCreate,
    ApiKeysRead,
    ApiKeysWrite,
    /// Authorizes assigning the named role to another principal.
    Delegate(RoleName),
}

impl Permission {
    /// Every non-parameterised permission.
    pub const FIXED: [Permission; 17] = [
        Permission::UsersRead,
        Permission::UsersWrite,
        Permission::UsersFullControl,
        Permission::UsersReadSelf,
        Permission::UsersWriteSelf,
        Permission::UsersReadLogs,
        Permission::UsersReadService,
        Permission::UsersWriteService,
        Permission::UsersFullControlService,
        Permission::TenantsRead,
        Permission::TenantsWrite,
        Permission::TenantsFullControl,
        Permission::TenantsReadOwned,
        Permission::TenantsWriteOwned,
        Permission::TenantsCreate,
        Permission::ApiKeysRead,
        Permission::ApiKeysWrite,
    ];

    pub fn delegate(role: RoleName) -> Self {
        Permission::Delegate(role)
    }

    fn fixed_name(&self) -> Option<&'static str> {
        let name = match self {
            Permission::UsersRead => "users.read",
            Permission::UsersWrite => "users.write",
            Permission::UsersFullControl => "users.full_control",
            Permission::UsersReadSelf => "users.read_self",
            Permission::UsersWriteSelf => "users.write_self",
            Permission::UsersReadLogs => "users.read_logs",
            Permission::UsersReadService => "users.read_service",
            Permission::UsersWriteService => "users.write_service",
            Permission::UsersFullControlService => "users.full_control_service",
            Permission::TenantsRead => "tenants.read",
            Permission::TenantsWrite => "tenants.write",
            Permission::TenantsFullControl => "tenants.full_control",
            Permission::TenantsReadOwned => "tenants.read_owned",
            Permission::TenantsWriteOwned => "tenants.write_owned",
            Permission::TenantsCreate => "tenants.create",
            Permission::ApiKeysRead => "api_keys.read",
            Permission::ApiKeysWrite => "api_keys.write",
            Permission::Delegate(_) => return None,
        };
        Some(name)
    }

    /// Self-scoped variants only count when the actor is the resource subject.
    pub fn is_self_scoped(&self) -> bool {
        self.fixed_name().is_some_and(|n| n.ends_with("_self"))
    }

    /// Target role of a delegation permission.
    pub fn delegated_role(&self) -> Option<&RoleName> {
        match self {
            Permission::Delegate(role) => Some(role),
            _ => None,
        }
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Permission::Delegate(role) => write!(f, "{DELEGATE_PREFIX}{role}"),
            other => f.write_str(other.fixed_name().unwrap_or_default()),
        }
    }
}

impl FromStr for Permission {
    type Err = DomainError;

    fn from_str(s: &str) -> DomainResult<Self> {
        if let Some(role) = s.strip_prefix(DELEGATE_PREFIX) {
            return Ok(Permission::Delegate(RoleName::parse(role)?));
        }
        Permission::FIXED
            .iter()
            .find(|p| p.fixed_name() == Some(s))
            .cloned()
            .ok_or_else(|| DomainError::validation(format!("unknown permission '{s}'")))
    }
}

impl Serialize for Permission {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
