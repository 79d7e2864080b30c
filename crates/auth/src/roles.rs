use std::borrow::Cow;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use keyward_core::{DomainError, DomainResult};

/// Name of a role in the catalogue.
///
/// Role names are opaque at this layer; the catalogue decides which
/// permissions a name grants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleName(Cow<'static, str>);

/// Role granted to the owner of every implicitly created individual tenant.
pub const OWNER_ROLE: RoleName = RoleName::from_static("owner");

/// Role granted to the bootstrap administrator.
pub const ADMIN_ROLE: RoleName = RoleName::from_static("admin");

/// Ordered set of role names held by one membership.
pub type RoleSet = BTreeSet<RoleName>;

impl RoleName {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Validating constructor for names arriving from outside (files, patches).
    pub fn parse(name: &str) -> DomainResult<Self> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("role name must not be empty"));
        }
        if trimmed.contains(char::is_whitespace) || trimmed.contains(':') {
            return Err(DomainError::validation(format!(
                "role name '{trimmed}' contains whitespace or ':'"
            )));
        }
        Ok(Self(Cow::Owned(trimmed.to_string())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RoleName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
