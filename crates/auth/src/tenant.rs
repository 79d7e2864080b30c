//! Tenant records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keyward_core::{DomainError, DomainResult, Entity, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantType {
    /// Created implicitly for a single user; archived once it has no active
    /// memberships left.
    Individual,
    Organization,
}

impl TenantType {
    pub fn as_str(self) -> &'static str {
        match self {
            TenantType::Individual => "individual",
            TenantType::Organization => "organization",
        }
    }

    pub fn parse(raw: &str) -> DomainResult<Self> {
        match raw {
            "individual" => Ok(TenantType::Individual),
            "organization" => Ok(TenantType::Organization),
            other => Err(DomainError::validation(format!("unknown tenant type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub tenant_type: TenantType,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(name: &str, tenant_type: TenantType, now: DateTime<Utc>) -> DomainResult<Self> {
        Ok(Self {
            id: TenantId::new(),
            name: validate_tenant_name(name)?,
            tenant_type,
            archived: false,
            created_at: now,
        })
    }

    pub fn is_individual(&self) -> bool {
        self.tenant_type == TenantType::Individual
    }
}

impl Entity for Tenant {
    type Id = TenantId;

    fn id(&self) -> &TenantId {
        &self.id
    }
}

pub fn validate_tenant_name(raw: &str) -> DomainResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(DomainError::validation("tenant name must not be empty"));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_name_is_rejected() {
        assert!(Tenant::new("   ", TenantType::Organization, Utc::now()).is_err());
    }

    #[test]
    fn new_tenant_is_not_archived() {
        let tenant = Tenant::new("Acme", TenantType::Individual, Utc::now()).unwrap();
        assert!(!tenant.archived);
        assert!(tenant.is_individual());
        assert_eq!(TenantType::parse(tenant.tenant_type.as_str()).unwrap(), tenant.tenant_type);
    }
}
