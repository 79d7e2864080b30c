use keyward_core::{ApiKeyId, TenantId, UserId};

use crate::enforcer::EffectiveGrant;
use crate::membership::Membership;
use crate::user::{AccountType, User};

/// A fully resolved caller, threaded by value through every decision point.
///
/// Built once per request from a verified credential: the user record, the
/// membership selected by the credential's tenant, and the grant resolved
/// from that membership's roles. Nothing here is cached across requests.
#[derive(Debug, Clone)]
pub struct AuthenticatedRequest {
    pub user: User,
    pub membership: Membership,
    pub grant: EffectiveGrant,
    /// Set when the caller authenticated with a service-account key.
    pub api_key: Option<ApiKeyId>,
}

impl AuthenticatedRequest {
    pub fn user_id(&self) -> UserId {
        self.user.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.membership.tenant_id
    }

    pub fn account_type(&self) -> AccountType {
        self.user.account_type
    }

    pub fn is_self(&self, user_id: UserId) -> bool {
        self.user.id == user_id
    }

    /// Acting within `tenant` through the current membership.
    pub fn is_member_of(&self, tenant: TenantId) -> bool {
        self.membership.tenant_id == tenant && self.membership.is_active()
    }

    /// Owner of `tenant` through the current membership.
    pub fn owns(&self, tenant: TenantId) -> bool {
        self.is_member_of(tenant) && self.membership.is_owner()
    }
}
