use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keyward_core::{ApiKeyId, Entity, TenantId, UserId};

/// API key of a service account, bound to one tenant membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: ApiKeyId,
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn new(user_id: UserId, tenant_id: TenantId, now: DateTime<Utc>) -> Self {
        Self {
            id: ApiKeyId::new(),
            user_id,
            tenant_id,
            created_at: now,
        }
    }
}

impl Entity for ApiKey {
    type Id = ApiKeyId;

    fn id(&self) -> &ApiKeyId {
        &self.id
    }
}
