//! Claim sets carried by signed credentials.
//!
//! Standard claims use their short registered names. Every application claim
//! is written under a configured namespace (see [`ns_claim`]) so it cannot
//! collide with a registered name.

use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use keyward_core::{ApiKeyId, DomainError, DomainResult, ExpectedGeneration, Generation, TenantId, UserId};

use crate::roles::RoleName;

/// Namespace used when neither an explicit namespace nor a base URL is set.
pub const DEFAULT_NAMESPACE: &str = "com.keyward.auth";

/// Namespaced claim key: URL namespaces join with `/`, others with `.`.
pub fn ns_claim(namespace: &str, key: &str) -> String {
    format!("{}{key}", ns_prefix(namespace))
}

pub(crate) fn ns_prefix(namespace: &str) -> String {
    if namespace.starts_with("http://") || namespace.starts_with("https://") {
        format!("{}/", namespace.trim_end_matches('/'))
    } else {
        format!("{namespace}.")
    }
}

/// What a credential was issued for. Each purpose has its own audience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenPurpose {
    Session,
    Refresh,
    PasswordReset,
    EmailUpdate,
    TenantInvite,
    ApiKey,
}

/// Registered claims present on every credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardClaims {
    pub sub: UserId,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

impl StandardClaims {
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.iat, 0).single()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }
}

/// A verified credential: registered claims plus the de-namespaced custom set.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedClaims<C> {
    pub standard: StandardClaims,
    pub custom: C,
}

impl<C> VerifiedClaims<C> {
    pub fn subject(&self) -> UserId {
        self.standard.sub
    }
}

impl<C: GenerationBound> VerifiedClaims<C> {
    /// Second verification phase for generation-bound flows: the embedded
    /// generation must equal the subject's current one.
    pub fn ensure_current(&self, current: Generation) -> DomainResult<()> {
        ExpectedGeneration(self.custom.generation()).check_token(current)
    }
}

/// Custom claim set tied to one purpose.
pub trait PurposeClaims: Serialize + DeserializeOwned {
    const PURPOSE: TokenPurpose;
}

/// Claim sets that embed a generation counter at issue time.
pub trait GenerationBound {
    fn generation(&self) -> Generation;
}

// ─────────────────────────────────────────────────────────────────────────────
// Purpose claim sets
// ─────────────────────────────────────────────────────────────────────────────

/// Session (and refresh) credential: a snapshot of the membership used to log in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub email: String,
    pub name: String,
    pub roles: Vec<RoleName>,
    pub tenant: TenantId,
}

impl PurposeClaims for SessionClaims {
    const PURPOSE: TokenPurpose = TokenPurpose::Session;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordResetClaims {
    pub r#gen: Generation,
}

impl PurposeClaims for PasswordResetClaims {
    const PURPOSE: TokenPurpose = TokenPurpose::PasswordReset;
}

impl GenerationBound for PasswordResetClaims {
    fn generation(&self) -> Generation {
        self.r#gen
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailUpdateClaims {
    /// Address the subject asked to switch to.
    pub email: String,
    pub r#gen: Generation,
}

impl PurposeClaims for EmailUpdateClaims {
    const PURPOSE: TokenPurpose = TokenPurpose::EmailUpdate;
}

impl GenerationBound for EmailUpdateClaims {
    fn generation(&self) -> Generation {
        self.r#gen
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantInviteClaims {
    pub tenant_invite: TenantId,
}

impl PurposeClaims for TenantInviteClaims {
    const PURPOSE: TokenPurpose = TokenPurpose::TenantInvite;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyClaims {
    pub api_key: ApiKeyId,
}

impl PurposeClaims for ApiKeyClaims {
    const PURPOSE: TokenPurpose = TokenPurpose::ApiKey;
}

/// Bearer credentials accepted on authenticated requests.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AccessClaims {
    ApiKey(ApiKeyClaims),
    Session(SessionClaims),
}

/// Strip the namespace prefix from a claim key, if present.
pub(crate) fn strip_namespace<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(prefix)
}

pub(crate) fn malformed(err: impl core::fmt::Display) -> DomainError {
    tracing::debug!(error = %err, "rejecting malformed claim set");
    DomainError::TokenMalformed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_namespaces_use_slash() {
        assert_eq!(ns_claim("https://id.example.com", "roles"), "https://id.example.com/roles");
        assert_eq!(ns_claim("https://id.example.com/", "roles"), "https://id.example.com/roles");
        assert_eq!(ns_claim("http://localhost:8000", "gen"), "http://localhost:8000/gen");
    }

    #[test]
    fn plain_namespaces_use_dot() {
        assert_eq!(ns_claim(DEFAULT_NAMESPACE, "email"), "com.keyward.auth.email");
    }

    #[test]
    fn access_claims_distinguish_api_keys() {
        let key = ApiKeyId::new();
        let raw = serde_json::json!({ "api_key": key });
        assert_eq!(
            serde_json::from_value::<AccessClaims>(raw).unwrap(),
            AccessClaims::ApiKey(ApiKeyClaims { api_key: key })
        );

        let tenant = TenantId::new();
        let raw = serde_json::json!({
            "email": "a@b", "name": "A", "roles": ["owner"], "tenant": tenant
        });
        assert!(matches!(
            serde_json::from_value::<AccessClaims>(raw).unwrap(),
            AccessClaims::Session(s) if s.tenant == tenant
        ));
    }

    #[test]
    fn generation_mismatch_is_token_expired() {
        let claims = VerifiedClaims {
            standard: StandardClaims {
                sub: UserId::new(),
                iss: "https://id".into(),
                aud: "https://id/reset".into(),
                iat: 0,
                exp: 0,
            },
            custom: PasswordResetClaims { r#gen: Generation::new(0) },
        };
        assert!(claims.ensure_current(Generation::new(0)).is_ok());
        assert_eq!(claims.ensure_current(Generation::new(1)), Err(DomainError::TokenExpired));
    }
}
