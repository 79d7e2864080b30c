//! Issuing and verifying signed credentials.
//!
//! Credentials are compact JWS tokens signed with an HMAC secret. The secret is
//! fetched from a [`SecretSource`] on every call so it can rotate without a
//! restart.
//!
//! Verification order:
//! 1. header algorithm equals the configured one (`SignatureInvalid` otherwise)
//! 2. signature (`SignatureInvalid`)
//! 3. structure and expiry (`TokenMalformed`, `TokenExpired`)
//! 4. exact audience (`AudienceMismatch`)

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use keyward_core::{DomainError, DomainResult, UserId};

use crate::claims::{
    PurposeClaims, StandardClaims, TokenPurpose, VerifiedClaims, malformed, ns_prefix,
    strip_namespace,
};

const STANDARD_KEYS: [&str; 5] = ["sub", "iss", "aud", "iat", "exp"];

// ─────────────────────────────────────────────────────────────────────────────
// Secrets
// ─────────────────────────────────────────────────────────────────────────────

/// Indirection for the signing secret.
pub trait SecretSource: Send + Sync {
    fn current_secret(&self) -> DomainResult<Vec<u8>>;
}

#[derive(Clone)]
pub struct StaticSecret(Vec<u8>);

impl StaticSecret {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self(secret.into())
    }
}

impl SecretSource for StaticSecret {
    fn current_secret(&self) -> DomainResult<Vec<u8>> {
        Ok(self.0.clone())
    }
}

/// Secret read from a file at every call; trailing whitespace is ignored.
#[derive(Debug, Clone)]
pub struct FileSecret {
    path: PathBuf,
}

impl FileSecret {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SecretSource for FileSecret {
    fn current_secret(&self) -> DomainResult<Vec<u8>> {
        let raw = std::fs::read(&self.path).map_err(|e| {
            DomainError::internal(format!("cannot read secret {}: {e}", self.path.display()))
        })?;
        let len = raw
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map_or(0, |i| i + 1);
        if len == 0 {
            return Err(DomainError::internal("signing secret is empty"));
        }
        Ok(raw[..len].to_vec())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Factory
// ─────────────────────────────────────────────────────────────────────────────

/// Audience and lifetime of one token purpose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurposeSettings {
    pub audience: String,
    pub max_age: Duration,
}

/// A freshly signed credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub max_age: Duration,
}

#[derive(Clone)]
pub struct TokenFactory {
    issuer: String,
    namespace: String,
    algorithm: Algorithm,
    secrets: Arc<dyn SecretSource>,
    purposes: HashMap<TokenPurpose, PurposeSettings>,
}

impl core::fmt::Debug for TokenFactory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenFactory")
            .field("issuer", &self.issuer)
            .field("namespace", &self.namespace)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl TokenFactory {
    /// Factory signing with HS256. Session, refresh and API-key tokens are
    /// scoped to the issuer; the other purposes must be configured.
    pub fn new(issuer: impl Into<String>, secrets: Arc<dyn SecretSource>) -> Self {
        let issuer = issuer.into();
        let mut purposes = HashMap::new();
        for (purpose, max_age) in [
            (TokenPurpose::Session, Duration::hours(24)),
            (TokenPurpose::Refresh, Duration::hours(24)),
            (TokenPurpose::ApiKey, Duration::days(365)),
        ] {
            purposes.insert(
                purpose,
                PurposeSettings {
                    audience: issuer.clone(),
                    max_age,
                },
            );
        }
        Self {
            namespace: issuer.clone(),
            issuer,
            algorithm: Algorithm::HS256,
            secrets,
            purposes,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Only HMAC algorithms are accepted.
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> DomainResult<Self> {
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(DomainError::validation(format!(
                "unsupported signing algorithm {algorithm:?}"
            )));
        }
        self.algorithm = algorithm;
        Ok(self)
    }

    pub fn with_purpose(
        mut self,
        purpose: TokenPurpose,
        audience: impl Into<String>,
        max_age: Duration,
    ) -> Self {
        self.purposes.insert(
            purpose,
            PurposeSettings {
                audience: audience.into(),
                max_age,
            },
        );
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn settings(&self, purpose: TokenPurpose) -> DomainResult<&PurposeSettings> {
        self.purposes.get(&purpose).ok_or_else(|| {
            DomainError::internal(format!("token purpose {purpose:?} is not configured"))
        })
    }

    /// Sign `claims` for `subject`. Every key of `claims` is namespaced.
    pub fn issue<C: Serialize>(
        &self,
        subject: UserId,
        audience: &str,
        claims: &C,
        max_age: Duration,
    ) -> DomainResult<IssuedToken> {
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(max_age)
            .ok_or_else(|| DomainError::internal(format!("token lifetime {max_age} overflows")))?;

        let custom = match serde_json::to_value(claims) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(DomainError::internal("custom claims must be an object")),
            Err(e) => return Err(DomainError::internal(format!("encode claims: {e}"))),
        };

        let mut payload = Map::new();
        payload.insert("sub".into(), Value::String(subject.to_string()));
        payload.insert("iss".into(), Value::String(self.issuer.clone()));
        payload.insert("aud".into(), Value::String(audience.to_string()));
        payload.insert("iat".into(), Value::from(now.timestamp()));
        payload.insert("exp".into(), Value::from(expires_at.timestamp()));
        let prefix = ns_prefix(&self.namespace);
        for (key, value) in custom {
            payload.insert(format!("{prefix}{key}"), value);
        }

        let secret = self.secrets.current_secret()?;
        let token = jsonwebtoken::encode(
            &Header::new(self.algorithm),
            &payload,
            &EncodingKey::from_secret(&secret),
        )
        .map_err(|e| DomainError::internal(format!("sign token: {e}")))?;

        Ok(IssuedToken {
            token,
            expires_at,
            max_age,
        })
    }

    /// Issue with the audience and lifetime configured for `C`'s purpose.
    pub fn issue_for<C: PurposeClaims>(&self, subject: UserId, claims: &C) -> DomainResult<IssuedToken> {
        let settings = self.settings(C::PURPOSE)?;
        self.issue(subject, &settings.audience, claims, settings.max_age)
    }

    /// Verify `token` against `expected_audience` and decode its custom claims.
    pub fn verify<C: DeserializeOwned>(
        &self,
        token: &str,
        expected_audience: &str,
    ) -> DomainResult<VerifiedClaims<C>> {
        let header = jsonwebtoken::decode_header(token).map_err(malformed)?;
        if header.alg != self.algorithm {
            tracing::warn!(
                expected = ?self.algorithm,
                actual = ?header.alg,
                "rejecting token signed with unexpected algorithm"
            );
            return Err(DomainError::SignatureInvalid);
        }

        let secret = self.secrets.current_secret()?;
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub", "aud", "iss"]);
        validation.set_audience(&[expected_audience]);

        let data = jsonwebtoken::decode::<Map<String, Value>>(
            token,
            &DecodingKey::from_secret(&secret),
            &validation,
        )
        .map_err(|e| map_jwt_error(&e))?;

        self.split_claims(data.claims)
    }

    pub fn verify_purpose<C: DeserializeOwned>(
        &self,
        token: &str,
        purpose: TokenPurpose,
    ) -> DomainResult<VerifiedClaims<C>> {
        let settings = self.settings(purpose)?;
        self.verify(token, &settings.audience)
    }

    pub fn verify_for<C: PurposeClaims>(&self, token: &str) -> DomainResult<VerifiedClaims<C>> {
        self.verify_purpose(token, C::PURPOSE)
    }

    fn split_claims<C: DeserializeOwned>(
        &self,
        mut payload: Map<String, Value>,
    ) -> DomainResult<VerifiedClaims<C>> {
        let mut standard = Map::new();
        for key in STANDARD_KEYS {
            if let Some(value) = payload.remove(key) {
                standard.insert(key.to_string(), value);
            }
        }
        let standard: StandardClaims =
            serde_json::from_value(Value::Object(standard)).map_err(malformed)?;

        let prefix = ns_prefix(&self.namespace);
        let custom: Map<String, Value> = payload
            .into_iter()
            .filter_map(|(key, value)| {
                strip_namespace(&prefix, &key).map(|k| (k.to_string(), value))
            })
            .collect();
        let custom: C = serde_json::from_value(Value::Object(custom)).map_err(malformed)?;

        Ok(VerifiedClaims { standard, custom })
    }
}

fn map_jwt_error(err: &jsonwebtoken::errors::Error) -> DomainError {
    match err.kind() {
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => DomainError::SignatureInvalid,
        ErrorKind::ExpiredSignature => DomainError::TokenExpired,
        ErrorKind::InvalidAudience => DomainError::AudienceMismatch,
        _ => malformed(err),
    }
}
