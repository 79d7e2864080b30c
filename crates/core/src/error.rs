//! Domain error model shared by every keyward crate.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Storage and token layers translate their own failures into one of these
/// kinds before returning, so callers never see a raw driver error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (malformed patch, empty required field).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// User, tenant, membership or key absent.
    #[error("not found")]
    NotFound,

    /// Duplicate record or stale compare-and-set (role exists, email in use).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A guarded update lost its compare-and-increment: the generation moved
    /// since the caller read it.
    #[error("generation conflict: {0}")]
    GenerationConflict(String),

    /// A membership already binds this (tenant, user) pair.
    #[error("membership already exists")]
    MembershipExists,

    /// Permission or delegation denied.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Missing or invalid credential, bad login.
    #[error("unauthorized")]
    Unauthorized,

    /// Credential expired by time or superseded by a newer generation.
    #[error("token expired")]
    TokenExpired,

    #[error("token audience mismatch")]
    AudienceMismatch,

    #[error("malformed token")]
    TokenMalformed,

    #[error("invalid token signature")]
    SignatureInvalid,

    /// Well-formed credential that refers to state which no longer matches.
    #[error("invalid token")]
    InvalidToken,

    /// Storage deadline exceeded or backend unreachable.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn generation_conflict(msg: impl Into<String>) -> Self {
        Self::GenerationConflict(msg.into())
    }

    /// Either kind of conflict: duplicate record or stale generation.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            DomainError::Conflict(_) | DomainError::GenerationConflict(_) | DomainError::MembershipExists
        )
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable code for transport layers.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "validation",
            DomainError::InvalidId(_) => "invalid_id",
            DomainError::NotFound => "not_found",
            DomainError::Conflict(_) => "conflict",
            DomainError::GenerationConflict(_) => "generation_conflict",
            DomainError::MembershipExists => "membership_exists",
            DomainError::Forbidden(_) => "forbidden",
            DomainError::Unauthorized => "unauthorized",
            DomainError::TokenExpired => "token_expired",
            DomainError::AudienceMismatch => "audience_mismatch",
            DomainError::TokenMalformed => "token_malformed",
            DomainError::SignatureInvalid => "signature_invalid",
            DomainError::InvalidToken => "invalid_token",
            DomainError::Unavailable(_) => "unavailable",
            DomainError::Internal(_) => "internal",
        }
    }

    /// Token-verification failures are terminal and never retried.
    pub fn is_credential_error(&self) -> bool {
        matches!(
            self,
            DomainError::TokenExpired
                | DomainError::AudienceMismatch
                | DomainError::TokenMalformed
                | DomainError::SignatureInvalid
                | DomainError::InvalidToken
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_for_token_failures() {
        let codes = [
            DomainError::TokenExpired.code(),
            DomainError::AudienceMismatch.code(),
            DomainError::TokenMalformed.code(),
            DomainError::SignatureInvalid.code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn unavailable_is_not_internal() {
        let err = DomainError::unavailable("db deadline");
        assert_eq!(err.code(), "unavailable");
        assert!(!err.is_credential_error());
    }

    #[test]
    fn stale_generation_is_a_distinct_conflict() {
        let stale = DomainError::generation_conflict("expected 0, found 1");
        let taken = DomainError::conflict("email in use");
        assert_ne!(stale.code(), taken.code());
        assert!(stale.is_conflict() && taken.is_conflict());
        assert!(DomainError::MembershipExists.is_conflict());
        assert!(!DomainError::TokenExpired.is_conflict());
    }
}
