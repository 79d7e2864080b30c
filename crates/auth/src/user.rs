//! User and service-account records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keyward_core::{DomainError, DomainResult, Entity, Generation, UserId};

use crate::roles::RoleSet;

// ─────────────────────────────────────────────────────────────────────────────
// Account Type
// ─────────────────────────────────────────────────────────────────────────────

/// The two disjoint kinds of account a user record can be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    #[default]
    Regular,
    Service,
}

impl AccountType {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountType::Regular => "regular",
            AccountType::Service => "service",
        }
    }

    pub fn parse(raw: &str) -> DomainResult<Self> {
        match raw {
            "regular" => Ok(AccountType::Regular),
            "service" => Ok(AccountType::Service),
            other => Err(DomainError::validation(format!("unknown account type '{other}'"))),
        }
    }
}

impl core::fmt::Display for AccountType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// User
// ─────────────────────────────────────────────────────────────────────────────

/// Identity record.
///
/// # Invariants
/// - `password_gen` and `email_gen` never decrease; each successful change of
///   the matching attribute bumps it by exactly one.
/// - A credential bound to a stale generation is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
    /// Argon2 PHC string; `None` until a password is set through a reset.
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub email_verified: bool,
    pub account_type: AccountType,
    pub password_gen: Generation,
    pub email_gen: Generation,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        email: &str,
        name: impl Into<String>,
        account_type: AccountType,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let email = normalize_email(email)?;
        Ok(Self {
            id: UserId::new(),
            email,
            name: name.into(),
            password_hash: None,
            email_verified: false,
            account_type,
            password_gen: Generation::INITIAL,
            email_gen: Generation::INITIAL,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_password_hash(mut self, hash: String) -> Self {
        self.password_hash = Some(hash);
        self
    }

    pub fn verified(mut self) -> Self {
        self.email_verified = true;
        self
    }

    pub fn is_service(&self) -> bool {
        self.account_type == AccountType::Service
    }
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> &UserId {
        &self.id
    }
}

/// Input for user creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NewUser {
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Roles for the new user's membership; the catalogue default when empty.
    #[serde(default)]
    pub roles: RoleSet,
    #[serde(default)]
    pub account_type: Option<AccountType>,
}

/// Profile changes. Secrets and email go through the generation-guarded flows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email_verified: Option<bool>,
    pub account_type: Option<AccountType>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email_verified.is_none() && self.account_type.is_none()
    }

    pub fn apply(&self, user: &User, now: DateTime<Utc>) -> DomainResult<User> {
        if self.account_type.is_some_and(|t| t != user.account_type) {
            return Err(DomainError::validation("account type cannot be changed"));
        }
        let mut next = user.clone();
        if let Some(name) = &self.name {
            next.name = name.trim().to_string();
        }
        if let Some(verified) = self.email_verified {
            next.email_verified = verified;
        }
        next.updated_at = now;
        Ok(next)
    }
}

/// Lazy syntax check: exactly one `@`, neither first nor last. Returns the
/// trimmed address.
pub fn normalize_email(raw: &str) -> DomainResult<String> {
    let email = raw.trim();
    let at = email.find('@');
    let valid = match at {
        Some(i) => i > 0 && i + 1 < email.len() && email.matches('@').count() == 1,
        None => false,
    };
    if !valid {
        return Err(DomainError::validation(format!("invalid email address '{email}'")));
    }
    Ok(email.to_string())
}
