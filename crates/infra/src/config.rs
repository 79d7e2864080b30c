//! Service configuration.
//!
//! Loaded from a JSON file, then overridden from the environment:
//!
//! | Variable | Field |
//! |---|---|
//! | `KEYWARD_BASE_URL` | `base_url` |
//! | `KEYWARD_DB_URL` | `db_url` |
//! | `KEYWARD_JWT_SECRET` | `jwt_secret` |
//!
//! ```ignore
//! let config = ServiceConfig::load("keyward.json")?.apply_env();
//! config.validate()?;
//! let tokens = config.token_factory()?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use keyward_auth::claims::DEFAULT_NAMESPACE;
use keyward_auth::{FileSecret, RoleCatalogue, SecretSource, StaticSecret, TokenFactory, TokenPurpose};
use keyward_core::{DomainError, DomainResult};

use crate::deadline::Deadline;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Issuer and session audience, e.g. `https://id.example.com`.
    #[serde(default)]
    pub base_url: String,

    /// Prefix for application claims. Defaults to `base_url`.
    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub jwt_secret: Option<String>,

    /// Read on every sign/verify so the secret can be rotated in place.
    #[serde(default)]
    pub jwt_secret_file: Option<PathBuf>,

    #[serde(default = "default_session_max_age")]
    pub session_max_age: i64,

    #[serde(default = "default_reset_token_max_age")]
    pub reset_token_max_age: i64,

    #[serde(default = "default_email_token_max_age")]
    pub email_token_max_age: i64,

    #[serde(default = "default_invite_token_max_age")]
    pub invite_token_max_age: i64,

    #[serde(default = "default_reset_path")]
    pub reset_path: String,

    #[serde(default = "default_email_update_path")]
    pub email_update_path: String,

    #[serde(default = "default_invite_path")]
    pub invite_path: String,

    #[serde(default)]
    pub db_url: Option<String>,

    /// Seconds; `0` disables the storage deadline.
    #[serde(default = "default_db_timeout")]
    pub db_timeout: u64,

    /// JSON role catalogue. The built-in catalogue is used when unset.
    #[serde(default)]
    pub rbac_file: Option<PathBuf>,
}

/// Upper bound for every configured token lifetime: ten years, in seconds.
pub const MAX_TOKEN_MAX_AGE: i64 = 10 * 365 * 24 * 60 * 60;

fn default_session_max_age() -> i64 {
    24 * 60 * 60
}

fn default_reset_token_max_age() -> i64 {
    60 * 60
}

fn default_email_token_max_age() -> i64 {
    24 * 60 * 60
}

fn default_invite_token_max_age() -> i64 {
    7 * 24 * 60 * 60
}

fn default_reset_path() -> String {
    "/reset-password".into()
}

fn default_email_update_path() -> String {
    "/update-email".into()
}

fn default_invite_path() -> String {
    "/accept-invite".into()
}

fn default_db_timeout() -> u64 {
    5
}

impl ServiceConfig {
    /// Defaults for everything except the issuer.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            namespace: None,
            jwt_secret: None,
            jwt_secret_file: None,
            session_max_age: default_session_max_age(),
            reset_token_max_age: default_reset_token_max_age(),
            email_token_max_age: default_email_token_max_age(),
            invite_token_max_age: default_invite_token_max_age(),
            reset_path: default_reset_path(),
            email_update_path: default_email_update_path(),
            invite_path: default_invite_path(),
            db_url: None,
            db_timeout: default_db_timeout(),
            rbac_file: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt_secret = Some(secret.into());
        self
    }

    pub fn load(path: impl AsRef<Path>) -> DomainResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DomainError::validation(format!("cannot read config {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            DomainError::validation(format!("invalid config {}: {e}", path.display()))
        })
    }

    /// Override fields from the process environment.
    pub fn apply_env(self) -> Self {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup("KEYWARD_BASE_URL") {
            self.base_url = url;
        }
        if let Some(url) = lookup("KEYWARD_DB_URL") {
            self.db_url = Some(url);
        }
        if let Some(secret) = lookup("KEYWARD_JWT_SECRET") {
            self.jwt_secret = Some(secret);
        }
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(DomainError::validation("base_url is required"));
        }
        if self.jwt_secret.as_deref().is_none_or(str::is_empty) && self.jwt_secret_file.is_none() {
            return Err(DomainError::validation(
                "one of jwt_secret or jwt_secret_file is required",
            ));
        }
        for (field, value) in self.max_ages() {
            max_age(field, value)?;
        }
        Ok(())
    }

    fn max_ages(&self) -> [(&'static str, i64); 4] {
        [
            ("session_max_age", self.session_max_age),
            ("reset_token_max_age", self.reset_token_max_age),
            ("email_token_max_age", self.email_token_max_age),
            ("invite_token_max_age", self.invite_token_max_age),
        ]
    }

    /// Explicit namespace, else the base URL, else the fixed default.
    pub fn namespace(&self) -> &str {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ if !self.base_url.is_empty() => &self.base_url,
            _ => DEFAULT_NAMESPACE,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    pub fn reset_url(&self) -> String {
        self.url(&self.reset_path)
    }

    pub fn email_update_url(&self) -> String {
        self.url(&self.email_update_path)
    }

    pub fn invite_url(&self) -> String {
        self.url(&self.invite_path)
    }

    pub fn deadline(&self) -> Deadline {
        Deadline::from_secs(self.db_timeout)
    }

    pub fn secret_source(&self) -> DomainResult<Arc<dyn SecretSource>> {
        if let Some(path) = &self.jwt_secret_file {
            return Ok(Arc::new(FileSecret::new(path.clone())));
        }
        match self.jwt_secret.as_deref() {
            Some(secret) if !secret.is_empty() => Ok(Arc::new(StaticSecret::new(secret.as_bytes()))),
            _ => Err(DomainError::validation("no signing secret configured")),
        }
    }

    /// Factory with every purpose's audience and lifetime wired in.
    pub fn token_factory(&self) -> DomainResult<TokenFactory> {
        self.validate()?;
        let session = max_age("session_max_age", self.session_max_age)?;
        Ok(TokenFactory::new(self.base_url.clone(), self.secret_source()?)
            .with_namespace(self.namespace())
            .with_purpose(TokenPurpose::Session, self.base_url.clone(), session)
            .with_purpose(TokenPurpose::Refresh, self.base_url.clone(), session)
            .with_purpose(
                TokenPurpose::PasswordReset,
                self.reset_url(),
                max_age("reset_token_max_age", self.reset_token_max_age)?,
            )
            .with_purpose(
                TokenPurpose::EmailUpdate,
                self.email_update_url(),
                max_age("email_token_max_age", self.email_token_max_age)?,
            )
            .with_purpose(
                TokenPurpose::TenantInvite,
                self.invite_url(),
                max_age("invite_token_max_age", self.invite_token_max_age)?,
            ))
    }

    pub fn catalogue(&self) -> DomainResult<RoleCatalogue> {
        match &self.rbac_file {
            Some(path) => RoleCatalogue::load(path),
            None => RoleCatalogue::builtin(),
        }
    }
}

/// Token lifetime from configured seconds, within `1..=MAX_TOKEN_MAX_AGE`.
fn max_age(field: &str, secs: i64) -> DomainResult<Duration> {
    if secs <= 0 {
        return Err(DomainError::validation(format!("{field} must be positive")));
    }
    if secs > MAX_TOKEN_MAX_AGE {
        return Err(DomainError::validation(format!(
            "{field} must not exceed {MAX_TOKEN_MAX_AGE} seconds"
        )));
    }
    Duration::try_seconds(secs)
        .ok_or_else(|| DomainError::validation(format!("{field} is out of range")))
}
