//! Password hashing using Argon2id.

use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHasher, PasswordVerifier};

use keyward_core::{DomainError, DomainResult};

/// Hash `password` into a PHC string.
pub fn hash_password(password: &str) -> DomainResult<String> {
    if password.is_empty() {
        return Err(DomainError::validation("password must not be empty"));
    }
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| DomainError::internal(format!("hash password: {e}")))
}

/// `Ok(false)` on mismatch; `Internal` when the stored hash is malformed.
pub fn verify_password(password: &str, hash: &str) -> DomainResult<bool> {
    let parsed = argon2::PasswordHash::new(hash)
        .map_err(|e| DomainError::internal(format!("invalid hash format: {e}")))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(DomainError::internal(format!("verify password: {e}"))),
    }
}
