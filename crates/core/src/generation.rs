//! Generation counters guarding purpose-bound credentials.
//!
//! A user record carries one counter per secret or attribute (password,
//! email). Each successful change bumps the matching counter by exactly one,
//! and any credential that embedded an older value is rejected.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Monotonic counter value stored with the subject.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    pub const INITIAL: Generation = Generation(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// The value the counter holds after one successful change.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl core::fmt::Display for Generation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compare-and-increment expectation for a guarded update.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExpectedGeneration(pub Generation);

impl ExpectedGeneration {
    pub fn matches(self, actual: Generation) -> bool {
        self.0 == actual
    }

    /// Fails with `GenerationConflict` when a concurrent change already moved
    /// the counter.
    pub fn check(self, actual: Generation) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::generation_conflict(format!(
                "generation check failed (expected: {}, actual: {actual})",
                self.0
            )))
        }
    }

    /// Same comparison, reported the way a superseded credential is reported.
    pub fn check_token(self, actual: Generation) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::TokenExpired)
        }
    }
}
