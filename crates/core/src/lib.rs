//! `keyward-core` — identity foundation building blocks.
//!
//! Pure primitives only: identifiers, the error model and generation counters.

pub mod entity;
pub mod error;
pub mod generation;
pub mod id;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use generation::{ExpectedGeneration, Generation};
pub use id::{ApiKeyId, TenantId, UserId};
