//! Storage boundary for users, tenants, memberships and API keys.
//!
//! The lifecycle services only see these traits. Two backends exist: an
//! in-memory store for tests and development, and Postgres.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryIdentityStore;
pub use postgres::PostgresIdentityStore;
pub use r#trait::{
    ApiKeyStore, GuardedChange, GuardedUpdate, IdentityStore, MembershipStore, TenantStore,
    UserStore,
};
