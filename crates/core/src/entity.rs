//! Entity trait: directory records addressed by a stable identifier.

/// A record whose identity survives attribute changes (users, tenants, keys).
pub trait Entity {
    /// Strongly-typed identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
