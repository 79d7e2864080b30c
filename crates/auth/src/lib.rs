//! `keyward-auth` — pure authorization and credential domain.
//!
//! Role model, enforcer, delegation guard, token factory and the directory
//! records they reason about. Decoupled from HTTP and storage.

pub mod account_type;
pub mod api_key;
pub mod authorize;
pub mod catalogue;
pub mod claims;
pub mod delegation;
pub mod enforcer;
pub mod membership;
pub mod password;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod tenant;
pub mod token;
pub mod user;

pub use account_type::{Acting, PermissionFamily, resolve_account_type};
pub use api_key::ApiKey;
pub use catalogue::{PermissionDescription, RoleCatalogue, RoleDefinition};
pub use claims::{
    AccessClaims, ApiKeyClaims, EmailUpdateClaims, GenerationBound, PasswordResetClaims,
    PurposeClaims, SessionClaims, StandardClaims, TenantInviteClaims, TokenPurpose,
    VerifiedClaims, ns_claim,
};
pub use delegation::{can_delegate, changed_roles, require_delegation};
pub use enforcer::{EffectiveGrant, Enforcer, GrantMode, check_permission};
pub use membership::{AcceptOutcome, Membership, MembershipPatch, MembershipStatus, MembershipType};
pub use permissions::Permission;
pub use principal::AuthenticatedRequest;
pub use roles::{ADMIN_ROLE, OWNER_ROLE, RoleName, RoleSet};
pub use tenant::{Tenant, TenantType};
pub use token::{FileSecret, IssuedToken, PurposeSettings, SecretSource, StaticSecret, TokenFactory};
pub use user::{AccountType, NewUser, User, UserPatch};
