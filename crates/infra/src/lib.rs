//! Infrastructure layer: storage backends, configuration, notification and
//! the lifecycle services built on them.

pub mod config;
pub mod deadline;
pub mod lifecycle;
pub mod notify;
pub mod store;

pub use config::ServiceConfig;
pub use deadline::Deadline;
pub use lifecycle::{
    ApiKeyService, CredentialService, IdentityContext, MembershipService, TenantService,
    UserService, bootstrap_admin,
};
pub use notify::{InMemoryNotifier, Notification, NotificationPurpose, Notifier, TracingNotifier};
pub use store::{IdentityStore, InMemoryIdentityStore, PostgresIdentityStore};

#[cfg(test)]
mod integration_tests;
