//! End-to-end lifecycle scenarios against the in-memory store.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use keyward_auth::password::hash_password;
use keyward_auth::{
    AcceptOutcome, AccountType, ApiKey, AuthenticatedRequest, Membership, MembershipPatch,
    MembershipStatus, MembershipType, NewUser, OWNER_ROLE, RoleName, RoleSet, Tenant, TenantType,
    User, UserPatch,
};
use keyward_core::{ApiKeyId, DomainError, DomainResult, ExpectedGeneration, Generation, TenantId, UserId};

use crate::config::ServiceConfig;
use crate::lifecycle::{
    ApiKeyService, CredentialService, IdentityContext, MembershipService, TenantService,
    UserService, bootstrap_admin,
};
use crate::notify::{InMemoryNotifier, NotificationPurpose};
use crate::store::{
    ApiKeyStore, GuardedChange, GuardedUpdate, InMemoryIdentityStore, MembershipStore, TenantStore,
    UserStore,
};

const ADMIN_EMAIL: &str = "admin@example.com";
const PASSWORD: &str = "correct horse battery staple";

/// In-memory store with switchable failures.
#[derive(Default)]
struct FaultyStore {
    inner: InMemoryIdentityStore,
    /// `archive_tenant` fails for these tenants.
    archive_fails: Mutex<HashSet<TenantId>>,
    /// `insert_account` reports a deadline instead of writing.
    account_unavailable: AtomicBool,
    /// `get_user_by_email` sees nobody, as if a concurrent request had not
    /// committed yet.
    hide_emails: AtomicBool,
}

impl FaultyStore {
    fn fail_archive(&self, tenant: TenantId) {
        self.archive_fails.lock().unwrap().insert(tenant);
    }
}

#[async_trait]
impl UserStore for FaultyStore {
    async fn insert_user(&self, user: &User) -> DomainResult<()> {
        self.inner.insert_user(user).await
    }

    async fn insert_account(&self, user: &User, tenant: &Tenant, owner: &Membership) -> DomainResult<()> {
        if self.account_unavailable.load(Ordering::SeqCst) {
            return Err(DomainError::unavailable("insert_account exceeded deadline"));
        }
        self.inner.insert_account(user, tenant, owner).await
    }

    async fn get_user(&self, id: UserId) -> DomainResult<User> {
        self.inner.get_user(id).await
    }

    async fn get_user_by_email(&self, email: &str) -> DomainResult<User> {
        if self.hide_emails.load(Ordering::SeqCst) {
            return Err(DomainError::NotFound);
        }
        self.inner.get_user_by_email(email).await
    }

    async fn update_user(&self, id: UserId, patch: &UserPatch) -> DomainResult<User> {
        self.inner.update_user(id, patch).await
    }

    async fn update_user_generation_guarded(
        &self,
        id: UserId,
        change: GuardedChange,
        expected: ExpectedGeneration,
    ) -> DomainResult<GuardedUpdate> {
        self.inner.update_user_generation_guarded(id, change, expected).await
    }

    async fn delete_user(&self, id: UserId) -> DomainResult<()> {
        self.inner.delete_user(id).await
    }

    async fn count_users(&self) -> DomainResult<u64> {
        self.inner.count_users().await
    }
}

#[async_trait]
impl TenantStore for FaultyStore {
    async fn insert_tenant(&self, tenant: &Tenant) -> DomainResult<()> {
        self.inner.insert_tenant(tenant).await
    }

    async fn insert_tenant_with_owner(&self, tenant: &Tenant, owner: &Membership) -> DomainResult<()> {
        self.inner.insert_tenant_with_owner(tenant, owner).await
    }

    async fn get_tenant(&self, id: TenantId) -> DomainResult<Tenant> {
        self.inner.get_tenant(id).await
    }

    async fn rename_tenant(&self, id: TenantId, name: &str) -> DomainResult<Tenant> {
        self.inner.rename_tenant(id, name).await
    }

    async fn archive_tenant(&self, id: TenantId) -> DomainResult<()> {
        if self.archive_fails.lock().unwrap().contains(&id) {
            return Err(DomainError::unavailable(format!("archive {id} exceeded deadline")));
        }
        self.inner.archive_tenant(id).await
    }

    async fn tenants_sole_member(&self, user: UserId) -> DomainResult<Vec<Tenant>> {
        self.inner.tenants_sole_member(user).await
    }
}

#[async_trait]
impl MembershipStore for FaultyStore {
    async fn get_membership(&self, tenant: TenantId, user: UserId) -> DomainResult<Membership> {
        self.inner.get_membership(tenant, user).await
    }

    async fn create_membership(&self, membership: &Membership) -> DomainResult<()> {
        self.inner.create_membership(membership).await
    }

    async fn update_membership(&self, membership: &Membership) -> DomainResult<()> {
        self.inner.update_membership(membership).await
    }

    async fn delete_membership(&self, tenant: TenantId, user: UserId) -> DomainResult<()> {
        self.inner.delete_membership(tenant, user).await
    }

    async fn tenant_memberships(&self, tenant: TenantId) -> DomainResult<Vec<Membership>> {
        self.inner.tenant_memberships(tenant).await
    }

    async fn user_memberships(&self, user: UserId) -> DomainResult<Vec<Membership>> {
        self.inner.user_memberships(user).await
    }
}

#[async_trait]
impl ApiKeyStore for FaultyStore {
    async fn insert_key(&self, key: &ApiKey) -> DomainResult<()> {
        self.inner.insert_key(key).await
    }

    async fn get_key(&self, id: ApiKeyId) -> DomainResult<ApiKey> {
        self.inner.get_key(id).await
    }

    async fn user_keys(&self, user: UserId) -> DomainResult<Vec<ApiKey>> {
        self.inner.user_keys(user).await
    }

    async fn delete_key(&self, id: ApiKeyId) -> DomainResult<()> {
        self.inner.delete_key(id).await
    }
}

struct Harness {
    ctx: IdentityContext,
    store: Arc<FaultyStore>,
    notifier: Arc<InMemoryNotifier>,
}

impl Harness {
    async fn new() -> Self {
        let store = Arc::new(FaultyStore::default());
        let notifier = Arc::new(InMemoryNotifier::new());
        let config = ServiceConfig::new("https://id.example.com").with_secret("integration-secret");
        let ctx = IdentityContext::from_config(&config, store.clone(), notifier.clone()).unwrap();
        bootstrap_admin(&ctx, ADMIN_EMAIL, PASSWORD).await.unwrap().unwrap();
        Self { ctx, store, notifier }
    }

    fn credentials(&self) -> CredentialService {
        CredentialService::new(self.ctx.clone())
    }

    fn memberships(&self) -> MembershipService {
        MembershipService::new(self.ctx.clone())
    }

    /// Verified regular user owning an individual tenant.
    async fn seed_user(&self, email: &str) -> (User, Tenant) {
        let now = Utc::now();
        let user = User::new(email, email, AccountType::Regular, now)
            .unwrap()
            .with_password_hash(hash_password(PASSWORD).unwrap())
            .verified();
        let tenant = Tenant::new(email, TenantType::Individual, now).unwrap();
        let membership = Membership::active(
            tenant.id,
            user.id,
            MembershipType::Owner,
            roles(&["owner", "regular"]),
            now,
        )
        .unwrap();
        self.store.insert_user(&user).await.unwrap();
        self.store.insert_tenant(&tenant).await.unwrap();
        self.store.create_membership(&membership).await.unwrap();
        (user, tenant)
    }

    async fn act_as(&self, email: &str, tenant: Option<TenantId>) -> AuthenticatedRequest {
        let session = self.credentials().login(email, PASSWORD, tenant).await.unwrap();
        self.credentials()
            .authenticate(&session.session.token)
            .await
            .unwrap()
    }

    async fn admin(&self) -> AuthenticatedRequest {
        self.act_as(ADMIN_EMAIL, None).await
    }

    fn last_token(&self, purpose: NotificationPurpose) -> String {
        self.notifier.last_token(purpose).expect("notification sent")
    }
}

fn roles(names: &[&'static str]) -> RoleSet {
    names.iter().copied().map(RoleName::from_static).collect()
}

#[tokio::test]
async fn invite_lifecycle() {
    let h = Harness::new().await;
    let admin = h.admin().await;
    let (bob, _) = h.seed_user("bob@example.com").await;

    let (org, _) = TenantService::new(h.ctx.clone())
        .create_tenant(&admin, "Acme")
        .await
        .unwrap();
    let invitation = h
        .memberships()
        .invite(&admin, org.id, bob.id, &roles(&["regular"]), MembershipType::Member)
        .await
        .unwrap();
    assert_eq!(invitation.membership.status, MembershipStatus::Invited);

    // Invited-only: no session for that tenant, even with the right password.
    let denied = h.credentials().login("bob@example.com", PASSWORD, Some(org.id)).await;
    assert!(matches!(denied, Err(DomainError::Forbidden(_))));

    // Re-inviting while invited replaces the pending roles and re-sends;
    // the token is what gets mailed.
    let resent = h
        .memberships()
        .invite(&admin, org.id, bob.id, &roles(&["ops"]), MembershipType::Member)
        .await
        .unwrap();
    assert_eq!(resent.membership.roles, roles(&["ops"]));
    assert_eq!(
        h.store.get_membership(org.id, bob.id).await.unwrap().roles,
        roles(&["ops"])
    );
    let token = h.last_token(NotificationPurpose::TenantInvite);
    assert_eq!(token, resent.invite.token);

    let (membership, outcome) = h.memberships().accept(&token).await.unwrap();
    assert_eq!(outcome, AcceptOutcome::Activated);
    assert!(membership.is_active());

    let session = h
        .credentials()
        .login("bob@example.com", PASSWORD, Some(org.id))
        .await
        .unwrap();
    assert_eq!(session.membership.tenant_id, org.id);

    let (_, replay) = h.memberships().accept(&token).await.unwrap();
    assert_eq!(replay, AcceptOutcome::AlreadyActive);

    let again = h
        .memberships()
        .invite(&admin, org.id, bob.id, &roles(&["regular"]), MembershipType::Member)
        .await;
    assert_eq!(again.unwrap_err(), DomainError::MembershipExists);
}

#[tokio::test]
async fn accept_without_invited_membership_is_invalid_token() {
    let h = Harness::new().await;
    let admin = h.admin().await;
    let (bob, _) = h.seed_user("bob@example.com").await;
    let (org, _) = TenantService::new(h.ctx.clone())
        .create_tenant(&admin, "Acme")
        .await
        .unwrap();
    let invitation = h
        .memberships()
        .invite(&admin, org.id, bob.id, &RoleSet::new(), MembershipType::Member)
        .await
        .unwrap();
    assert!(invitation.membership.roles.contains(&RoleName::from_static("regular")));

    h.memberships().delete_membership(&admin, org.id, bob.id).await.unwrap();
    assert_eq!(
        h.memberships().accept(&invitation.invite.token).await.unwrap_err(),
        DomainError::InvalidToken
    );
}

#[tokio::test]
async fn owner_cannot_delegate_admin_into_own_tenant() {
    let h = Harness::new().await;
    let (_, bob_tenant) = h.seed_user("bob@example.com").await;
    let (carol, _) = h.seed_user("carol@example.com").await;
    let bob = h.act_as("bob@example.com", None).await;

    let err = h
        .memberships()
        .invite(&bob, bob_tenant.id, carol.id, &roles(&["admin"]), MembershipType::Member)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Forbidden(_)));
    assert_eq!(
        h.store.get_membership(bob_tenant.id, carol.id).await.unwrap_err(),
        DomainError::NotFound
    );

    h.memberships()
        .invite(&bob, bob_tenant.id, carol.id, &roles(&["regular"]), MembershipType::Member)
        .await
        .unwrap();
}

#[tokio::test]
async fn patch_guards_delegation_and_last_owner() {
    let h = Harness::new().await;
    let (bob_user, bob_tenant) = h.seed_user("bob@example.com").await;
    let bob = h.act_as("bob@example.com", None).await;

    let grant_admin = MembershipPatch {
        add_roles: roles(&["admin"]),
        ..MembershipPatch::default()
    };
    let err = h
        .memberships()
        .update_membership(&bob, bob_tenant.id, bob_user.id, &grant_admin)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Forbidden(_)));

    let demote = MembershipPatch {
        membership_type: Some(MembershipType::Member),
        ..MembershipPatch::default()
    };
    let err = h
        .memberships()
        .update_membership(&bob, bob_tenant.id, bob_user.id, &demote)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));

    let drop_regular = MembershipPatch {
        remove_roles: roles(&["regular"]),
        ..MembershipPatch::default()
    };
    let patched = h
        .memberships()
        .update_membership(&bob, bob_tenant.id, bob_user.id, &drop_regular)
        .await
        .unwrap();
    assert_eq!(patched.roles, roles(&["owner"]));
}

#[tokio::test]
async fn password_reset_invalidates_earlier_tokens() {
    let h = Harness::new().await;
    h.seed_user("bob@example.com").await;
    let credentials = h.credentials();

    credentials.request_password_reset("bob@example.com").await.unwrap();
    let first = h.last_token(NotificationPurpose::PasswordReset);
    credentials.request_password_reset("bob@example.com").await.unwrap();
    let second = h.last_token(NotificationPurpose::PasswordReset);

    let user = credentials.reset_password(&second, "new password").await.unwrap();
    assert_eq!(user.password_gen, Generation::new(1));

    // Still inside its time window, but bound to generation 0.
    assert_eq!(
        credentials.reset_password(&first, "other").await.unwrap_err(),
        DomainError::TokenExpired
    );
    assert_eq!(
        credentials.reset_password(&second, "other").await.unwrap_err(),
        DomainError::TokenExpired
    );

    assert!(credentials.login("bob@example.com", "new password", None).await.is_ok());
    assert_eq!(
        credentials.login("bob@example.com", PASSWORD, None).await.unwrap_err(),
        DomainError::Unauthorized
    );
}

#[tokio::test]
async fn reset_token_is_rejected_by_other_flows() {
    let h = Harness::new().await;
    h.seed_user("bob@example.com").await;
    h.credentials().request_password_reset("bob@example.com").await.unwrap();
    let reset = h.last_token(NotificationPurpose::PasswordReset);

    assert_eq!(
        h.credentials().authenticate(&reset).await.unwrap_err(),
        DomainError::AudienceMismatch
    );
    assert_eq!(
        h.memberships().accept(&reset).await.unwrap_err(),
        DomainError::AudienceMismatch
    );
}

#[tokio::test]
async fn concurrent_resets_with_one_token_let_one_win() {
    let h = Harness::new().await;
    h.seed_user("bob@example.com").await;
    h.credentials().request_password_reset("bob@example.com").await.unwrap();
    let token = h.last_token(NotificationPurpose::PasswordReset);

    let attempts: Vec<_> = ["first", "second"]
        .into_iter()
        .map(|password| {
            let credentials = h.credentials();
            let token = token.clone();
            tokio::spawn(async move { credentials.reset_password(&token, password).await })
        })
        .collect();

    let mut ok = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => ok += 1,
            Err(err) => assert_eq!(err, DomainError::TokenExpired),
        }
    }
    assert_eq!(ok, 1);
    let stored = h.store.get_user_by_email("bob@example.com").await.unwrap();
    assert_eq!(stored.password_gen, Generation::new(1));
}

#[tokio::test]
async fn unknown_address_reset_is_silent() {
    let h = Harness::new().await;
    h.credentials().request_password_reset("nobody@example.com").await.unwrap();
    assert!(h.notifier.last_token(NotificationPurpose::PasswordReset).is_none());
}

#[tokio::test]
async fn email_update_round_trip() {
    let h = Harness::new().await;
    let (bob_user, _) = h.seed_user("bob@example.com").await;
    h.seed_user("taken@example.com").await;
    let bob = h.act_as("bob@example.com", None).await;
    let credentials = h.credentials();

    assert!(matches!(
        credentials.request_email_update(&bob, bob_user.id, "taken@example.com").await,
        Err(DomainError::Conflict(_))
    ));
    assert!(matches!(
        credentials.request_email_update(&bob, bob_user.id, "not-an-address").await,
        Err(DomainError::Validation(_))
    ));

    credentials
        .request_email_update(&bob, bob_user.id, "robert@example.com")
        .await
        .unwrap();
    let request = h
        .notifier
        .sent()
        .into_iter()
        .rev()
        .find(|n| n.purpose == NotificationPurpose::EmailUpdateRequest)
        .unwrap();
    assert_eq!(request.to, "robert@example.com");
    let token = request.token.unwrap();

    let updated = credentials.complete_email_update(&token).await.unwrap();
    assert_eq!(updated.email, "robert@example.com");
    assert_eq!(updated.email_gen, Generation::new(1));

    let notice = h
        .notifier
        .sent()
        .into_iter()
        .rev()
        .find(|n| n.purpose == NotificationPurpose::EmailUpdated)
        .unwrap();
    assert_eq!(notice.to, "bob@example.com");

    assert_eq!(
        credentials.complete_email_update(&token).await.unwrap_err(),
        DomainError::TokenExpired
    );
}

#[tokio::test]
async fn other_users_email_needs_write_rights() {
    let h = Harness::new().await;
    let (carol, _) = h.seed_user("carol@example.com").await;
    h.seed_user("bob@example.com").await;
    let bob = h.act_as("bob@example.com", None).await;

    let err = h
        .credentials()
        .request_email_update(&bob, carol.id, "mallory@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Forbidden(_)));
}

#[tokio::test]
async fn login_gating() {
    let h = Harness::new().await;
    let credentials = h.credentials();

    assert_eq!(
        credentials.login("", PASSWORD, None).await.unwrap_err(),
        DomainError::Unauthorized
    );
    assert_eq!(
        credentials.login("nobody@example.com", PASSWORD, None).await.unwrap_err(),
        DomainError::Unauthorized
    );
    assert_eq!(
        credentials.login(ADMIN_EMAIL, "wrong", None).await.unwrap_err(),
        DomainError::Unauthorized
    );

    let now = Utc::now();
    let unverified = User::new("new@example.com", "New", AccountType::Regular, now)
        .unwrap()
        .with_password_hash(hash_password(PASSWORD).unwrap());
    h.store.insert_user(&unverified).await.unwrap();
    assert!(matches!(
        credentials.login("new@example.com", PASSWORD, None).await,
        Err(DomainError::Forbidden(_))
    ));

    // Unknown tenant context.
    assert_eq!(
        credentials
            .login(ADMIN_EMAIL, PASSWORD, Some(TenantId::new()))
            .await
            .unwrap_err(),
        DomainError::Unauthorized
    );
}

#[tokio::test]
async fn sole_member_departure_archives_individual_tenant() {
    let h = Harness::new().await;
    let admin = h.admin().await;
    let (bob, bob_tenant) = h.seed_user("bob@example.com").await;

    h.memberships()
        .delete_membership(&admin, bob_tenant.id, bob.id)
        .await
        .unwrap();
    assert!(h.store.get_tenant(bob_tenant.id).await.unwrap().archived);
}

#[tokio::test]
async fn departure_from_shared_tenant_archives_nothing() {
    let h = Harness::new().await;
    let (_, bob_tenant) = h.seed_user("bob@example.com").await;
    let (carol, carol_tenant) = h.seed_user("carol@example.com").await;
    let bob = h.act_as("bob@example.com", None).await;

    h.memberships()
        .invite(&bob, bob_tenant.id, carol.id, &roles(&["regular"]), MembershipType::Member)
        .await
        .unwrap();
    let token = h.last_token(NotificationPurpose::TenantInvite);
    h.memberships().accept(&token).await.unwrap();

    h.memberships()
        .delete_membership(&bob, bob_tenant.id, carol.id)
        .await
        .unwrap();
    assert!(!h.store.get_tenant(bob_tenant.id).await.unwrap().archived);
    assert!(!h.store.get_tenant(carol_tenant.id).await.unwrap().archived);
}

#[tokio::test]
async fn self_removal_is_always_allowed() {
    let h = Harness::new().await;
    let (_, bob_tenant) = h.seed_user("bob@example.com").await;
    let (carol_user, _) = h.seed_user("carol@example.com").await;
    let bob = h.act_as("bob@example.com", None).await;
    h.memberships()
        .invite(&bob, bob_tenant.id, carol_user.id, &roles(&["regular"]), MembershipType::Member)
        .await
        .unwrap();
    h.memberships()
        .accept(&h.last_token(NotificationPurpose::TenantInvite))
        .await
        .unwrap();

    let carol = h.act_as("carol@example.com", Some(bob_tenant.id)).await;
    h.memberships()
        .delete_membership(&carol, bob_tenant.id, carol_user.id)
        .await
        .unwrap();
    assert!(!h.store.get_tenant(bob_tenant.id).await.unwrap().archived);
}

#[tokio::test]
async fn deleting_user_archives_orphaned_tenants() {
    let h = Harness::new().await;
    let admin = h.admin().await;
    let (bob_user, bob_tenant) = h.seed_user("bob@example.com").await;
    let bob = h.act_as("bob@example.com", None).await;

    assert!(matches!(
        UserService::new(h.ctx.clone()).delete_user(&bob, admin.user_id()).await,
        Err(DomainError::Forbidden(_))
    ));

    UserService::new(h.ctx.clone())
        .delete_user(&admin, bob_user.id)
        .await
        .unwrap();
    assert!(h.store.get_tenant(bob_tenant.id).await.unwrap().archived);
    assert_eq!(h.store.get_user(bob_user.id).await.unwrap_err(), DomainError::NotFound);
}

#[tokio::test]
async fn create_user_provisions_tenant_and_reset_mail() {
    let h = Harness::new().await;
    let admin = h.admin().await;
    let users = UserService::new(h.ctx.clone());

    let created = users
        .create_user(
            &admin,
            NewUser {
                email: " dave@example.com ".into(),
                name: "Dave".into(),
                roles: roles(&["ops"]),
                ..NewUser::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(created.user.email, "dave@example.com");
    assert_eq!(created.user.account_type, AccountType::Regular);
    assert_eq!(created.tenant.tenant_type, TenantType::Individual);
    assert!(created.membership.roles.contains(&OWNER_ROLE));
    assert!(created.membership.roles.contains(&RoleName::from_static("ops")));

    let welcome = h.last_token(NotificationPurpose::NewUser);
    h.credentials().reset_password(&welcome, "dave's password").await.unwrap();
    let dave = h.credentials().login("dave@example.com", "dave's password", None).await.unwrap();
    assert_eq!(dave.membership.tenant_id, created.tenant.id);

    let duplicate = users
        .create_user(
            &admin,
            NewUser {
                email: "dave@example.com".into(),
                name: "Dave again".into(),
                ..NewUser::default()
            },
        )
        .await;
    assert!(matches!(duplicate, Err(DomainError::Conflict(_))));
}

#[tokio::test]
async fn regular_user_cannot_create_accounts() {
    let h = Harness::new().await;
    h.seed_user("bob@example.com").await;
    let bob = h.act_as("bob@example.com", None).await;
    let err = UserService::new(h.ctx.clone())
        .create_user(
            &bob,
            NewUser {
                email: "eve@example.com".into(),
                name: "Eve".into(),
                ..NewUser::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Forbidden(_)));
}

#[tokio::test]
async fn self_patch_cannot_mark_email_verified() {
    let h = Harness::new().await;
    let (bob_user, _) = h.seed_user("bob@example.com").await;
    let bob = h.act_as("bob@example.com", None).await;
    let users = UserService::new(h.ctx.clone());

    let renamed = users
        .update_user(
            &bob,
            bob_user.id,
            keyward_auth::UserPatch {
                name: Some("Robert".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.name, "Robert");

    let err = users
        .update_user(
            &bob,
            bob_user.id,
            keyward_auth::UserPatch {
                email_verified: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Forbidden(_)));
}

#[tokio::test]
async fn tenant_owner_rights_stop_at_own_tenant() {
    let h = Harness::new().await;
    let (_, bob_tenant) = h.seed_user("bob@example.com").await;
    let (_, carol_tenant) = h.seed_user("carol@example.com").await;
    let bob = h.act_as("bob@example.com", None).await;
    let tenants = TenantService::new(h.ctx.clone());

    let renamed = tenants.rename_tenant(&bob, bob_tenant.id, "Bob's place").await.unwrap();
    assert_eq!(renamed.name, "Bob's place");
    assert!(matches!(
        tenants.rename_tenant(&bob, carol_tenant.id, "mine").await,
        Err(DomainError::Forbidden(_))
    ));
    assert!(matches!(
        tenants.get_tenant(&bob, carol_tenant.id).await,
        Err(DomainError::Forbidden(_))
    ));
    assert!(tenants.get_tenant(&bob, bob_tenant.id).await.is_ok());
}

#[tokio::test]
async fn service_account_api_key_flow() {
    let h = Harness::new().await;
    let admin = h.admin().await;
    let created = UserService::new(h.ctx.clone())
        .create_user(
            &admin,
            NewUser {
                email: "robot@example.com".into(),
                name: "Robot".into(),
                roles: roles(&["service"]),
                account_type: Some(AccountType::Service),
                ..NewUser::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(created.user.account_type, AccountType::Service);

    let keys = ApiKeyService::new(h.ctx.clone());
    let issued = keys
        .issue_key(&admin, created.user.id, created.tenant.id)
        .await
        .unwrap();

    let robot = h.credentials().authenticate(&issued.credential.token).await.unwrap();
    assert_eq!(robot.user_id(), created.user.id);
    assert_eq!(robot.api_key, Some(issued.key.id));
    assert_eq!(robot.tenant_id(), created.tenant.id);

    assert_eq!(keys.list_keys(&admin, created.user.id).await.unwrap().len(), 1);
    keys.revoke_key(&admin, issued.key.id).await.unwrap();
    assert_eq!(
        h.credentials().authenticate(&issued.credential.token).await.unwrap_err(),
        DomainError::Unauthorized
    );

    // Regular accounts never hold keys.
    let bad = keys.issue_key(&admin, admin.user_id(), admin.tenant_id()).await;
    assert!(matches!(bad, Err(DomainError::Validation(_))));
}

#[tokio::test]
async fn refresh_reflects_current_roles() {
    let h = Harness::new().await;
    let (bob_user, bob_tenant) = h.seed_user("bob@example.com").await;
    let session = h
        .credentials()
        .login("bob@example.com", PASSWORD, None)
        .await
        .unwrap();

    let mut membership = h.store.get_membership(bob_tenant.id, bob_user.id).await.unwrap();
    membership.roles = roles(&["owner"]);
    h.store.update_membership(&membership).await.unwrap();

    let refreshed = h.credentials().refresh(&session.session.token).await.unwrap();
    let actor = h.credentials().authenticate(&refreshed.token).await.unwrap();
    assert_eq!(actor.membership.roles, roles(&["owner"]));
}

#[tokio::test]
async fn bootstrap_runs_once() {
    let h = Harness::new().await;
    assert!(bootstrap_admin(&h.ctx, "second@example.com", PASSWORD).await.unwrap().is_none());
    assert_eq!(h.store.count_users().await.unwrap(), 1);
}

#[tokio::test]
async fn failed_archival_still_archives_the_rest_and_fails_the_delete() {
    let h = Harness::new().await;
    let admin = h.admin().await;
    let (bob, first) = h.seed_user("bob@example.com").await;

    // A second individual tenant with bob as its only member.
    let second = Tenant::new("bob side project", TenantType::Individual, Utc::now()).unwrap();
    let owner = Membership::active(second.id, bob.id, MembershipType::Owner, roles(&["owner"]), Utc::now())
        .unwrap();
    h.store.insert_tenant_with_owner(&second, &owner).await.unwrap();
    h.store.fail_archive(first.id);

    let err = UserService::new(h.ctx.clone())
        .delete_user(&admin, bob.id)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Unavailable(_)));

    assert_eq!(h.store.get_user(bob.id).await.unwrap_err(), DomainError::NotFound);
    assert!(!h.store.get_tenant(first.id).await.unwrap().archived);
    assert!(h.store.get_tenant(second.id).await.unwrap().archived);
}

#[tokio::test]
async fn interrupted_account_creation_can_be_retried() {
    let h = Harness::new().await;
    let admin = h.admin().await;
    let users = UserService::new(h.ctx.clone());
    let new_user = || NewUser {
        email: "erin@example.com".into(),
        name: "Erin".into(),
        ..NewUser::default()
    };

    h.store.account_unavailable.store(true, Ordering::SeqCst);
    let err = users.create_user(&admin, new_user()).await.unwrap_err();
    assert!(matches!(err, DomainError::Unavailable(_)));
    assert_eq!(
        h.store.get_user_by_email("erin@example.com").await.unwrap_err(),
        DomainError::NotFound
    );
    assert!(h.notifier.last_token(NotificationPurpose::NewUser).is_none());

    h.store.account_unavailable.store(false, Ordering::SeqCst);
    let created = users.create_user(&admin, new_user()).await.unwrap();
    let memberships = h.store.user_memberships(created.user.id).await.unwrap();
    assert_eq!(memberships, vec![created.membership]);
}

#[tokio::test]
async fn address_taken_mid_email_update_is_conflict() {
    let h = Harness::new().await;
    let (bob_user, _) = h.seed_user("bob@example.com").await;
    let bob = h.act_as("bob@example.com", None).await;
    let credentials = h.credentials();

    credentials
        .request_email_update(&bob, bob_user.id, "robert@example.com")
        .await
        .unwrap();
    let token = h.last_token(NotificationPurpose::EmailUpdateRequest);
    h.seed_user("robert@example.com").await;

    // The pre-check misses the new owner; the guarded update must not.
    h.store.hide_emails.store(true, Ordering::SeqCst);
    let err = credentials.complete_email_update(&token).await.unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));

    h.store.hide_emails.store(false, Ordering::SeqCst);
    let stored = h.store.get_user(bob_user.id).await.unwrap();
    assert_eq!(stored.email, "bob@example.com");
    assert_eq!(stored.email_gen, Generation::INITIAL);
}
