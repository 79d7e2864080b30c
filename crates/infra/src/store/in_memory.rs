use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use keyward_auth::{ApiKey, Membership, Tenant, User, UserPatch};
use keyward_core::{ApiKeyId, DomainError, DomainResult, ExpectedGeneration, TenantId, UserId};

use super::r#trait::{
    ApiKeyStore, GuardedChange, GuardedUpdate, MembershipStore, TenantStore, UserStore,
};

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, User>,
    tenants: HashMap<TenantId, Tenant>,
    memberships: BTreeMap<(TenantId, UserId), Membership>,
    api_keys: HashMap<ApiKeyId, ApiKey>,
}

impl Tables {
    fn email_taken(&self, email: &str, except: Option<UserId>) -> bool {
        self.users
            .values()
            .any(|u| Some(u.id) != except && u.email.eq_ignore_ascii_case(email))
    }

    fn check_user_insert(&self, user: &User) -> DomainResult<()> {
        if self.email_taken(&user.email, None) {
            return Err(DomainError::conflict("email in use"));
        }
        if self.users.contains_key(&user.id) {
            return Err(DomainError::conflict("user exists"));
        }
        Ok(())
    }

    fn check_tenant_insert(&self, tenant: &Tenant) -> DomainResult<()> {
        if self.tenants.contains_key(&tenant.id) {
            return Err(DomainError::conflict("tenant exists"));
        }
        Ok(())
    }
}

/// In-memory identity store.
///
/// Intended for tests/dev. One lock guards every table so cascades and
/// compare-and-set updates are atomic, mirroring the single-statement
/// guarantees of the relational backend.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    tables: RwLock<Tables>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> DomainResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| DomainError::internal("lock poisoned"))
    }

    fn write(&self) -> DomainResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| DomainError::internal("lock poisoned"))
    }
}

#[async_trait]
impl UserStore for InMemoryIdentityStore {
    async fn insert_user(&self, user: &User) -> DomainResult<()> {
        let mut tables = self.write()?;
        tables.check_user_insert(user)?;
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn insert_account(
        &self,
        user: &User,
        tenant: &Tenant,
        owner: &Membership,
    ) -> DomainResult<()> {
        let mut tables = self.write()?;
        tables.check_user_insert(user)?;
        tables.check_tenant_insert(tenant)?;
        if owner.user_id != user.id || owner.tenant_id != tenant.id {
            return Err(DomainError::validation("owner membership must bind the new user and tenant"));
        }
        tables.users.insert(user.id, user.clone());
        tables.tenants.insert(tenant.id, tenant.clone());
        tables
            .memberships
            .insert((tenant.id, user.id), owner.clone());
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> DomainResult<User> {
        self.read()?.users.get(&id).cloned().ok_or(DomainError::NotFound)
    }

    async fn get_user_by_email(&self, email: &str) -> DomainResult<User> {
        self.read()?
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or(DomainError::NotFound)
    }

    async fn update_user(&self, id: UserId, patch: &UserPatch) -> DomainResult<User> {
        let mut tables = self.write()?;
        let user = tables.users.get_mut(&id).ok_or(DomainError::NotFound)?;
        *user = patch.apply(user, Utc::now())?;
        Ok(user.clone())
    }

    async fn update_user_generation_guarded(
        &self,
        id: UserId,
        change: GuardedChange,
        expected: ExpectedGeneration,
    ) -> DomainResult<GuardedUpdate> {
        let mut tables = self.write()?;
        if let GuardedChange::Email { email } = &change {
            if tables.email_taken(email, Some(id)) {
                return Err(DomainError::conflict("email in use"));
            }
        }

        let user = tables.users.get_mut(&id).ok_or(DomainError::NotFound)?;
        let previous_email = match change {
            GuardedChange::Password { hash } => {
                expected.check(user.password_gen)?;
                user.password_hash = Some(hash);
                user.password_gen = user.password_gen.next();
                None
            }
            GuardedChange::Email { email } => {
                expected.check(user.email_gen)?;
                user.email_gen = user.email_gen.next();
                Some(std::mem::replace(&mut user.email, email))
            }
        };
        user.email_verified = true;
        user.updated_at = Utc::now();

        Ok(GuardedUpdate {
            user: user.clone(),
            previous_email,
        })
    }

    async fn delete_user(&self, id: UserId) -> DomainResult<()> {
        let mut tables = self.write()?;
        if tables.users.remove(&id).is_none() {
            return Err(DomainError::NotFound);
        }
        tables.memberships.retain(|(_, user), _| *user != id);
        tables.api_keys.retain(|_, key| key.user_id != id);
        Ok(())
    }

    async fn count_users(&self) -> DomainResult<u64> {
        Ok(self.read()?.users.len() as u64)
    }
}

#[async_trait]
impl TenantStore for InMemoryIdentityStore {
    async fn insert_tenant(&self, tenant: &Tenant) -> DomainResult<()> {
        let mut tables = self.write()?;
        tables.check_tenant_insert(tenant)?;
        tables.tenants.insert(tenant.id, tenant.clone());
        Ok(())
    }

    async fn insert_tenant_with_owner(&self, tenant: &Tenant, owner: &Membership) -> DomainResult<()> {
        let mut tables = self.write()?;
        tables.check_tenant_insert(tenant)?;
        if owner.tenant_id != tenant.id {
            return Err(DomainError::validation("owner membership must bind the new tenant"));
        }
        if !tables.users.contains_key(&owner.user_id) {
            return Err(DomainError::NotFound);
        }
        tables.tenants.insert(tenant.id, tenant.clone());
        tables
            .memberships
            .insert((tenant.id, owner.user_id), owner.clone());
        Ok(())
    }

    async fn get_tenant(&self, id: TenantId) -> DomainResult<Tenant> {
        self.read()?.tenants.get(&id).cloned().ok_or(DomainError::NotFound)
    }

    async fn rename_tenant(&self, id: TenantId, name: &str) -> DomainResult<Tenant> {
        let mut tables = self.write()?;
        let tenant = tables.tenants.get_mut(&id).ok_or(DomainError::NotFound)?;
        tenant.name = name.to_string();
        Ok(tenant.clone())
    }

    async fn archive_tenant(&self, id: TenantId) -> DomainResult<()> {
        let mut tables = self.write()?;
        let tenant = tables.tenants.get_mut(&id).ok_or(DomainError::NotFound)?;
        tenant.archived = true;
        Ok(())
    }

    async fn tenants_sole_member(&self, user: UserId) -> DomainResult<Vec<Tenant>> {
        let tables = self.read()?;
        Ok(tables
            .tenants
            .values()
            .filter(|t| !t.archived)
            .filter(|t| {
                let mut members = tables
                    .memberships
                    .range((t.id, UserId::from_uuid(uuid::Uuid::nil()))..)
                    .take_while(|((tenant, _), _)| *tenant == t.id)
                    .map(|((_, member), _)| *member);
                members.next() == Some(user) && members.next().is_none()
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MembershipStore for InMemoryIdentityStore {
    async fn get_membership(&self, tenant: TenantId, user: UserId) -> DomainResult<Membership> {
        self.read()?
            .memberships
            .get(&(tenant, user))
            .cloned()
            .ok_or(DomainError::NotFound)
    }

    async fn create_membership(&self, membership: &Membership) -> DomainResult<()> {
        let mut tables = self.write()?;
        let key = (membership.tenant_id, membership.user_id);
        if tables.memberships.contains_key(&key) {
            return Err(DomainError::MembershipExists);
        }
        if !tables.users.contains_key(&membership.user_id)
            || !tables.tenants.contains_key(&membership.tenant_id)
        {
            return Err(DomainError::NotFound);
        }
        tables.memberships.insert(key, membership.clone());
        Ok(())
    }

    async fn update_membership(&self, membership: &Membership) -> DomainResult<()> {
        let mut tables = self.write()?;
        let stored = tables
            .memberships
            .get_mut(&(membership.tenant_id, membership.user_id))
            .ok_or(DomainError::NotFound)?;
        stored.membership_type = membership.membership_type;
        stored.status = membership.status;
        stored.roles = membership.roles.clone();
        stored.updated_at = membership.updated_at;
        Ok(())
    }

    async fn delete_membership(&self, tenant: TenantId, user: UserId) -> DomainResult<()> {
        let mut tables = self.write()?;
        tables
            .memberships
            .remove(&(tenant, user))
            .map(|_| ())
            .ok_or(DomainError::NotFound)
    }

    async fn tenant_memberships(&self, tenant: TenantId) -> DomainResult<Vec<Membership>> {
        Ok(self
            .read()?
            .memberships
            .values()
            .filter(|m| m.tenant_id == tenant)
            .cloned()
            .collect())
    }

    async fn user_memberships(&self, user: UserId) -> DomainResult<Vec<Membership>> {
        Ok(self
            .read()?
            .memberships
            .values()
            .filter(|m| m.user_id == user)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ApiKeyStore for InMemoryIdentityStore {
    async fn insert_key(&self, key: &ApiKey) -> DomainResult<()> {
        self.write()?.api_keys.insert(key.id, key.clone());
        Ok(())
    }

    async fn get_key(&self, id: ApiKeyId) -> DomainResult<ApiKey> {
        self.read()?.api_keys.get(&id).cloned().ok_or(DomainError::NotFound)
    }

    async fn user_keys(&self, user: UserId) -> DomainResult<Vec<ApiKey>> {
        let mut keys: Vec<ApiKey> = self
            .read()?
            .api_keys
            .values()
            .filter(|k| k.user_id == user)
            .cloned()
            .collect();
        keys.sort_by_key(|k| k.id);
        Ok(keys)
    }

    async fn delete_key(&self, id: ApiKeyId) -> DomainResult<()> {
        self.write()?
            .api_keys
            .remove(&id)
            .map(|_| ())
            .ok_or(DomainError::NotFound)
    }
}
