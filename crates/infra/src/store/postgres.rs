//! Postgres-backed identity store.
//!
//! Every lifecycle invariant that needs more than one statement's worth of
//! atomicity is pushed into the database: the `(tenant_id, user_id)` primary
//! key on `memberships` rejects duplicate invites, and generation changes are
//! single conditional `UPDATE`s.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | DomainError | Scenario |
//! |------------|----------------------|-------------|----------|
//! | Database (unique violation) on `memberships_pkey` | `23505` | `MembershipExists` | Concurrent or repeated invite |
//! | Database (unique violation) | `23505` | `Conflict` | Email already in use |
//! | Guarded update matched no row, user exists | N/A | `GenerationConflict` | Concurrent credential change |
//! | Database (foreign key violation) | `23503` | `NotFound` | Membership for a missing user/tenant |
//! | Database (other) | Any other | `Internal` | |
//! | PoolTimedOut | N/A | `Unavailable` | No connection within the pool timeout |
//! | PoolClosed | N/A | `Unavailable` | Pool shut down |
//! | RowNotFound | N/A | `NotFound` | |
//! | Other | N/A | `Internal` | Decode errors, protocol errors |

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgExecutor, PgRow};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use async_trait::async_trait;
use keyward_auth::{
    AccountType, ApiKey, Membership, MembershipStatus, MembershipType, RoleName, RoleSet, Tenant,
    TenantType, User, UserPatch,
};
use keyward_core::{
    ApiKeyId, DomainError, DomainResult, ExpectedGeneration, Generation, TenantId, UserId,
};

use super::r#trait::{
    ApiKeyStore, GuardedChange, GuardedUpdate, MembershipStore, TenantStore, UserStore,
};

/// Name of the membership primary key; its violations mean `MembershipExists`.
const MEMBERSHIP_KEY: &str = "memberships_pkey";

/// Idempotent schema used by `ensure_schema` and the bootstrap binary.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id             UUID PRIMARY KEY,
    email          TEXT NOT NULL,
    name           TEXT NOT NULL,
    password_hash  TEXT,
    email_verified BOOLEAN NOT NULL DEFAULT FALSE,
    account_type   TEXT NOT NULL,
    password_gen   BIGINT NOT NULL DEFAULT 0 CHECK (password_gen >= 0),
    email_gen      BIGINT NOT NULL DEFAULT 0 CHECK (email_gen >= 0),
    created_at     TIMESTAMPTZ NOT NULL,
    updated_at     TIMESTAMPTZ NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS users_email_key ON users (lower(email));

CREATE TABLE IF NOT EXISTS tenants (
    id          UUID PRIMARY KEY,
    name        TEXT NOT NULL,
    tenant_type TEXT NOT NULL,
    archived    BOOLEAN NOT NULL DEFAULT FALSE,
    created_at  TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS memberships (
    tenant_id       UUID NOT NULL REFERENCES tenants (id),
    user_id         UUID NOT NULL REFERENCES users (id) ON DELETE CASCADE,
    membership_type TEXT NOT NULL,
    status          TEXT NOT NULL,
    roles           TEXT[] NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL,
    updated_at      TIMESTAMPTZ NOT NULL,
    CONSTRAINT memberships_pkey PRIMARY KEY (tenant_id, user_id)
);
CREATE INDEX IF NOT EXISTS memberships_user_idx ON memberships (user_id);

CREATE TABLE IF NOT EXISTS api_keys (
    id         UUID PRIMARY KEY,
    user_id    UUID NOT NULL REFERENCES users (id) ON DELETE CASCADE,
    tenant_id  UUID NOT NULL REFERENCES tenants (id),
    created_at TIMESTAMPTZ NOT NULL
);
"#;

const USER_COLUMNS: &str = "id, email, name, password_hash, email_verified, account_type, \
                            password_gen, email_gen, created_at, updated_at";
const TENANT_COLUMNS: &str = "id, name, tenant_type, archived, created_at";
const MEMBERSHIP_COLUMNS: &str =
    "tenant_id, user_id, membership_type, status, roles, created_at, updated_at";

/// Identity store over a shared `PgPool`.
///
/// `Send + Sync`; all connection management is delegated to the pool.
#[derive(Debug, Clone)]
pub struct PostgresIdentityStore {
    pool: Arc<PgPool>,
}

impl PostgresIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create tables and indexes when missing.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> DomainResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn user_exists(&self, id: UserId) -> DomainResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(id.as_uuid())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("user_exists", e))
    }
}

#[async_trait]
impl UserStore for PostgresIdentityStore {
    #[instrument(skip(self, user), fields(user_id = %user.id), err)]
    async fn insert_user(&self, user: &User) -> DomainResult<()> {
        insert_user_row(&*self.pool, user).await
    }

    #[instrument(skip_all, fields(user_id = %user.id, tenant_id = %tenant.id), err)]
    async fn insert_account(
        &self,
        user: &User,
        tenant: &Tenant,
        owner: &Membership,
    ) -> DomainResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("insert_account", e))?;
        insert_user_row(&mut *tx, user).await?;
        insert_tenant_row(&mut *tx, tenant).await?;
        insert_membership_row(&mut *tx, owner).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("insert_account", e))
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn get_user(&self, id: UserId) -> DomainResult<User> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_user", e))?
            .ok_or(DomainError::NotFound)?;
        user_from_row(&row)
    }

    #[instrument(skip(self, email), err)]
    async fn get_user_by_email(&self, email: &str) -> DomainResult<User> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)"
        ))
        .bind(email)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_user_by_email", e))?
        .ok_or(DomainError::NotFound)?;
        user_from_row(&row)
    }

    #[instrument(skip(self, patch), fields(user_id = %id), err)]
    async fn update_user(&self, id: UserId, patch: &UserPatch) -> DomainResult<User> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("update_user", e))?;

        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_user", e))?
        .ok_or(DomainError::NotFound)?;
        let updated = patch.apply(&user_from_row(&row)?, Utc::now())?;

        sqlx::query(
            "UPDATE users SET name = $2, email_verified = $3, account_type = $4, updated_at = $5 \
             WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(&updated.name)
        .bind(updated.email_verified)
        .bind(updated.account_type.as_str())
        .bind(updated.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_user", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("update_user", e))?;
        Ok(updated)
    }

    #[instrument(skip(self, change), fields(user_id = %id, expected = %expected.0), err)]
    async fn update_user_generation_guarded(
        &self,
        id: UserId,
        change: GuardedChange,
        expected: ExpectedGeneration,
    ) -> DomainResult<GuardedUpdate> {
        let expected_gen = gen_to_db(expected.0)?;
        let password_sql = format!(
            "UPDATE users SET password_hash = $2, password_gen = password_gen + 1, \
             email_verified = TRUE, updated_at = now() \
             WHERE id = $1 AND password_gen = $3 \
             RETURNING {USER_COLUMNS}, NULL::TEXT AS previous_email"
        );
        let row = match &change {
            GuardedChange::Password { hash } => sqlx::query(&password_sql)
                .bind(id.as_uuid())
                .bind(hash)
                .bind(expected_gen),
            GuardedChange::Email { email } => sqlx::query(
                "WITH prev AS (SELECT email FROM users WHERE id = $1 FOR UPDATE) \
                 UPDATE users u SET email = $2, email_gen = u.email_gen + 1, \
                 email_verified = TRUE, updated_at = now() \
                 FROM prev WHERE u.id = $1 AND u.email_gen = $3 \
                 RETURNING u.id, u.email, u.name, u.password_hash, u.email_verified, \
                 u.account_type, u.password_gen, u.email_gen, u.created_at, u.updated_at, \
                 prev.email AS previous_email",
            )
            .bind(id.as_uuid())
            .bind(email)
            .bind(expected_gen),
        }
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_user_generation_guarded", e))?;

        match row {
            Some(row) => Ok(GuardedUpdate {
                user: user_from_row(&row)?,
                previous_email: row.try_get("previous_email").map_err(decode_error)?,
            }),
            None if self.user_exists(id).await? => Err(DomainError::generation_conflict(
                "generation changed concurrently",
            )),
            None => Err(DomainError::NotFound),
        }
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn delete_user(&self, id: UserId) -> DomainResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_user", e))?;
        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn count_users(&self) -> DomainResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM users")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_users", e))?;
        u64::try_from(count).map_err(|e| DomainError::internal(format!("user count: {e}")))
    }
}

#[async_trait]
impl TenantStore for PostgresIdentityStore {
    #[instrument(skip(self, tenant), fields(tenant_id = %tenant.id), err)]
    async fn insert_tenant(&self, tenant: &Tenant) -> DomainResult<()> {
        insert_tenant_row(&*self.pool, tenant).await
    }

    #[instrument(skip_all, fields(tenant_id = %tenant.id, user_id = %owner.user_id), err)]
    async fn insert_tenant_with_owner(&self, tenant: &Tenant, owner: &Membership) -> DomainResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("insert_tenant_with_owner", e))?;
        insert_tenant_row(&mut *tx, tenant).await?;
        insert_membership_row(&mut *tx, owner).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("insert_tenant_with_owner", e))
    }

    #[instrument(skip(self), fields(tenant_id = %id), err)]
    async fn get_tenant(&self, id: TenantId) -> DomainResult<Tenant> {
        let row = sqlx::query(&format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_tenant", e))?
            .ok_or(DomainError::NotFound)?;
        tenant_from_row(&row)
    }

    #[instrument(skip(self, name), fields(tenant_id = %id), err)]
    async fn rename_tenant(&self, id: TenantId, name: &str) -> DomainResult<Tenant> {
        let row = sqlx::query(&format!(
            "UPDATE tenants SET name = $2 WHERE id = $1 RETURNING {TENANT_COLUMNS}"
        ))
        .bind(id.as_uuid())
        .bind(name)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("rename_tenant", e))?
        .ok_or(DomainError::NotFound)?;
        tenant_from_row(&row)
    }

    #[instrument(skip(self), fields(tenant_id = %id), err)]
    async fn archive_tenant(&self, id: TenantId) -> DomainResult<()> {
        let result = sqlx::query("UPDATE tenants SET archived = TRUE WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("archive_tenant", e))?;
        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user), err)]
    async fn tenants_sole_member(&self, user: UserId) -> DomainResult<Vec<Tenant>> {
        let rows = sqlx::query(
            "SELECT t.id, t.name, t.tenant_type, t.archived, t.created_at \
             FROM tenants t JOIN memberships m ON m.tenant_id = t.id \
             WHERE NOT t.archived \
             GROUP BY t.id \
             HAVING count(*) = 1 AND bool_and(m.user_id = $1) \
             ORDER BY t.created_at",
        )
        .bind(user.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("tenants_sole_member", e))?;
        rows.iter().map(tenant_from_row).collect()
    }
}

#[async_trait]
impl MembershipStore for PostgresIdentityStore {
    #[instrument(skip(self), fields(tenant_id = %tenant, user_id = %user), err)]
    async fn get_membership(&self, tenant: TenantId, user: UserId) -> DomainResult<Membership> {
        let row = sqlx::query(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE tenant_id = $1 AND user_id = $2"
        ))
        .bind(tenant.as_uuid())
        .bind(user.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_membership", e))?
        .ok_or(DomainError::NotFound)?;
        membership_from_row(&row)
    }

    #[instrument(
        skip(self, membership),
        fields(tenant_id = %membership.tenant_id, user_id = %membership.user_id),
        err
    )]
    async fn create_membership(&self, membership: &Membership) -> DomainResult<()> {
        insert_membership_row(&*self.pool, membership).await
    }

    #[instrument(
        skip(self, membership),
        fields(tenant_id = %membership.tenant_id, user_id = %membership.user_id),
        err
    )]
    async fn update_membership(&self, membership: &Membership) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE memberships SET membership_type = $3, status = $4, roles = $5, updated_at = $6 \
             WHERE tenant_id = $1 AND user_id = $2",
        )
        .bind(membership.tenant_id.as_uuid())
        .bind(membership.user_id.as_uuid())
        .bind(membership.membership_type.as_str())
        .bind(membership.status.as_str())
        .bind(roles_to_db(&membership.roles))
        .bind(membership.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_membership", e))?;
        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant, user_id = %user), err)]
    async fn delete_membership(&self, tenant: TenantId, user: UserId) -> DomainResult<()> {
        let result = sqlx::query("DELETE FROM memberships WHERE tenant_id = $1 AND user_id = $2")
            .bind(tenant.as_uuid())
            .bind(user.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_membership", e))?;
        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant), err)]
    async fn tenant_memberships(&self, tenant: TenantId) -> DomainResult<Vec<Membership>> {
        let rows = sqlx::query(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE tenant_id = $1 ORDER BY user_id"
        ))
        .bind(tenant.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("tenant_memberships", e))?;
        rows.iter().map(membership_from_row).collect()
    }

    #[instrument(skip(self), fields(user_id = %user), err)]
    async fn user_memberships(&self, user: UserId) -> DomainResult<Vec<Membership>> {
        let rows = sqlx::query(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE user_id = $1 ORDER BY tenant_id"
        ))
        .bind(user.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("user_memberships", e))?;
        rows.iter().map(membership_from_row).collect()
    }
}

#[async_trait]
impl ApiKeyStore for PostgresIdentityStore {
    #[instrument(skip(self, key), fields(api_key = %key.id), err)]
    async fn insert_key(&self, key: &ApiKey) -> DomainResult<()> {
        sqlx::query("INSERT INTO api_keys (id, user_id, tenant_id, created_at) VALUES ($1, $2, $3, $4)")
            .bind(key.id.as_uuid())
            .bind(key.user_id.as_uuid())
            .bind(key.tenant_id.as_uuid())
            .bind(key.created_at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_key", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(api_key = %id), err)]
    async fn get_key(&self, id: ApiKeyId) -> DomainResult<ApiKey> {
        let row = sqlx::query("SELECT id, user_id, tenant_id, created_at FROM api_keys WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_key", e))?
            .ok_or(DomainError::NotFound)?;
        api_key_from_row(&row)
    }

    #[instrument(skip(self), fields(user_id = %user), err)]
    async fn user_keys(&self, user: UserId) -> DomainResult<Vec<ApiKey>> {
        let rows = sqlx::query(
            "SELECT id, user_id, tenant_id, created_at FROM api_keys WHERE user_id = $1 ORDER BY id",
        )
        .bind(user.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("user_keys", e))?;
        rows.iter().map(api_key_from_row).collect()
    }

    #[instrument(skip(self), fields(api_key = %id), err)]
    async fn delete_key(&self, id: ApiKeyId) -> DomainResult<()> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_key", e))?;
        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound);
        }
        Ok(())
    }
}

/// Translate a driver error into the domain's vocabulary.
pub fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DomainError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") if db_err.constraint() == Some(MEMBERSHIP_KEY) => {
                    DomainError::MembershipExists
                }
                Some("23505") => DomainError::conflict(msg),
                Some("23503") => DomainError::NotFound,
                _ => DomainError::internal(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            DomainError::unavailable(format!("connection pool timed out in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            DomainError::unavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::RowNotFound => DomainError::NotFound,
        other => DomainError::internal(format!("sqlx error in {operation}: {other}")),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inserts shared by single-row writes and transactional provisioning
// ─────────────────────────────────────────────────────────────────────────────

async fn insert_user_row<'e>(exec: impl PgExecutor<'e>, user: &User) -> DomainResult<()> {
    sqlx::query(&format!(
        "INSERT INTO users ({USER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
    ))
    .bind(user.id.as_uuid())
    .bind(&user.email)
    .bind(&user.name)
    .bind(user.password_hash.as_deref())
    .bind(user.email_verified)
    .bind(user.account_type.as_str())
    .bind(gen_to_db(user.password_gen)?)
    .bind(gen_to_db(user.email_gen)?)
    .bind(user.created_at)
    .bind(user.updated_at)
    .execute(exec)
    .await
    .map_err(|e| map_sqlx_error("insert_user", e))?;
    Ok(())
}

async fn insert_tenant_row<'e>(exec: impl PgExecutor<'e>, tenant: &Tenant) -> DomainResult<()> {
    sqlx::query(&format!(
        "INSERT INTO tenants ({TENANT_COLUMNS}) VALUES ($1, $2, $3, $4, $5)"
    ))
    .bind(tenant.id.as_uuid())
    .bind(&tenant.name)
    .bind(tenant.tenant_type.as_str())
    .bind(tenant.archived)
    .bind(tenant.created_at)
    .execute(exec)
    .await
    .map_err(|e| map_sqlx_error("insert_tenant", e))?;
    Ok(())
}

async fn insert_membership_row<'e>(
    exec: impl PgExecutor<'e>,
    membership: &Membership,
) -> DomainResult<()> {
    sqlx::query(&format!(
        "INSERT INTO memberships ({MEMBERSHIP_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
    ))
    .bind(membership.tenant_id.as_uuid())
    .bind(membership.user_id.as_uuid())
    .bind(membership.membership_type.as_str())
    .bind(membership.status.as_str())
    .bind(roles_to_db(&membership.roles))
    .bind(membership.created_at)
    .bind(membership.updated_at)
    .execute(exec)
    .await
    .map_err(|e| map_sqlx_error("create_membership", e))?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Row decoding
// ─────────────────────────────────────────────────────────────────────────────

fn decode_error(err: sqlx::Error) -> DomainError {
    DomainError::internal(format!("failed to decode row: {err}"))
}

fn gen_to_db(generation: Generation) -> DomainResult<i64> {
    i64::try_from(generation.value())
        .map_err(|_| DomainError::internal("generation counter out of range"))
}

fn gen_from_db(raw: i64) -> DomainResult<Generation> {
    u64::try_from(raw)
        .map(Generation::new)
        .map_err(|_| DomainError::internal("negative generation counter"))
}

fn roles_to_db(roles: &RoleSet) -> Vec<String> {
    roles.iter().map(|r| r.as_str().to_string()).collect()
}

fn user_from_row(row: &PgRow) -> DomainResult<User> {
    let id: Uuid = row.try_get("id").map_err(decode_error)?;
    let account_type: String = row.try_get("account_type").map_err(decode_error)?;
    Ok(User {
        id: UserId::from_uuid(id),
        email: row.try_get("email").map_err(decode_error)?,
        name: row.try_get("name").map_err(decode_error)?,
        password_hash: row.try_get("password_hash").map_err(decode_error)?,
        email_verified: row.try_get("email_verified").map_err(decode_error)?,
        account_type: AccountType::parse(&account_type)?,
        password_gen: gen_from_db(row.try_get("password_gen").map_err(decode_error)?)?,
        email_gen: gen_from_db(row.try_get("email_gen").map_err(decode_error)?)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(decode_error)?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(decode_error)?,
    })
}

fn tenant_from_row(row: &PgRow) -> DomainResult<Tenant> {
    let id: Uuid = row.try_get("id").map_err(decode_error)?;
    let tenant_type: String = row.try_get("tenant_type").map_err(decode_error)?;
    Ok(Tenant {
        id: TenantId::from_uuid(id),
        name: row.try_get("name").map_err(decode_error)?,
        tenant_type: TenantType::parse(&tenant_type)?,
        archived: row.try_get("archived").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

fn membership_from_row(row: &PgRow) -> DomainResult<Membership> {
    let tenant_id: Uuid = row.try_get("tenant_id").map_err(decode_error)?;
    let user_id: Uuid = row.try_get("user_id").map_err(decode_error)?;
    let membership_type: String = row.try_get("membership_type").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let roles: Vec<String> = row.try_get("roles").map_err(decode_error)?;
    Ok(Membership {
        tenant_id: TenantId::from_uuid(tenant_id),
        user_id: UserId::from_uuid(user_id),
        membership_type: MembershipType::parse(&membership_type)?,
        status: MembershipStatus::parse(&status)?,
        roles: roles.into_iter().map(RoleName::new).collect(),
        created_at: row.try_get("created_at").map_err(decode_error)?,
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
    })
}

fn api_key_from_row(row: &PgRow) -> DomainResult<ApiKey> {
    let id: Uuid = row.try_get("id").map_err(decode_error)?;
    let user_id: Uuid = row.try_get("user_id").map_err(decode_error)?;
    let tenant_id: Uuid = row.try_get("tenant_id").map_err(decode_error)?;
    Ok(ApiKey {
        id: ApiKeyId::from_uuid(id),
        user_id: UserId::from_uuid(user_id),
        tenant_id: TenantId::from_uuid(tenant_id),
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_auth::OWNER_ROLE;

    async fn connect() -> PostgresIdentityStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPool::connect(&url).await.expect("connect");
        let store = PostgresIdentityStore::new(pool);
        store.ensure_schema().await.expect("schema");
        store
    }

    async fn seed(store: &PostgresIdentityStore) -> (User, Tenant) {
        let email = format!("{}@example.com", Uuid::now_v7());
        let user = User::new(&email, "Test", AccountType::Regular, Utc::now()).unwrap();
        let tenant = Tenant::new(&email, TenantType::Individual, Utc::now()).unwrap();
        store.insert_user(&user).await.unwrap();
        store.insert_tenant(&tenant).await.unwrap();
        (user, tenant)
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn duplicate_membership_maps_to_membership_exists() {
        let store = connect().await;
        let (user, tenant) = seed(&store).await;
        let m = Membership::invited(
            tenant.id,
            user.id,
            MembershipType::Member,
            [OWNER_ROLE].into_iter().collect(),
            Utc::now(),
        )
        .unwrap();
        store.create_membership(&m).await.unwrap();
        assert_eq!(
            store.create_membership(&m).await.unwrap_err(),
            DomainError::MembershipExists
        );
        let stored = store.get_membership(tenant.id, user.id).await.unwrap();
        assert_eq!(stored.roles, m.roles);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn failed_account_insert_rolls_back() {
        let store = connect().await;
        let email = format!("{}@example.com", Uuid::now_v7());
        let user = User::new(&email, "Test", AccountType::Regular, Utc::now()).unwrap();
        let tenant = Tenant::new(&email, TenantType::Individual, Utc::now()).unwrap();
        // Owner row points at a tenant that is never written.
        let dangling = Membership::active(
            TenantId::new(),
            user.id,
            MembershipType::Owner,
            [OWNER_ROLE].into_iter().collect(),
            Utc::now(),
        )
        .unwrap();

        let err = store.insert_account(&user, &tenant, &dangling).await.unwrap_err();
        assert_eq!(err, DomainError::NotFound);
        assert_eq!(store.get_user(user.id).await.unwrap_err(), DomainError::NotFound);
        assert_eq!(store.get_tenant(tenant.id).await.unwrap_err(), DomainError::NotFound);

        let owner = Membership::active(
            tenant.id,
            user.id,
            MembershipType::Owner,
            [OWNER_ROLE].into_iter().collect(),
            Utc::now(),
        )
        .unwrap();
        store.insert_account(&user, &tenant, &owner).await.unwrap();
        let stored = store.get_membership(tenant.id, user.id).await.unwrap();
        assert!(stored.is_owner() && stored.is_active());
        assert_eq!(stored.roles, owner.roles);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn guarded_update_rejects_stale_generation() {
        let store = connect().await;
        let (user, _tenant) = seed(&store).await;
        let expected = ExpectedGeneration(Generation::INITIAL);

        let first = store
            .update_user_generation_guarded(
                user.id,
                GuardedChange::Password { hash: "h1".into() },
                expected,
            )
            .await
            .unwrap();
        assert_eq!(first.user.password_gen, Generation::new(1));
        assert!(first.previous_email.is_none());

        let second = store
            .update_user_generation_guarded(
                user.id,
                GuardedChange::Password { hash: "h2".into() },
                expected,
            )
            .await;
        assert!(matches!(second, Err(DomainError::GenerationConflict(_))));
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn email_change_reports_previous_address() {
        let store = connect().await;
        let (user, _tenant) = seed(&store).await;
        let new_email = format!("{}@example.com", Uuid::now_v7());
        let update = store
            .update_user_generation_guarded(
                user.id,
                GuardedChange::Email { email: new_email.clone() },
                ExpectedGeneration(Generation::INITIAL),
            )
            .await
            .unwrap();
        assert_eq!(update.previous_email.as_deref(), Some(user.email.as_str()));
        assert_eq!(update.user.email, new_email);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn sole_member_query_and_cascade() {
        let store = connect().await;
        let (user, tenant) = seed(&store).await;
        let m = Membership::active(
            tenant.id,
            user.id,
            MembershipType::Owner,
            [OWNER_ROLE].into_iter().collect(),
            Utc::now(),
        )
        .unwrap();
        store.create_membership(&m).await.unwrap();

        let sole = store.tenants_sole_member(user.id).await.unwrap();
        assert_eq!(sole.iter().map(|t| t.id).collect::<Vec<_>>(), vec![tenant.id]);

        store.delete_user(user.id).await.unwrap();
        assert_eq!(
            store.get_membership(tenant.id, user.id).await.unwrap_err(),
            DomainError::NotFound
        );
    }
}
