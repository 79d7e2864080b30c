use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use keyward_infra::{
    IdentityContext, PostgresIdentityStore, ServiceConfig, TracingNotifier, bootstrap_admin,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    keyward_observability::init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("KEYWARD_CONFIG").ok())
        .unwrap_or_else(|| "keyward.json".to_string());
    let config = ServiceConfig::load(&config_path)
        .with_context(|| format!("loading {config_path}"))?
        .apply_env();
    config.validate().context("invalid configuration")?;

    let db_url = config
        .db_url
        .clone()
        .context("db_url (or KEYWARD_DB_URL) is required")?;
    let mut pool_options = PgPoolOptions::new();
    if let Some(timeout) = config.deadline().timeout() {
        pool_options = pool_options.acquire_timeout(timeout);
    }
    let pool = pool_options
        .connect(&db_url)
        .await
        .context("connecting to Postgres")?;

    let store = PostgresIdentityStore::new(pool);
    store.ensure_schema().await.context("creating schema")?;

    let ctx = IdentityContext::from_config(&config, Arc::new(store), Arc::new(TracingNotifier))
        .context("building identity context")?;
    tracing::info!(
        roles = ctx.catalogue().list_roles(&[]).len(),
        "role catalogue loaded"
    );

    let email = std::env::var("KEYWARD_ADMIN_EMAIL").context("KEYWARD_ADMIN_EMAIL is not set")?;
    let password =
        std::env::var("KEYWARD_ADMIN_PASSWORD").context("KEYWARD_ADMIN_PASSWORD is not set")?;

    match bootstrap_admin(&ctx, &email, &password).await? {
        Some(admin) => tracing::info!(user_id = %admin.id, "administrator created"),
        None => tracing::info!("administrator already present"),
    }
    Ok(())
}
