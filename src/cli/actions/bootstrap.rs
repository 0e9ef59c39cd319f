use crate::{
    api,
    auth::{AuthConfig, AuthError, AuthService, LogCodeSender},
    store::PgStore,
};
use anyhow::{anyhow, Result};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub dsn: String,
    pub auth_config: AuthConfig,
    pub display_name: String,
    pub email: String,
    pub password: SecretString,
}

/// Apply the schema and create the first super administrator.
/// # Errors
/// Returns an error if the database is unreachable or the email is taken.
pub async fn execute(args: Args) -> Result<()> {
    let pool = api::connect(&args.dsn).await?;
    let store = PgStore::new(pool);
    store.apply_schema().await?;

    let service = AuthService::new(Arc::new(store), Arc::new(LogCodeSender), args.auth_config)?;
    let (admin, role) = service
        .bootstrap_super_admin(
            &args.display_name,
            &args.email,
            args.password.expose_secret(),
        )
        .await
        .map_err(|err| match err {
            AuthError::Internal(cause) => cause,
            other => anyhow!("bootstrap failed: {}", other.tag()),
        })?;

    info!(admin_id = admin.id, role = %role.name, "super administrator ready");
    println!("created admin {} ({}) with role {}", admin.id, admin.email, role.name);
    Ok(())
}
