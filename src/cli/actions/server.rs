use crate::{api, auth::AuthConfig};
use anyhow::Result;
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub auth_config: AuthConfig,
    pub otp_sweep_interval: Option<Duration>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!(
        port = args.port,
        otp_sweep_interval = ?args.otp_sweep_interval,
        "starting server"
    );
    api::new(
        args.port,
        args.dsn,
        args.auth_config,
        args.otp_sweep_interval,
    )
    .await
}
