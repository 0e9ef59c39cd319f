//! Map validated CLI arguments to the action the binary runs.

use crate::cli::{
    actions::{bootstrap, server, Action},
    commands::{auth, global_value, CMD_BOOTSTRAP_ADMIN},
};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let dsn = global_value(matches, "dsn").context("missing required argument: --dsn")?;
    let auth_opts = auth::Options::parse(matches)?;

    if let Some(sub) = matches.subcommand_matches(CMD_BOOTSTRAP_ADMIN) {
        let required = |name: &str| {
            sub.get_one::<String>(name)
                .cloned()
                .with_context(|| format!("missing required argument: --{name}"))
        };
        return Ok(Action::BootstrapAdmin(bootstrap::Args {
            dsn,
            auth_config: auth_opts.auth_config(),
            display_name: required("display-name")?,
            email: required("email")?,
            password: SecretString::from(required("password")?),
        }));
    }

    Ok(Action::Server(server::Args {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn,
        auth_config: auth_opts.auth_config(),
        otp_sweep_interval: auth_opts.otp_sweep_interval,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{PrincipalKind, TokenKind};
    use std::time::Duration;

    const DSN: &str = "postgres://carhub@localhost:5432/carhub";

    #[test]
    fn server_action_carries_config() {
        temp_env::with_vars(
            [
                ("CARHUB_DSN", Some(DSN)),
                ("CARHUB_JWT_SECRET", Some("s3cret")),
                ("CARHUB_PARTNER_REFRESH_TTL", Some("2")),
                ("CARHUB_OTP_SWEEP_INTERVAL", Some("0")),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["carhub-auth"]);
                let action = handler(&matches);
                assert!(matches!(action, Ok(Action::Server(_))));
                if let Ok(Action::Server(args)) = action {
                    assert_eq!(args.port, 8080);
                    assert_eq!(args.dsn, DSN);
                    assert_eq!(args.otp_sweep_interval, None);
                    assert_eq!(
                        args.auth_config
                            .token_ttl_seconds(PrincipalKind::Partner, TokenKind::Refresh),
                        2 * 24 * 60 * 60
                    );
                    assert_eq!(
                        args.auth_config
                            .token_ttl_seconds(PrincipalKind::Admin, TokenKind::Access),
                        15 * 60
                    );
                }
            },
        );
    }

    #[test]
    fn sweep_interval_in_seconds() {
        temp_env::with_vars(
            [
                ("CARHUB_DSN", Some(DSN)),
                ("CARHUB_JWT_SECRET", Some("s3cret")),
                ("CARHUB_OTP_SWEEP_INTERVAL", Some("120")),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["carhub-auth"]);
                if let Ok(Action::Server(args)) = handler(&matches) {
                    assert_eq!(args.otp_sweep_interval, Some(Duration::from_secs(120)));
                } else {
                    panic!("expected a server action");
                }
            },
        );
    }

    #[test]
    fn missing_globals_are_reported() {
        temp_env::with_vars(
            [
                ("CARHUB_DSN", None::<&str>),
                ("CARHUB_JWT_SECRET", Some("s3cret")),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["carhub-auth"]);
                let err = handler(&matches).unwrap_err();
                assert!(err.to_string().contains("--dsn"));
            },
        );
        temp_env::with_vars(
            [("CARHUB_DSN", Some(DSN)), ("CARHUB_JWT_SECRET", None)],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["carhub-auth"]);
                let err = handler(&matches).unwrap_err();
                assert!(err.to_string().contains("--jwt-secret"));
            },
        );
    }

    #[test]
    fn bootstrap_action() {
        temp_env::with_vars(
            [
                ("CARHUB_DSN", None::<&str>),
                ("CARHUB_JWT_SECRET", None),
                ("CARHUB_BOOTSTRAP_PASSWORD", None),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec![
                    "carhub-auth",
                    "bootstrap-admin",
                    "--dsn",
                    DSN,
                    "--jwt-secret",
                    "s3cret",
                    "--display-name",
                    "Root",
                    "--email",
                    "root@carhub.dev",
                    "--password",
                    "root-password",
                ]);
                match handler(&matches) {
                    Ok(Action::BootstrapAdmin(args)) => {
                        assert_eq!(args.dsn, DSN);
                        assert_eq!(args.display_name, "Root");
                        assert_eq!(args.email, "root@carhub.dev");
                    }
                    other => panic!("expected a bootstrap action, got {other:?}"),
                }
            },
        );
    }
}
