//! Token lifetimes and the signing secret.
//!
//! Units follow how each class is usually tuned: users in seconds, partners
//! and admins in minutes (access) and days (refresh).

use crate::auth::{AuthConfig, ClassTtl, PrincipalKind};
use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_USER_ACCESS_TTL: &str = "user-access-ttl";
pub const ARG_USER_REFRESH_TTL: &str = "user-refresh-ttl";
pub const ARG_PARTNER_ACCESS_TTL: &str = "partner-access-ttl";
pub const ARG_PARTNER_REFRESH_TTL: &str = "partner-refresh-ttl";
pub const ARG_ADMIN_ACCESS_TTL: &str = "admin-access-ttl";
pub const ARG_ADMIN_REFRESH_TTL: &str = "admin-refresh-ttl";
pub const ARG_UNVERIFIED_TOKEN_TTL: &str = "unverified-token-ttl";
pub const ARG_OTP_SWEEP_INTERVAL: &str = "otp-sweep-interval";

const MINUTE: i64 = 60;
const DAY: i64 = 24 * 60 * 60;

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HMAC secret used to sign access and refresh tokens")
                .env("CARHUB_JWT_SECRET")
                .global(true)
                .hide_env_values(true),
        )
        .arg(ttl_arg(
            ARG_USER_ACCESS_TTL,
            "User access token TTL in seconds",
            "CARHUB_USER_ACCESS_TTL",
            "3600",
        ))
        .arg(ttl_arg(
            ARG_USER_REFRESH_TTL,
            "User refresh token TTL in seconds",
            "CARHUB_USER_REFRESH_TTL",
            "604800",
        ))
        .arg(ttl_arg(
            ARG_PARTNER_ACCESS_TTL,
            "Partner access token TTL in minutes",
            "CARHUB_PARTNER_ACCESS_TTL",
            "60",
        ))
        .arg(ttl_arg(
            ARG_PARTNER_REFRESH_TTL,
            "Partner refresh token TTL in days",
            "CARHUB_PARTNER_REFRESH_TTL",
            "7",
        ))
        .arg(ttl_arg(
            ARG_ADMIN_ACCESS_TTL,
            "Admin access token TTL in minutes",
            "CARHUB_ADMIN_ACCESS_TTL",
            "15",
        ))
        .arg(ttl_arg(
            ARG_ADMIN_REFRESH_TTL,
            "Admin refresh token TTL in days",
            "CARHUB_ADMIN_REFRESH_TTL",
            "30",
        ))
        .arg(ttl_arg(
            ARG_UNVERIFIED_TOKEN_TTL,
            "TTL in seconds of the limited token handed out at user signup",
            "CARHUB_UNVERIFIED_TOKEN_TTL",
            "900",
        ))
        .arg(
            Arg::new(ARG_OTP_SWEEP_INTERVAL)
                .long(ARG_OTP_SWEEP_INTERVAL)
                .help("Seconds between sweeps of expired or used one-time codes, 0 disables")
                .env("CARHUB_OTP_SWEEP_INTERVAL")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn ttl_arg(name: &'static str, help: &'static str, env: &'static str, default: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .help(help)
        .env(env)
        .default_value(default)
        .value_parser(clap::value_parser!(i64).range(1..))
}

#[derive(Debug)]
pub struct Options {
    pub jwt_secret: SecretString,
    pub user: ClassTtl,
    pub partner: ClassTtl,
    pub admin: ClassTtl,
    pub unverified_token_ttl_seconds: i64,
    pub otp_sweep_interval: Option<Duration>,
}

impl Options {
    /// # Errors
    /// Returns an error if the secret is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let jwt_secret = super::global_value(matches, ARG_JWT_SECRET)
            .context("missing required argument: --jwt-secret")?;
        let ttl = |name: &str| matches.get_one::<i64>(name).copied().unwrap_or(1);
        let otp_sweep_interval = matches
            .get_one::<u64>(ARG_OTP_SWEEP_INTERVAL)
            .copied()
            .filter(|seconds| *seconds > 0)
            .map(Duration::from_secs);

        Ok(Self {
            jwt_secret: SecretString::from(jwt_secret),
            user: ClassTtl {
                access_seconds: ttl(ARG_USER_ACCESS_TTL),
                refresh_seconds: ttl(ARG_USER_REFRESH_TTL),
            },
            partner: ClassTtl {
                access_seconds: ttl(ARG_PARTNER_ACCESS_TTL) * MINUTE,
                refresh_seconds: ttl(ARG_PARTNER_REFRESH_TTL) * DAY,
            },
            admin: ClassTtl {
                access_seconds: ttl(ARG_ADMIN_ACCESS_TTL) * MINUTE,
                refresh_seconds: ttl(ARG_ADMIN_REFRESH_TTL) * DAY,
            },
            unverified_token_ttl_seconds: ttl(ARG_UNVERIFIED_TOKEN_TTL),
            otp_sweep_interval,
        })
    }

    #[must_use]
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig::new(self.jwt_secret.clone())
            .with_class_ttl(PrincipalKind::User, self.user)
            .with_class_ttl(PrincipalKind::Partner, self.partner)
            .with_class_ttl(PrincipalKind::Admin, self.admin)
            .with_unverified_token_ttl_seconds(self.unverified_token_ttl_seconds)
    }
}
