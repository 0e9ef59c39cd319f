//! Principal model shared by users, partners and admins.
//!
//! The three classes differ only in where their rows live, how roles are
//! attached and whether sign-in requires a verified email. Everything else
//! goes through one code path keyed by [`PrincipalKind`].

use super::{
    error::{AuthError, AuthResult},
    token::Claims,
};
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Role name that grants every admin permission.
pub const SUPER_ADMIN_ROLE: &str = "super_admin";
/// Role stamped on partner tokens.
pub const PARTNER_ROLE: &str = "partner";
/// Tier assigned to users that sign up without an explicit role.
pub const DEFAULT_USER_ROLE: &str = "user";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    User,
    Partner,
    Admin,
}

impl PrincipalKind {
    pub const ALL: [Self; 3] = [Self::User, Self::Partner, Self::Admin];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Partner => "partner",
            Self::Admin => "admin",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "partner" => Some(Self::Partner),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Users and partners must prove control of their email before signing in.
    #[must_use]
    pub fn requires_verified_email(self) -> bool {
        !matches!(self, Self::Admin)
    }
}

impl fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored principal as seen by the auth core.
#[derive(Clone, Debug)]
pub struct Principal {
    pub id: i64,
    pub kind: PrincipalKind,
    pub display_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: SecretString,
    pub active: bool,
    pub email_verified: bool,
    /// Users carry one tier, partners a fixed role, admins their assigned roles.
    pub roles: Vec<String>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Principal {
    #[must_use]
    pub fn is_super_admin(&self) -> bool {
        self.kind == PrincipalKind::Admin && self.roles.iter().any(|r| r == SUPER_ADMIN_ROLE)
    }
}

/// Input for creating a principal row.
#[derive(Clone, Debug)]
pub struct NewPrincipal {
    pub kind: PrincipalKind,
    pub display_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: SecretString,
    /// Tier for users; ignored for partners and admins.
    pub role: Option<String>,
    pub active: bool,
    pub email_verified: bool,
}

/// Identity established from a verified access token, produced once per
/// request and passed explicitly to whatever needs it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct AuthenticatedPrincipal {
    pub id: i64,
    pub kind: PrincipalKind,
    pub display_name: String,
    pub email: String,
    pub roles: Vec<String>,
    pub email_verified: bool,
    /// Issued at signup before verification; only good for the OTP endpoints.
    pub limited: bool,
}

impl AuthenticatedPrincipal {
    /// Reject limited tokens and unverified users or partners.
    ///
    /// # Errors
    /// Returns [`AuthError::AccountNotVerified`].
    pub fn require_full_access(&self) -> AuthResult<()> {
        if self.limited || (self.kind.requires_verified_email() && !self.email_verified) {
            return Err(AuthError::AccountNotVerified);
        }
        Ok(())
    }
}

impl From<Claims> for AuthenticatedPrincipal {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            kind: claims.principal,
            display_name: claims.name,
            email: claims.email,
            roles: claims.roles,
            email_verified: claims.email_verified,
            limited: claims.limited,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_text() {
        for kind in PrincipalKind::ALL {
            assert_eq!(PrincipalKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(PrincipalKind::parse("employee"), None);
    }

    #[test]
    fn kind_serializes_snake_case() -> anyhow::Result<()> {
        assert_eq!(serde_json::to_string(&PrincipalKind::Partner)?, "\"partner\"");
        let kind: PrincipalKind = serde_json::from_str("\"admin\"")?;
        assert_eq!(kind, PrincipalKind::Admin);
        Ok(())
    }

    #[test]
    fn only_admins_skip_email_verification() {
        assert!(PrincipalKind::User.requires_verified_email());
        assert!(PrincipalKind::Partner.requires_verified_email());
        assert!(!PrincipalKind::Admin.requires_verified_email());
    }

    #[test]
    fn limited_or_unverified_identity_lacks_full_access() {
        let mut who = AuthenticatedPrincipal {
            id: 3,
            kind: PrincipalKind::User,
            display_name: "Nadia".to_string(),
            email: "nadia@carhub.dev".to_string(),
            roles: vec![DEFAULT_USER_ROLE.to_string()],
            email_verified: true,
            limited: false,
        };
        assert!(who.require_full_access().is_ok());

        who.limited = true;
        assert!(matches!(
            who.require_full_access(),
            Err(AuthError::AccountNotVerified)
        ));

        who.limited = false;
        who.email_verified = false;
        assert!(who.require_full_access().is_err());

        who.kind = PrincipalKind::Admin;
        assert!(who.require_full_access().is_ok());
    }
}
