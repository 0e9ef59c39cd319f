//! Sign-up, verification, sign-in, refresh and sign-out for every principal class.
//!
//! Flow Overview:
//! 1) Signup creates the principal unverified together with its first code.
//!    Users get a limited access token so they can reach the OTP endpoints;
//!    partners re-entering signup before verifying are pointed back to OTP.
//! 2) Verification consumes the code and flips `email_verified`.
//! 3) Sign-in checks the password first, then `active`, then verification.
//!    Unknown emails still pay for one Argon2 verify against a decoy hash and
//!    return the same `invalid_credentials` as a wrong password.
//! 4) Refresh and sign-out go through [`RefreshSessions`].
//! 5) Protected calls turn a bearer token into an [`AuthenticatedPrincipal`]
//!    once, and permission checks hit the store every time.

use super::{
    config::AuthConfig,
    error::{AuthError, AuthResult, Resource},
    otp::{CodeSender, OtpPurpose, OtpVerifier},
    password::{decoy_hash, hash_password, verify_password},
    principal::{
        AuthenticatedPrincipal, NewPrincipal, Principal, PrincipalKind, DEFAULT_USER_ROLE,
    },
    rbac::Rbac,
    session::{RefreshSessions, TokenPair},
    token::{TokenCodec, TokenKind},
    utils::{normalize_email, normalize_phone, valid_email},
};
use crate::store::{AuthStore, Role};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct Signup {
    pub display_name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    PendingVerification,
    Verified,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct SignupOutcome {
    pub principal_id: i64,
    pub principal: PrincipalKind,
    pub status: AccountStatus,
    pub next_action: String,
    /// Limited access token, users only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct CodeSent {
    pub purpose: OtpPurpose,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct Profile {
    pub id: i64,
    pub principal: PrincipalKind,
    pub display_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub roles: Vec<String>,
    pub email_verified: bool,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<Principal> for Profile {
    fn from(principal: Principal) -> Self {
        Self {
            id: principal.id,
            principal: principal.kind,
            display_name: principal.display_name,
            email: principal.email,
            phone: principal.phone,
            roles: principal.roles,
            email_verified: principal.email_verified,
            last_login_at: principal.last_login_at,
        }
    }
}

/// Code purpose used to verify a principal class.
#[must_use]
pub fn verification_purpose(kind: PrincipalKind) -> OtpPurpose {
    match kind {
        PrincipalKind::User => OtpPurpose::Signup,
        PrincipalKind::Partner | PrincipalKind::Admin => OtpPurpose::EmailVerification,
    }
}

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn AuthStore>,
    codec: TokenCodec,
    sessions: RefreshSessions,
    otp: OtpVerifier,
    rbac: Rbac,
    decoy_hash: SecretString,
}

impl AuthService {
    /// Wire every component around one store.
    ///
    /// # Errors
    /// Returns an error if the decoy password hash cannot be computed.
    pub fn new(
        store: Arc<dyn AuthStore>,
        sender: Arc<dyn CodeSender>,
        config: AuthConfig,
    ) -> Result<Self> {
        let codec = TokenCodec::new(config.clone());
        Ok(Self {
            sessions: RefreshSessions::new(store.clone(), codec.clone()),
            otp: OtpVerifier::new(store.clone(), sender, config),
            rbac: Rbac::new(store.clone()),
            decoy_hash: SecretString::from(decoy_hash()?),
            codec,
            store,
        })
    }

    #[must_use]
    pub fn rbac(&self) -> &Rbac {
        &self.rbac
    }

    #[must_use]
    pub fn otp(&self) -> &OtpVerifier {
        &self.otp
    }

    #[must_use]
    pub fn sessions(&self) -> &RefreshSessions {
        &self.sessions
    }

    /// Register a user or partner, unverified, with a first code on its way.
    ///
    /// # Errors
    /// - [`AuthError::InvalidInput`] for missing fields or an admin signup
    /// - [`AuthError::AlreadyExists`] for a taken email or phone
    #[instrument(skip(self, input))]
    pub async fn signup(&self, kind: PrincipalKind, input: Signup) -> AuthResult<SignupOutcome> {
        if kind == PrincipalKind::Admin {
            return Err(AuthError::InvalidInput("admins cannot sign up"));
        }
        let display_name = input.display_name.trim().to_string();
        let email = normalize_email(&input.email);
        let phone = normalize_phone(input.phone.as_deref());
        if display_name.is_empty() {
            return Err(AuthError::InvalidInput("display_name is required"));
        }
        if !valid_email(&email) {
            return Err(AuthError::InvalidInput("a valid email is required"));
        }
        if input.password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::InvalidInput("password must be at least 8 characters"));
        }

        if let Some(existing) = self.store.find_by_email(kind, &email).await? {
            if kind == PrincipalKind::Partner && !existing.email_verified {
                info!(principal_id = existing.id, "partner signup re-entry");
                return Ok(SignupOutcome {
                    principal_id: existing.id,
                    principal: kind,
                    status: AccountStatus::PendingVerification,
                    next_action: "verify_otp".to_string(),
                    access_token: None,
                    expires_in: None,
                });
            }
            return Err(AuthError::AlreadyExists(Resource::Principal));
        }
        if let Some(phone) = phone.as_deref() {
            if self.store.phone_taken(kind, phone).await? {
                return Err(AuthError::AlreadyExists(Resource::Principal));
            }
        }

        let password_hash = hash_password(&input.password)?;
        let purpose = verification_purpose(kind);
        let (principal, code) = self
            .store
            .create_principal_with_code(
                NewPrincipal {
                    kind,
                    display_name,
                    email,
                    phone,
                    password_hash: SecretString::from(password_hash),
                    role: (kind == PrincipalKind::User).then(|| DEFAULT_USER_ROLE.to_string()),
                    active: true,
                    email_verified: false,
                },
                self.otp.pending(purpose, Utc::now()),
            )
            .await?;
        self.otp.deliver(&principal.email, &code);
        info!(principal_id = principal.id, "signup pending verification");

        let mut outcome = SignupOutcome {
            principal_id: principal.id,
            principal: kind,
            status: AccountStatus::PendingVerification,
            next_action: "verify_otp".to_string(),
            access_token: None,
            expires_in: None,
        };
        if kind == PrincipalKind::User {
            let limited = self
                .codec
                .issue_limited(&principal)
                .map_err(|err| anyhow!("failed to sign limited token: {err}"))?;
            outcome.access_token = Some(limited.token);
            outcome.expires_in = Some(limited.expires_in);
        }
        Ok(outcome)
    }

    /// Verify the principal's email with a code.
    ///
    /// # Errors
    /// - [`AuthError::InvalidOrExpiredCode`] for a wrong, used or expired code
    /// - [`AuthError::AlreadyVerified`] when nothing is left to verify
    #[instrument(skip(self, code))]
    pub async fn verify_code(
        &self,
        kind: PrincipalKind,
        principal_id: i64,
        code: &str,
    ) -> AuthResult<AccountStatus> {
        let principal = self
            .store
            .find_by_id(kind, principal_id)
            .await?
            .ok_or(AuthError::InvalidOrExpiredCode)?;
        self.verify_loaded(&principal, code).await
    }

    /// [`Self::verify_code`] addressed by email. Unknown emails look like a
    /// wrong code.
    ///
    /// # Errors
    /// Same as [`Self::verify_code`].
    #[instrument(skip(self, email, code))]
    pub async fn verify_code_by_email(
        &self,
        kind: PrincipalKind,
        email: &str,
        code: &str,
    ) -> AuthResult<AccountStatus> {
        let principal = self
            .store
            .find_by_email(kind, &normalize_email(email))
            .await?
            .ok_or(AuthError::InvalidOrExpiredCode)?;
        self.verify_loaded(&principal, code).await
    }

    /// Send a new code once the previous one is no longer live.
    ///
    /// # Errors
    /// - [`AuthError::NotFound`] for an unknown principal
    /// - [`AuthError::AlreadyVerified`] when nothing is left to verify
    /// - [`AuthError::CodeAlreadyOutstanding`] or [`AuthError::RateLimitExceeded`]
    #[instrument(skip(self))]
    pub async fn resend_code(&self, kind: PrincipalKind, principal_id: i64) -> AuthResult<CodeSent> {
        let principal = self
            .store
            .find_by_id(kind, principal_id)
            .await?
            .ok_or(AuthError::NotFound(Resource::Principal))?;
        self.resend_loaded(&principal).await
    }

    /// [`Self::resend_code`] addressed by email.
    ///
    /// # Errors
    /// Same as [`Self::resend_code`].
    #[instrument(skip(self, email))]
    pub async fn resend_code_by_email(&self, kind: PrincipalKind, email: &str) -> AuthResult<CodeSent> {
        let principal = self
            .store
            .find_by_email(kind, &normalize_email(email))
            .await?
            .ok_or(AuthError::NotFound(Resource::Principal))?;
        self.resend_loaded(&principal).await
    }

    /// Exchange email and password for a token pair.
    ///
    /// # Errors
    /// - [`AuthError::InvalidCredentials`] for an unknown email or a wrong password
    /// - [`AuthError::AccountInactive`] when the account is disabled
    /// - [`AuthError::AccountNotVerified`] for an unverified user or partner
    #[instrument(skip(self, email, password))]
    pub async fn sign_in(
        &self,
        kind: PrincipalKind,
        email: &str,
        password: &str,
    ) -> AuthResult<TokenPair> {
        let email = normalize_email(email);
        let Some(principal) = self.store.find_by_email(kind, &email).await? else {
            let _ = verify_password(password, self.decoy_hash.expose_secret());
            return Err(AuthError::InvalidCredentials);
        };
        if !verify_password(password, principal.password_hash.expose_secret()) {
            warn!(principal_id = principal.id, "sign-in with wrong password");
            return Err(AuthError::InvalidCredentials);
        }
        if !principal.active {
            return Err(AuthError::AccountInactive);
        }
        if kind.requires_verified_email() && !principal.email_verified {
            return Err(AuthError::AccountNotVerified);
        }

        let pair = self.sessions.issue(&principal).await?;
        info!(principal_id = principal.id, "signed in");
        Ok(pair)
    }

    /// # Errors
    /// Returns [`AuthError::InvalidOrExpiredToken`] for any refresh failure.
    pub async fn refresh(&self, kind: PrincipalKind, refresh_token: &str) -> AuthResult<TokenPair> {
        self.sessions.redeem(kind, refresh_token).await
    }

    /// Revoke the caller's refresh session.
    ///
    /// # Errors
    /// Returns [`AuthError::Internal`] if the store fails.
    #[instrument(skip(self, principal), fields(principal_id = principal.id, kind = %principal.kind))]
    pub async fn sign_out(&self, principal: &AuthenticatedPrincipal) -> AuthResult<()> {
        self.sessions.revoke(principal.kind, principal.id).await?;
        Ok(())
    }

    /// Turn a bearer access token into an identity. Refresh tokens are refused;
    /// limited tokens pass and must be screened with
    /// [`AuthenticatedPrincipal::require_full_access`].
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidOrExpiredToken`].
    pub fn authenticate(&self, access_token: &str) -> AuthResult<AuthenticatedPrincipal> {
        let claims = self.codec.verify(access_token)?;
        if claims.typ != TokenKind::Access {
            return Err(AuthError::InvalidOrExpiredToken);
        }
        Ok(claims.into())
    }

    /// # Errors
    /// Returns [`AuthError::PermissionDenied`] for non-admins and admins
    /// lacking the permission.
    pub async fn require_permission(
        &self,
        principal: &AuthenticatedPrincipal,
        permission: &str,
    ) -> AuthResult<()> {
        if principal.kind != PrincipalKind::Admin {
            return Err(AuthError::PermissionDenied);
        }
        self.rbac.require(principal.id, permission).await
    }

    /// # Errors
    /// Returns [`AuthError::PermissionDenied`] unless the caller holds a
    /// super admin role right now.
    pub async fn require_super_admin(&self, principal: &AuthenticatedPrincipal) -> AuthResult<()> {
        if principal.kind == PrincipalKind::Admin && self.rbac.is_super_admin(principal.id).await? {
            Ok(())
        } else {
            Err(AuthError::PermissionDenied)
        }
    }

    /// Current stored profile of the caller.
    ///
    /// # Errors
    /// Returns [`AuthError::NotFound`] when the row is gone.
    pub async fn profile(&self, principal: &AuthenticatedPrincipal) -> AuthResult<Profile> {
        self.store
            .find_by_id(principal.kind, principal.id)
            .await?
            .map(Profile::from)
            .ok_or(AuthError::NotFound(Resource::Principal))
    }

    /// Create an active, verified admin holding the `super_admin` role.
    ///
    /// # Errors
    /// - [`AuthError::InvalidInput`] for missing fields
    /// - [`AuthError::AlreadyExists`] when the email is taken
    #[instrument(skip(self, password))]
    pub async fn bootstrap_super_admin(
        &self,
        display_name: &str,
        email: &str,
        password: &str,
    ) -> AuthResult<(Principal, Role)> {
        let display_name = display_name.trim();
        let email = normalize_email(email);
        if display_name.is_empty() {
            return Err(AuthError::InvalidInput("display_name is required"));
        }
        if !valid_email(&email) {
            return Err(AuthError::InvalidInput("a valid email is required"));
        }
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::InvalidInput("password must be at least 8 characters"));
        }

        let role = self.rbac.ensure_super_admin_role().await?;
        let admin = self
            .store
            .create_admin_with_role(
                NewPrincipal {
                    kind: PrincipalKind::Admin,
                    display_name: display_name.to_string(),
                    email,
                    phone: None,
                    password_hash: SecretString::from(hash_password(password)?),
                    role: None,
                    active: true,
                    email_verified: true,
                },
                role.id,
            )
            .await?;
        info!(admin_id = admin.id, "super admin bootstrapped");
        Ok((admin, role))
    }

    async fn verify_loaded(&self, principal: &Principal, code: &str) -> AuthResult<AccountStatus> {
        if principal.email_verified {
            return Err(AuthError::AlreadyVerified);
        }
        self.otp
            .verify(
                principal.id,
                principal.kind,
                verification_purpose(principal.kind),
                code,
            )
            .await?;
        info!(principal_id = principal.id, "email verified");
        Ok(AccountStatus::Verified)
    }

    async fn resend_loaded(&self, principal: &Principal) -> AuthResult<CodeSent> {
        if principal.email_verified {
            return Err(AuthError::AlreadyVerified);
        }
        let code = self
            .otp
            .resend(
                principal.id,
                principal.kind,
                verification_purpose(principal.kind),
            )
            .await?;
        self.otp.deliver(&principal.email, &code);
        Ok(CodeSent {
            purpose: code.purpose,
            expires_at: code.expires_at,
        })
    }
}
