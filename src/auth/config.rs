//! Token lifetimes and one-time code policy.

use super::{otp::OtpPurpose, principal::PrincipalKind, token::TokenKind};
use secrecy::SecretString;

const DEFAULT_USER_ACCESS_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_USER_REFRESH_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_PARTNER_ACCESS_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_PARTNER_REFRESH_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_ADMIN_ACCESS_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_ADMIN_REFRESH_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_UNVERIFIED_TOKEN_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_OTP_LENGTH: usize = 6;
const DEFAULT_EMAIL_VERIFICATION_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_SIGNUP_CODE_TTL_SECONDS: i64 = 30 * 60;
const DEFAULT_SIGNUP_CODES_PER_HOUR: u32 = 3;

/// Access/refresh lifetime pair for one principal class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClassTtl {
    pub access_seconds: i64,
    pub refresh_seconds: i64,
}

/// Per-purpose code lifetime and optional rolling-hour cap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OtpPolicy {
    pub ttl_seconds: i64,
    pub hourly_cap: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    jwt_secret: SecretString,
    user: ClassTtl,
    partner: ClassTtl,
    admin: ClassTtl,
    unverified_token_ttl_seconds: i64,
    otp_length: usize,
    email_verification: OtpPolicy,
    signup: OtpPolicy,
}

impl AuthConfig {
    #[must_use]
    pub fn new(jwt_secret: SecretString) -> Self {
        Self {
            jwt_secret,
            user: ClassTtl {
                access_seconds: DEFAULT_USER_ACCESS_TTL_SECONDS,
                refresh_seconds: DEFAULT_USER_REFRESH_TTL_SECONDS,
            },
            partner: ClassTtl {
                access_seconds: DEFAULT_PARTNER_ACCESS_TTL_SECONDS,
                refresh_seconds: DEFAULT_PARTNER_REFRESH_TTL_SECONDS,
            },
            admin: ClassTtl {
                access_seconds: DEFAULT_ADMIN_ACCESS_TTL_SECONDS,
                refresh_seconds: DEFAULT_ADMIN_REFRESH_TTL_SECONDS,
            },
            unverified_token_ttl_seconds: DEFAULT_UNVERIFIED_TOKEN_TTL_SECONDS,
            otp_length: DEFAULT_OTP_LENGTH,
            email_verification: OtpPolicy {
                ttl_seconds: DEFAULT_EMAIL_VERIFICATION_TTL_SECONDS,
                hourly_cap: None,
            },
            signup: OtpPolicy {
                ttl_seconds: DEFAULT_SIGNUP_CODE_TTL_SECONDS,
                hourly_cap: Some(DEFAULT_SIGNUP_CODES_PER_HOUR),
            },
        }
    }

    #[must_use]
    pub fn with_class_ttl(mut self, kind: PrincipalKind, ttl: ClassTtl) -> Self {
        match kind {
            PrincipalKind::User => self.user = ttl,
            PrincipalKind::Partner => self.partner = ttl,
            PrincipalKind::Admin => self.admin = ttl,
        }
        self
    }

    #[must_use]
    pub fn with_unverified_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.unverified_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_otp_length(mut self, length: usize) -> Self {
        self.otp_length = length.max(1);
        self
    }

    #[must_use]
    pub fn with_otp_policy(mut self, purpose: OtpPurpose, policy: OtpPolicy) -> Self {
        match purpose {
            OtpPurpose::EmailVerification => self.email_verification = policy,
            OtpPurpose::Signup => self.signup = policy,
        }
        self
    }

    #[must_use]
    pub fn jwt_secret(&self) -> &SecretString {
        &self.jwt_secret
    }

    #[must_use]
    pub fn class_ttl(&self, kind: PrincipalKind) -> ClassTtl {
        match kind {
            PrincipalKind::User => self.user,
            PrincipalKind::Partner => self.partner,
            PrincipalKind::Admin => self.admin,
        }
    }

    /// Lifetime in seconds for a token of `token` kind issued to a `kind` principal.
    #[must_use]
    pub fn token_ttl_seconds(&self, kind: PrincipalKind, token: TokenKind) -> i64 {
        let ttl = self.class_ttl(kind);
        match token {
            TokenKind::Access => ttl.access_seconds,
            TokenKind::Refresh => ttl.refresh_seconds,
        }
    }

    #[must_use]
    pub fn unverified_token_ttl_seconds(&self) -> i64 {
        self.unverified_token_ttl_seconds
    }

    #[must_use]
    pub fn otp_length(&self) -> usize {
        self.otp_length
    }

    #[must_use]
    pub fn otp_policy(&self, purpose: OtpPurpose) -> OtpPolicy {
        match purpose {
            OtpPurpose::EmailVerification => self.email_verification,
            OtpPurpose::Signup => self.signup,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig::new(SecretString::from("test-secret".to_string()))
    }

    #[test]
    fn admin_access_is_shorter_and_refresh_longer() {
        let cfg = config();
        let admin = cfg.class_ttl(PrincipalKind::Admin);
        let user = cfg.class_ttl(PrincipalKind::User);
        let partner = cfg.class_ttl(PrincipalKind::Partner);
        assert!(admin.access_seconds < user.access_seconds);
        assert!(admin.access_seconds < partner.access_seconds);
        assert!(admin.refresh_seconds > user.refresh_seconds);
        assert!(admin.refresh_seconds > partner.refresh_seconds);
    }

    #[test]
    fn builder_overrides_class_ttl() {
        let cfg = config().with_class_ttl(
            PrincipalKind::Partner,
            ClassTtl {
                access_seconds: 60,
                refresh_seconds: 120,
            },
        );
        assert_eq!(
            cfg.token_ttl_seconds(PrincipalKind::Partner, TokenKind::Access),
            60
        );
        assert_eq!(
            cfg.token_ttl_seconds(PrincipalKind::Partner, TokenKind::Refresh),
            120
        );
        assert_eq!(
            cfg.token_ttl_seconds(PrincipalKind::User, TokenKind::Access),
            DEFAULT_USER_ACCESS_TTL_SECONDS
        );
    }

    #[test]
    fn only_signup_codes_are_capped() {
        let cfg = config();
        assert_eq!(cfg.otp_policy(OtpPurpose::Signup).hourly_cap, Some(3));
        assert_eq!(cfg.otp_policy(OtpPurpose::EmailVerification).hourly_cap, None);
        assert_eq!(cfg.otp_length(), 6);
        assert_eq!(config().with_otp_length(0).otp_length(), 1);
    }
}
