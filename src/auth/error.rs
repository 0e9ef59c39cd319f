//! Error taxonomy surfaced by the auth core.
//!
//! Every variant carries a stable snake_case tag. Callers match on the variant,
//! clients only ever see the tag. Storage failures are folded into
//! [`AuthError::Internal`] and rendered as `internal_error`.

use super::token::TokenError;
use thiserror::Error;

/// Entity named by `NotFound`, `AlreadyExists` and `AlreadyAssigned`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resource {
    Principal,
    Admin,
    Role,
    Permission,
    Assignment,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account inactive")]
    AccountInactive,
    #[error("invalid or expired token")]
    InvalidOrExpiredToken,
    #[error("account not verified")]
    AccountNotVerified,
    #[error("invalid or expired code")]
    InvalidOrExpiredCode,
    #[error("a code is already outstanding, wait for it to expire")]
    CodeAlreadyOutstanding,
    #[error("rate limit exceeded")]
    RateLimitExceeded,
    #[error("permission denied")]
    PermissionDenied,
    #[error("{0:?} not found")]
    NotFound(Resource),
    #[error("{0:?} already exists")]
    AlreadyExists(Resource),
    #[error("{0:?} already assigned")]
    AlreadyAssigned(Resource),
    #[error("email already verified")]
    AlreadyVerified,
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    /// Stable identifier sent to clients.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::AccountInactive => "account_inactive",
            Self::InvalidOrExpiredToken => "invalid_or_expired_token",
            Self::AccountNotVerified => "account_not_verified",
            Self::InvalidOrExpiredCode => "invalid_or_expired_code",
            Self::CodeAlreadyOutstanding => "code_already_outstanding",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound(resource) => match resource {
                Resource::Principal => "principal_not_found",
                Resource::Admin => "admin_not_found",
                Resource::Role => "role_not_found",
                Resource::Permission => "permission_not_found",
                Resource::Assignment => "assignment_not_found",
            },
            Self::AlreadyExists(resource) => match resource {
                Resource::Role => "role_exists",
                Resource::Permission => "permission_exists",
                _ => "email_already_registered",
            },
            Self::AlreadyAssigned(resource) => match resource {
                Resource::Permission => "permission_already_assigned",
                _ => "role_already_assigned",
            },
            Self::AlreadyVerified => "email_already_verified",
            Self::InvalidInput(_) => "invalid_input",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(_: TokenError) -> Self {
        Self::InvalidOrExpiredToken
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(anyhow::Error::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_stable() {
        assert_eq!(AuthError::InvalidCredentials.tag(), "invalid_credentials");
        assert_eq!(
            AuthError::NotFound(Resource::Role).tag(),
            "role_not_found"
        );
        assert_eq!(
            AuthError::AlreadyExists(Resource::Principal).tag(),
            "email_already_registered"
        );
        assert_eq!(
            AuthError::AlreadyAssigned(Resource::Permission).tag(),
            "permission_already_assigned"
        );
        assert_eq!(
            AuthError::Internal(anyhow::anyhow!("db down")).tag(),
            "internal_error"
        );
    }

    #[test]
    fn token_failures_collapse_to_one_tag() {
        for err in [
            TokenError::InvalidSignature,
            TokenError::Expired,
            TokenError::Malformed,
        ] {
            assert_eq!(AuthError::from(err).tag(), "invalid_or_expired_token");
        }
    }
}
