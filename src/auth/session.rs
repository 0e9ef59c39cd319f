//! Refresh sessions: one live refresh token per principal.
//!
//! Only the SHA-256 of the refresh token is stored. Redemption needs both a
//! valid signature and a hash match against the stored row, so a token that
//! has been superseded by a newer sign-in or refresh is dead even though its
//! signature still checks out. Redemption always rotates, and rotation is a
//! compare-and-swap on the stored hash so two concurrent redemptions of the
//! same token cannot both succeed.
//!
//! Every failure is reported as [`AuthError::InvalidOrExpiredToken`], whether
//! the token was forged, expired or superseded.

use super::{
    error::{AuthError, AuthResult},
    principal::{Principal, PrincipalKind},
    token::{now_unix, IssuedToken, TokenCodec, TokenKind},
    utils::{digests_match, hash_refresh_token},
};
use crate::store::{AuthStore, RefreshSession};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::ToSchema;

/// Access/refresh pair handed to the client.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub principal: PrincipalKind,
    pub roles: Vec<String>,
}

#[derive(Clone)]
pub struct RefreshSessions {
    store: Arc<dyn AuthStore>,
    codec: TokenCodec,
}

impl RefreshSessions {
    #[must_use]
    pub fn new(store: Arc<dyn AuthStore>, codec: TokenCodec) -> Self {
        Self { store, codec }
    }

    /// Mint a fresh pair for `principal`, replacing any existing session and
    /// stamping `last_login_at`.
    ///
    /// # Errors
    /// Returns [`AuthError::Internal`] if signing or the store fails.
    #[instrument(skip(self, principal), fields(principal_id = principal.id, kind = %principal.kind))]
    pub async fn issue(&self, principal: &Principal) -> AuthResult<TokenPair> {
        let (pair, session) = self.mint(principal, now_unix())?;
        self.store.replace_session(session, true).await?;
        Ok(pair)
    }

    /// Exchange a refresh token of a `kind` principal for a new pair.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidOrExpiredToken`] for every token or
    /// session problem, [`AuthError::Internal`] if the store fails.
    #[instrument(skip(self, token))]
    pub async fn redeem(&self, kind: PrincipalKind, token: &str) -> AuthResult<TokenPair> {
        self.redeem_at(kind, token, now_unix()).await
    }

    pub(crate) async fn redeem_at(
        &self,
        kind: PrincipalKind,
        token: &str,
        now: i64,
    ) -> AuthResult<TokenPair> {
        let claims = self.codec.verify_at(token, now)?;
        if claims.typ != TokenKind::Refresh || claims.principal != kind {
            return Err(AuthError::InvalidOrExpiredToken);
        }

        let session = self
            .store
            .find_session(kind, claims.sub)
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;
        if !digests_match(&session.token_hash, &hash_refresh_token(token)) {
            debug!(principal_id = claims.sub, "refresh token superseded");
            return Err(AuthError::InvalidOrExpiredToken);
        }
        if session.expires_at.timestamp() <= now {
            return Err(AuthError::InvalidOrExpiredToken);
        }

        // Reload so the new pair carries current roles and flags.
        let principal = self
            .store
            .find_by_id(kind, claims.sub)
            .await?
            .filter(|principal| principal.active)
            .ok_or(AuthError::InvalidOrExpiredToken)?;

        let (pair, next) = self.mint(&principal, now)?;
        if self.store.rotate_session(&session.token_hash, next).await? {
            Ok(pair)
        } else {
            debug!(principal_id = claims.sub, "lost refresh rotation race");
            Err(AuthError::InvalidOrExpiredToken)
        }
    }

    /// Drop the principal's session. Returns whether one existed.
    ///
    /// # Errors
    /// Returns [`AuthError::Internal`] if the store fails.
    pub async fn revoke(&self, kind: PrincipalKind, principal_id: i64) -> AuthResult<bool> {
        self.store.delete_session(kind, principal_id).await
    }

    fn mint(&self, principal: &Principal, now: i64) -> AuthResult<(TokenPair, RefreshSession)> {
        let access = self
            .codec
            .issue_at(principal, TokenKind::Access, now)
            .map_err(|err| anyhow!("failed to sign access token: {err}"))?;
        let refresh = self
            .codec
            .issue_at(principal, TokenKind::Refresh, now)
            .map_err(|err| anyhow!("failed to sign refresh token: {err}"))?;

        let session = RefreshSession {
            kind: principal.kind,
            principal_id: principal.id,
            token_hash: hash_refresh_token(&refresh.token),
            expires_at: expiry_of(&refresh)?,
        };
        let pair = TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "Bearer".to_string(),
            expires_in: access.expires_in,
            principal: principal.kind,
            roles: principal.roles.clone(),
        };
        Ok((pair, session))
    }
}

fn expiry_of(issued: &IssuedToken) -> AuthResult<DateTime<Utc>> {
    DateTime::from_timestamp(issued.claims.exp, 0)
        .ok_or_else(|| anyhow!("refresh expiry out of range").into())
}
