//! HS256 claim tokens for access and refresh.
//!
//! The codec is a pure primitive: it signs, checks the signature and the
//! expiry, and hands back the claims. Whether a token is a refresh token or a
//! limited one is carried in the claims and enforced by the callers.

use super::{
    config::AuthConfig,
    principal::{Principal, PrincipalKind},
};
use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use ulid::Ulid;

type HmacSha256 = Hmac<Sha256>;

const ALG: &str = "HS256";

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("malformed token")]
    Malformed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Claim set embedded in every token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub principal: PrincipalKind,
    pub name: String,
    pub email: String,
    /// Role names at issuance time; later role changes do not rewrite them.
    pub roles: Vec<String>,
    pub email_verified: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub limited: bool,
    pub typ: TokenKind,
    /// Unique per token so two tokens minted in the same second never collide.
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// A freshly signed token together with what was signed.
#[derive(Clone, Debug)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
    pub expires_in: i64,
}

#[derive(Clone, Debug)]
pub struct TokenCodec {
    secret: SecretString,
    config: AuthConfig,
}

impl TokenCodec {
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        Self {
            secret: config.jwt_secret().clone(),
            config,
        }
    }

    /// Issue an access or refresh token for `principal` using its class TTL.
    ///
    /// # Errors
    /// Returns [`TokenError::Malformed`] if the claims cannot be encoded.
    pub fn issue(&self, principal: &Principal, kind: TokenKind) -> Result<IssuedToken, TokenError> {
        self.issue_at(principal, kind, now_unix())
    }

    /// Short-lived access token for a principal that has not verified its email.
    ///
    /// # Errors
    /// Returns [`TokenError::Malformed`] if the claims cannot be encoded.
    pub fn issue_limited(&self, principal: &Principal) -> Result<IssuedToken, TokenError> {
        let ttl = self.config.unverified_token_ttl_seconds();
        let mut claims = claims_for(principal, TokenKind::Access, now_unix(), ttl);
        claims.limited = true;
        self.sign(claims, ttl)
    }

    pub(crate) fn issue_at(
        &self,
        principal: &Principal,
        kind: TokenKind,
        now: i64,
    ) -> Result<IssuedToken, TokenError> {
        let ttl = self.config.token_ttl_seconds(principal.kind, kind);
        self.sign(claims_for(principal, kind, now, ttl), ttl)
    }

    /// Verify signature and expiry and return the claims.
    ///
    /// # Errors
    /// - [`TokenError::Malformed`] when the token shape, base64 or JSON is invalid
    /// - [`TokenError::InvalidSignature`] for a foreign algorithm or a bad MAC
    /// - [`TokenError::Expired`] once `exp` has passed
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_at(token, now_unix())
    }

    pub(crate) fn verify_at(&self, token: &str, now: i64) -> Result<Claims, TokenError> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(TokenError::Malformed)?;
        let claims_b64 = parts.next().ok_or(TokenError::Malformed)?;
        let sig_b64 = parts.next().ok_or(TokenError::Malformed)?;
        if parts.next().is_some() {
            return Err(TokenError::Malformed);
        }

        let header: Header = b64d_json(header_b64)?;
        if header.alg != ALG {
            return Err(TokenError::InvalidSignature);
        }

        let signature =
            Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| TokenError::InvalidSignature)?;
        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let claims: Claims = b64d_json(claims_b64)?;
        if claims.exp <= now {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    /// Sign an arbitrary claim set.
    ///
    /// # Errors
    /// Returns [`TokenError::Malformed`] if the claims cannot be encoded.
    pub fn encode(&self, claims: &Claims) -> Result<String, TokenError> {
        let header = Header {
            alg: ALG.to_string(),
            typ: "JWT".to_string(),
        };
        let signing_input = format!("{}.{}", b64e_json(&header)?, b64e_json(claims)?);
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes());
        Ok(format!("{signing_input}.{signature}"))
    }

    fn sign(&self, claims: Claims, ttl: i64) -> Result<IssuedToken, TokenError> {
        let token = self.encode(&claims)?;
        Ok(IssuedToken {
            token,
            claims,
            expires_in: ttl,
        })
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| TokenError::InvalidSignature)
    }
}

fn claims_for(principal: &Principal, kind: TokenKind, now: i64, ttl: i64) -> Claims {
    Claims {
        sub: principal.id,
        principal: principal.kind,
        name: principal.display_name.clone(),
        email: principal.email.clone(),
        roles: principal.roles.clone(),
        email_verified: principal.email_verified,
        limited: false,
        typ: kind,
        jti: Ulid::new().to_string(),
        iat: now,
        exp: now + ttl,
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value).map_err(|_| TokenError::Malformed)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}

pub(crate) fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
