//! One-time code issuance and verification.
//!
//! Codes are scoped to `(owner id, owner kind, purpose)`. At most one unused,
//! unexpired code exists per scope: `resend` refuses while one is live, and the
//! `signup` purpose is further capped per rolling hour. Verification consumes
//! the code and flips `email_verified` in one store operation.
//!
//! Delivery goes through [`CodeSender`]. The default [`LogCodeSender`] only
//! writes the code to the debug log, which is enough for local development.

use super::{
    config::AuthConfig,
    error::{AuthError, AuthResult},
    principal::PrincipalKind,
};
use crate::store::{AuthStore, CodeCap, NewCode, OneTimeCode, PendingCode};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rand::{distributions::Uniform, rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tracing::{debug, error, instrument};
use utoipa::ToSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    /// Partner email confirmation.
    EmailVerification,
    /// End-user signup confirmation, capped per hour.
    Signup,
}

impl OtpPurpose {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmailVerification => "email_verification",
            Self::Signup => "signup",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "email_verification" => Some(Self::EmailVerification),
            "signup" => Some(Self::Signup),
            _ => None,
        }
    }
}

impl fmt::Display for OtpPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric code of `length` digits drawn uniformly from the OS RNG.
#[must_use]
pub fn generate_code(length: usize) -> String {
    let digits = Uniform::new_inclusive(b'0', b'9');
    OsRng
        .sample_iter(digits)
        .take(length)
        .map(char::from)
        .collect()
}

#[derive(Clone, Debug)]
pub struct CodeMessage {
    pub to_email: String,
    pub purpose: OtpPurpose,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Code delivery abstraction.
pub trait CodeSender: Send + Sync {
    /// Deliver a code or return an error; the code stays valid either way.
    fn send(&self, message: &CodeMessage) -> Result<()>;
}

/// Local dev sender that logs the code instead of mailing it.
#[derive(Clone, Debug)]
pub struct LogCodeSender;

impl CodeSender for LogCodeSender {
    fn send(&self, message: &CodeMessage) -> Result<()> {
        debug!(
            to_email = %message.to_email,
            purpose = %message.purpose,
            code = %message.code,
            expires_at = %message.expires_at,
            "one-time code send stub"
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct OtpVerifier {
    store: Arc<dyn AuthStore>,
    sender: Arc<dyn CodeSender>,
    config: AuthConfig,
}

impl OtpVerifier {
    #[must_use]
    pub fn new(store: Arc<dyn AuthStore>, sender: Arc<dyn CodeSender>, config: AuthConfig) -> Self {
        Self {
            store,
            sender,
            config,
        }
    }

    /// Fresh code for a scope whose owner row may not exist yet.
    #[must_use]
    pub fn pending(&self, purpose: OtpPurpose, now: DateTime<Utc>) -> PendingCode {
        let policy = self.config.otp_policy(purpose);
        PendingCode {
            purpose,
            code: generate_code(self.config.otp_length()),
            expires_at: now + Duration::seconds(policy.ttl_seconds),
        }
    }

    /// Persist a new code for the scope, without any gating.
    ///
    /// # Errors
    /// Returns [`AuthError::Internal`] if the store fails.
    pub async fn generate(
        &self,
        owner_id: i64,
        owner_kind: PrincipalKind,
        purpose: OtpPurpose,
    ) -> AuthResult<OneTimeCode> {
        self.store
            .insert_code(NewCode {
                owner_id,
                owner_kind,
                pending: self.pending(purpose, Utc::now()),
            })
            .await
    }

    /// Consume the matching live code and mark the owner verified.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidOrExpiredCode`] for a wrong, expired or
    /// already used code.
    #[instrument(skip(self, code))]
    pub async fn verify(
        &self,
        owner_id: i64,
        owner_kind: PrincipalKind,
        purpose: OtpPurpose,
        code: &str,
    ) -> AuthResult<()> {
        self.verify_at(owner_id, owner_kind, purpose, code, Utc::now())
            .await
    }

    pub(crate) async fn verify_at(
        &self,
        owner_id: i64,
        owner_kind: PrincipalKind,
        purpose: OtpPurpose,
        code: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<()> {
        let code = code.trim();
        if code.is_empty() {
            return Err(AuthError::InvalidOrExpiredCode);
        }
        if self
            .store
            .consume_code(owner_id, owner_kind, purpose, code, now)
            .await?
        {
            Ok(())
        } else {
            Err(AuthError::InvalidOrExpiredCode)
        }
    }

    /// Issue a replacement code once the previous one has expired or been used.
    ///
    /// # Errors
    /// - [`AuthError::CodeAlreadyOutstanding`] while a live code exists
    /// - [`AuthError::RateLimitExceeded`] when the purpose's hourly cap is reached
    #[instrument(skip(self))]
    pub async fn resend(
        &self,
        owner_id: i64,
        owner_kind: PrincipalKind,
        purpose: OtpPurpose,
    ) -> AuthResult<OneTimeCode> {
        self.resend_at(owner_id, owner_kind, purpose, Utc::now())
            .await
    }

    pub(crate) async fn resend_at(
        &self,
        owner_id: i64,
        owner_kind: PrincipalKind,
        purpose: OtpPurpose,
        now: DateTime<Utc>,
    ) -> AuthResult<OneTimeCode> {
        let cap = self
            .config
            .otp_policy(purpose)
            .hourly_cap
            .map(|max| CodeCap {
                since: now - Duration::hours(1),
                max: i64::from(max),
            });
        self.store
            .insert_code_if_clear(
                NewCode {
                    owner_id,
                    owner_kind,
                    pending: self.pending(purpose, now),
                },
                now,
                cap,
            )
            .await
    }

    /// Hand a persisted code to the sender. Delivery failures are logged, the
    /// caller's request still succeeds.
    pub fn deliver(&self, to_email: &str, code: &OneTimeCode) {
        let message = CodeMessage {
            to_email: to_email.to_string(),
            purpose: code.purpose,
            code: code.code.clone(),
            expires_at: code.expires_at,
        };
        if let Err(err) = self.sender.send(&message) {
            error!(purpose = %code.purpose, "one-time code delivery failed: {err}");
        }
    }

    /// Delete used and expired codes.
    ///
    /// # Errors
    /// Returns [`AuthError::Internal`] if the store fails.
    pub async fn sweep(&self) -> AuthResult<u64> {
        self.store.delete_spent_codes(Utc::now()).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{
        auth::principal::{NewPrincipal, Principal},
        store::{CodeStore, MemoryStore, PrincipalStore},
    };
    use secrecy::SecretString;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingSender {
        sent: Mutex<Vec<CodeMessage>>,
    }

    impl CodeSender for CapturingSender {
        fn send(&self, message: &CodeMessage) -> Result<()> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn verifier(store: Arc<MemoryStore>) -> OtpVerifier {
        OtpVerifier::new(
            store,
            Arc::new(LogCodeSender),
            AuthConfig::new(SecretString::from("otp-secret".to_string())),
        )
    }

    async fn partner(store: &MemoryStore) -> Principal {
        store
            .create_principal(NewPrincipal {
                kind: PrincipalKind::Partner,
                display_name: "Fleet Co".to_string(),
                email: "fleet@carhub.dev".to_string(),
                phone: None,
                password_hash: SecretString::from("hash".to_string()),
                role: None,
                active: true,
                email_verified: false,
            })
            .await
            .unwrap()
    }

    #[test]
    fn codes_are_numeric_with_requested_length() {
        for length in [1, 6, 8] {
            let code = generate_code(length);
            assert_eq!(code.len(), length);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn every_digit_shows_up() {
        let sample: String = (0..200).map(|_| generate_code(6)).collect();
        for digit in '0'..='9' {
            assert!(sample.contains(digit), "digit {digit} never drawn");
        }
    }

    #[test]
    fn purpose_round_trips_through_str() {
        for purpose in [OtpPurpose::EmailVerification, OtpPurpose::Signup] {
            assert_eq!(OtpPurpose::parse(purpose.as_str()), Some(purpose));
        }
        assert_eq!(OtpPurpose::parse("password_reset"), None);
    }

    #[tokio::test]
    async fn code_verifies_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let otp = verifier(store.clone());
        let owner = partner(&store).await;

        let before = Utc::now();
        let code = otp
            .generate(owner.id, owner.kind, OtpPurpose::EmailVerification)
            .await
            .unwrap();
        let after = Utc::now();
        assert!(code.expires_at >= before + Duration::minutes(10));
        assert!(code.expires_at <= after + Duration::minutes(10));

        otp.verify(owner.id, owner.kind, OtpPurpose::EmailVerification, &code.code)
            .await
            .unwrap();
        let reloaded = store.find_by_id(owner.kind, owner.id).await.unwrap().unwrap();
        assert!(reloaded.email_verified);

        let again = otp
            .verify(owner.id, owner.kind, OtpPurpose::EmailVerification, &code.code)
            .await;
        assert!(matches!(again, Err(AuthError::InvalidOrExpiredCode)));
    }

    #[tokio::test]
    async fn scope_must_match_on_every_key() {
        let store = Arc::new(MemoryStore::new());
        let otp = verifier(store.clone());
        let owner = partner(&store).await;
        let code = otp
            .generate(owner.id, owner.kind, OtpPurpose::EmailVerification)
            .await
            .unwrap();

        for (id, kind, purpose) in [
            (owner.id + 1, owner.kind, OtpPurpose::EmailVerification),
            (owner.id, PrincipalKind::User, OtpPurpose::EmailVerification),
            (owner.id, owner.kind, OtpPurpose::Signup),
        ] {
            let result = otp.verify(id, kind, purpose, &code.code).await;
            assert!(matches!(result, Err(AuthError::InvalidOrExpiredCode)));
        }
        assert!(otp.verify(owner.id, owner.kind, OtpPurpose::EmailVerification, "").await.is_err());
    }

    #[tokio::test]
    async fn expired_code_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let otp = verifier(store.clone());
        let owner = partner(&store).await;
        let code = otp
            .generate(owner.id, owner.kind, OtpPurpose::EmailVerification)
            .await
            .unwrap();

        let later = code.expires_at + Duration::seconds(1);
        let result = otp
            .verify_at(owner.id, owner.kind, OtpPurpose::EmailVerification, &code.code, later)
            .await;
        assert!(matches!(result, Err(AuthError::InvalidOrExpiredCode)));
    }

    #[tokio::test]
    async fn concurrent_resends_leave_one_live_code() {
        let store = Arc::new(MemoryStore::new());
        let otp = verifier(store.clone());
        let owner = partner(&store).await;
        otp.generate(owner.id, owner.kind, OtpPurpose::EmailVerification)
            .await
            .unwrap();
        store.expire_codes(owner.id, owner.kind).await;

        let (owner_id, owner_kind) = (owner.id, owner.kind);
        let tasks: Vec<_> = (0..12)
            .map(|_| {
                let otp = otp.clone();
                tokio::spawn(async move {
                    otp.resend(owner_id, owner_kind, OtpPurpose::EmailVerification)
                        .await
                })
            })
            .collect();
        let mut issued = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => issued += 1,
                Err(err) => assert!(matches!(err, AuthError::CodeAlreadyOutstanding)),
            }
        }
        assert_eq!(issued, 1);

        let live = store
            .count_live_codes(owner.id, owner.kind, OtpPurpose::EmailVerification, Utc::now())
            .await
            .unwrap();
        assert_eq!(live, 1);
    }

    #[tokio::test]
    async fn resend_waits_for_expiry_then_issues_new_code() {
        let store = Arc::new(MemoryStore::new());
        let otp = verifier(store.clone());
        let owner = partner(&store).await;
        let first = otp
            .generate(owner.id, owner.kind, OtpPurpose::EmailVerification)
            .await
            .unwrap();

        let blocked = otp
            .resend(owner.id, owner.kind, OtpPurpose::EmailVerification)
            .await;
        assert!(matches!(blocked, Err(AuthError::CodeAlreadyOutstanding)));

        store.expire_codes(owner.id, owner.kind).await;
        let second = otp
            .resend(owner.id, owner.kind, OtpPurpose::EmailVerification)
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
        assert!(second.expires_at > Utc::now());

        // The stale code stays dead even though a new one exists.
        let stale = otp
            .verify(owner.id, owner.kind, OtpPurpose::EmailVerification, &first.code)
            .await;
        if first.code != second.code {
            assert!(matches!(stale, Err(AuthError::InvalidOrExpiredCode)));
        }
    }

    #[tokio::test]
    async fn signup_purpose_is_capped_per_hour() {
        let store = Arc::new(MemoryStore::new());
        let otp = verifier(store.clone());
        let owner = partner(&store).await;

        for _ in 0..3 {
            otp.resend(owner.id, owner.kind, OtpPurpose::Signup)
                .await
                .unwrap();
            store.expire_codes(owner.id, owner.kind).await;
        }
        let capped = otp.resend(owner.id, owner.kind, OtpPurpose::Signup).await;
        assert!(matches!(capped, Err(AuthError::RateLimitExceeded)));

        store
            .age_codes(owner.id, owner.kind, Duration::minutes(61))
            .await;
        assert!(otp
            .resend(owner.id, owner.kind, OtpPurpose::Signup)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn deliver_hands_code_to_sender() {
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(CapturingSender::default());
        let otp = OtpVerifier::new(
            store.clone(),
            sender.clone(),
            AuthConfig::new(SecretString::from("otp-secret".to_string())),
        );
        let owner = partner(&store).await;
        let code = otp
            .generate(owner.id, owner.kind, OtpPurpose::EmailVerification)
            .await
            .unwrap();

        otp.deliver(&owner.email, &code);
        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_email, "fleet@carhub.dev");
        assert_eq!(sent[0].code, code.code);
    }

    #[tokio::test]
    async fn sweep_removes_spent_codes() {
        let store = Arc::new(MemoryStore::new());
        let otp = verifier(store.clone());
        let owner = partner(&store).await;
        let used = otp
            .generate(owner.id, owner.kind, OtpPurpose::EmailVerification)
            .await
            .unwrap();
        otp.verify(owner.id, owner.kind, OtpPurpose::EmailVerification, &used.code)
            .await
            .unwrap();
        otp.generate(owner.id, owner.kind, OtpPurpose::Signup)
            .await
            .unwrap();

        assert_eq!(otp.sweep().await.unwrap(), 1);
        assert_eq!(store.codes_for(owner.id, owner.kind).await.len(), 1);
    }
}
