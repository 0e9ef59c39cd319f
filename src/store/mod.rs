//! Credential store seam.
//!
//! Flow Overview:
//! 1) The auth core only talks to these traits; it never opens a transaction itself.
//! 2) Every method that touches more than one row is one atomic unit: the
//!    Postgres store runs it inside a single transaction and the memory store
//!    under a single lock. A failed unit leaves the previous state intact.
//! 3) Expiry is always passed in by the caller, so reads re-check it and no
//!    background job is needed for correctness.

pub mod memory;
pub mod postgres;

use crate::auth::{
    error::AuthResult,
    otp::OtpPurpose,
    principal::{NewPrincipal, Principal, PrincipalKind},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Server-side record of the one live refresh token of a principal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshSession {
    pub kind: PrincipalKind,
    pub principal_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

/// Code minted for an owner that may not exist yet.
#[derive(Clone, Debug)]
pub struct PendingCode {
    pub purpose: OtpPurpose,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewCode {
    pub owner_id: i64,
    pub owner_kind: PrincipalKind,
    pub pending: PendingCode,
}

/// At most `max` codes created after `since` for one scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodeCap {
    pub since: DateTime<Utc>,
    pub max: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OneTimeCode {
    pub id: i64,
    pub owner_id: i64,
    pub owner_kind: PrincipalKind,
    pub purpose: OtpPurpose,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub is_default: bool,
    pub is_super_admin: bool,
}

#[derive(Clone, Debug, Default)]
pub struct RoleInput {
    pub name: String,
    pub display_name: String,
    pub description: Option<String>,
    pub is_default: bool,
    pub is_super_admin: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct Permission {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct PermissionInput {
    pub name: String,
    pub description: Option<String>,
}

#[async_trait]
pub trait PrincipalStore: Send + Sync {
    async fn find_by_email(&self, kind: PrincipalKind, email: &str)
        -> AuthResult<Option<Principal>>;

    async fn find_by_id(&self, kind: PrincipalKind, id: i64) -> AuthResult<Option<Principal>>;

    async fn phone_taken(&self, kind: PrincipalKind, phone: &str) -> AuthResult<bool>;

    /// Insert a principal. A duplicate email or phone is `AlreadyExists(Principal)`.
    async fn create_principal(&self, new: NewPrincipal) -> AuthResult<Principal>;

    /// Insert an admin together with its assignment to `role_id`, atomically.
    /// A missing role is `NotFound(Role)`.
    async fn create_admin_with_role(&self, new: NewPrincipal, role_id: i64) -> AuthResult<Principal>;

    /// Insert a principal and its first code atomically.
    async fn create_principal_with_code(
        &self,
        new: NewPrincipal,
        code: PendingCode,
    ) -> AuthResult<(Principal, OneTimeCode)>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find_session(
        &self,
        kind: PrincipalKind,
        principal_id: i64,
    ) -> AuthResult<Option<RefreshSession>>;

    /// Upsert `session` over any session of the principal and, when
    /// `stamp_login` is set, update `last_login_at`. One atomic unit.
    async fn replace_session(&self, session: RefreshSession, stamp_login: bool) -> AuthResult<()>;

    /// Swap the session only if its stored hash is still `expected_hash`.
    ///
    /// Returns `false` (and changes nothing) when another rotation won.
    async fn rotate_session(&self, expected_hash: &str, next: RefreshSession) -> AuthResult<bool>;

    async fn delete_session(&self, kind: PrincipalKind, principal_id: i64) -> AuthResult<bool>;
}

#[async_trait]
pub trait CodeStore: Send + Sync {
    async fn insert_code(&self, code: NewCode) -> AuthResult<OneTimeCode>;

    /// Insert `code` only while its (owner, purpose) scope has no live code
    /// and, with a cap, fewer than `cap.max` codes created after `cap.since`.
    /// Checks and insert run under one per-scope lock, so concurrent callers
    /// for the same scope are serialized.
    ///
    /// # Errors
    /// - [`AuthError::CodeAlreadyOutstanding`] while a live code exists
    /// - [`AuthError::RateLimitExceeded`] once the cap is reached
    ///
    /// [`AuthError::CodeAlreadyOutstanding`]: crate::auth::AuthError::CodeAlreadyOutstanding
    /// [`AuthError::RateLimitExceeded`]: crate::auth::AuthError::RateLimitExceeded
    async fn insert_code_if_clear(
        &self,
        code: NewCode,
        now: DateTime<Utc>,
        cap: Option<CodeCap>,
    ) -> AuthResult<OneTimeCode>;

    /// Unused codes with `expires_at > now`.
    async fn count_live_codes(
        &self,
        owner_id: i64,
        owner_kind: PrincipalKind,
        purpose: OtpPurpose,
        now: DateTime<Utc>,
    ) -> AuthResult<i64>;

    /// Codes created after `since`, used or not.
    async fn count_codes_since(
        &self,
        owner_id: i64,
        owner_kind: PrincipalKind,
        purpose: OtpPurpose,
        since: DateTime<Utc>,
    ) -> AuthResult<i64>;

    /// Mark the matching live code used and set `email_verified` on its owner,
    /// atomically. Returns `false` when no live code matches all four keys.
    async fn consume_code(
        &self,
        owner_id: i64,
        owner_kind: PrincipalKind,
        purpose: OtpPurpose,
        code: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<bool>;

    /// Delete codes that are used or expired. Returns the number removed.
    async fn delete_spent_codes(&self, now: DateTime<Utc>) -> AuthResult<u64>;
}

#[async_trait]
pub trait RbacStore: Send + Sync {
    async fn has_super_admin_role(&self, admin_id: i64) -> AuthResult<bool>;

    async fn has_permission_via_roles(&self, admin_id: i64, permission: &str) -> AuthResult<bool>;

    async fn find_role(&self, role_id: i64) -> AuthResult<Option<Role>>;

    async fn find_role_by_name(&self, name: &str) -> AuthResult<Option<Role>>;

    async fn list_roles(&self) -> AuthResult<Vec<Role>>;

    async fn create_role(&self, input: RoleInput) -> AuthResult<Role>;

    async fn update_role(&self, role_id: i64, input: RoleInput) -> AuthResult<Option<Role>>;

    /// Remove the role's admin and permission assignments, then the role.
    async fn delete_role(&self, role_id: i64) -> AuthResult<bool>;

    async fn find_permission(&self, permission_id: i64) -> AuthResult<Option<Permission>>;

    async fn find_permission_by_name(&self, name: &str) -> AuthResult<Option<Permission>>;

    async fn list_permissions(&self) -> AuthResult<Vec<Permission>>;

    async fn create_permission(&self, input: PermissionInput) -> AuthResult<Permission>;

    async fn update_permission(
        &self,
        permission_id: i64,
        input: PermissionInput,
    ) -> AuthResult<Option<Permission>>;

    /// Remove the permission's role assignments, then the permission.
    async fn delete_permission(&self, permission_id: i64) -> AuthResult<bool>;

    async fn admin_roles(&self, admin_id: i64) -> AuthResult<Vec<Role>>;

    async fn role_permissions(&self, role_id: i64) -> AuthResult<Vec<Permission>>;

    /// Returns `false` when the pair already existed.
    async fn assign_role(&self, admin_id: i64, role_id: i64) -> AuthResult<bool>;

    async fn revoke_role(&self, admin_id: i64, role_id: i64) -> AuthResult<bool>;

    /// Returns `false` when the pair already existed.
    async fn assign_permission(&self, role_id: i64, permission_id: i64) -> AuthResult<bool>;

    async fn revoke_permission(&self, role_id: i64, permission_id: i64) -> AuthResult<bool>;
}

/// Everything the auth core needs from storage.
pub trait AuthStore: PrincipalStore + SessionStore + CodeStore + RbacStore {}

impl<T> AuthStore for T where T: PrincipalStore + SessionStore + CodeStore + RbacStore {}
