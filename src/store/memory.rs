//! Process-local store for tests and local development.
//!
//! Each trait method takes the one lock for its whole duration, which gives
//! the same all-or-nothing behaviour as a transaction in the Postgres store.

use super::{
    CodeCap, CodeStore, NewCode, OneTimeCode, PendingCode, Permission, PermissionInput, PrincipalStore,
    RbacStore, RefreshSession, Role, RoleInput, SessionStore,
};
use crate::auth::{
    error::{AuthError, AuthResult, Resource},
    otp::OtpPurpose,
    principal::{NewPrincipal, Principal, PrincipalKind, PARTNER_ROLE},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
    next_id: i64,
    principals: HashMap<(PrincipalKind, i64), Principal>,
    sessions: HashMap<(PrincipalKind, i64), RefreshSession>,
    codes: Vec<OneTimeCode>,
    roles: BTreeMap<i64, Role>,
    permissions: BTreeMap<i64, Permission>,
    admin_roles: BTreeSet<(i64, i64)>,
    role_permissions: BTreeSet<(i64, i64)>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn with_roles(&self, principal: &Principal) -> Principal {
        let mut principal = principal.clone();
        if principal.kind == PrincipalKind::Admin {
            principal.roles = self
                .admin_role_list(principal.id)
                .into_iter()
                .map(|role| role.name)
                .collect();
        }
        principal
    }

    fn admin_role_list(&self, admin_id: i64) -> Vec<Role> {
        self.admin_roles
            .iter()
            .filter(|(admin, _)| *admin == admin_id)
            .filter_map(|(_, role_id)| self.roles.get(role_id).cloned())
            .collect()
    }

    fn insert_principal(&mut self, new: NewPrincipal) -> AuthResult<Principal> {
        let clash = self.principals.values().any(|existing| {
            existing.kind == new.kind
                && (existing.email == new.email
                    || (new.phone.is_some() && existing.phone == new.phone))
        });
        if clash {
            return Err(AuthError::AlreadyExists(Resource::Principal));
        }

        let roles = match new.kind {
            PrincipalKind::User => new.role.clone().into_iter().collect(),
            PrincipalKind::Partner => vec![PARTNER_ROLE.to_string()],
            PrincipalKind::Admin => Vec::new(),
        };
        let principal = Principal {
            id: self.next_id(),
            kind: new.kind,
            display_name: new.display_name,
            email: new.email,
            phone: new.phone,
            password_hash: new.password_hash,
            active: new.active,
            email_verified: new.email_verified,
            roles,
            last_login_at: None,
            created_at: Utc::now(),
        };
        self.principals
            .insert((principal.kind, principal.id), principal.clone());
        Ok(principal)
    }

    fn insert_code(&mut self, code: NewCode) -> OneTimeCode {
        let record = OneTimeCode {
            id: self.next_id(),
            owner_id: code.owner_id,
            owner_kind: code.owner_kind,
            purpose: code.pending.purpose,
            code: code.pending.code,
            expires_at: code.pending.expires_at,
            used: false,
            created_at: Utc::now(),
        };
        self.codes.push(record.clone());
        record
    }

    fn live_codes(
        &self,
        owner_id: i64,
        owner_kind: PrincipalKind,
        purpose: OtpPurpose,
        now: DateTime<Utc>,
    ) -> i64 {
        let count = self
            .codes
            .iter()
            .filter(|c| {
                c.owner_id == owner_id
                    && c.owner_kind == owner_kind
                    && c.purpose == purpose
                    && !c.used
                    && c.expires_at > now
            })
            .count();
        i64::try_from(count).unwrap_or(i64::MAX)
    }

    fn codes_since(
        &self,
        owner_id: i64,
        owner_kind: PrincipalKind,
        purpose: OtpPurpose,
        since: DateTime<Utc>,
    ) -> i64 {
        let count = self
            .codes
            .iter()
            .filter(|c| {
                c.owner_id == owner_id
                    && c.owner_kind == owner_kind
                    && c.purpose == purpose
                    && c.created_at > since
            })
            .count();
        i64::try_from(count).unwrap_or(i64::MAX)
    }

    fn role_name_taken(&self, name: &str, except: Option<i64>) -> bool {
        self.roles
            .values()
            .any(|role| role.name == name && Some(role.id) != except)
    }

    fn permission_name_taken(&self, name: &str, except: Option<i64>) -> bool {
        self.permissions
            .values()
            .any(|permission| permission.name == name && Some(permission.id) != except)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every code ever issued to an owner, oldest first.
    pub async fn codes_for(&self, owner_id: i64, owner_kind: PrincipalKind) -> Vec<OneTimeCode> {
        let state = self.state.lock().await;
        state
            .codes
            .iter()
            .filter(|code| code.owner_id == owner_id && code.owner_kind == owner_kind)
            .cloned()
            .collect()
    }

    /// Move every expiry of the owner's codes into the past.
    pub async fn expire_codes(&self, owner_id: i64, owner_kind: PrincipalKind) {
        let mut state = self.state.lock().await;
        let past = Utc::now() - chrono::Duration::seconds(1);
        for code in &mut state.codes {
            if code.owner_id == owner_id && code.owner_kind == owner_kind {
                code.expires_at = past;
            }
        }
    }

    /// Shift the creation time of the owner's codes, for rolling-window checks.
    pub async fn age_codes(&self, owner_id: i64, owner_kind: PrincipalKind, by: chrono::Duration) {
        let mut state = self.state.lock().await;
        for code in &mut state.codes {
            if code.owner_id == owner_id && code.owner_kind == owner_kind {
                code.created_at -= by;
            }
        }
    }

    /// Overwrite a principal's `active` flag.
    pub async fn set_active(&self, kind: PrincipalKind, id: i64, active: bool) {
        let mut state = self.state.lock().await;
        if let Some(principal) = state.principals.get_mut(&(kind, id)) {
            principal.active = active;
        }
    }

    /// Overwrite the stored expiry of a refresh session.
    pub async fn set_session_expiry(&self, kind: PrincipalKind, id: i64, at: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        if let Some(session) = state.sessions.get_mut(&(kind, id)) {
            session.expires_at = at;
        }
    }
}

#[async_trait]
impl PrincipalStore for MemoryStore {
    async fn find_by_email(
        &self,
        kind: PrincipalKind,
        email: &str,
    ) -> AuthResult<Option<Principal>> {
        let state = self.state.lock().await;
        Ok(state
            .principals
            .values()
            .find(|p| p.kind == kind && p.email == email)
            .map(|p| state.with_roles(p)))
    }

    async fn find_by_id(&self, kind: PrincipalKind, id: i64) -> AuthResult<Option<Principal>> {
        let state = self.state.lock().await;
        Ok(state.principals.get(&(kind, id)).map(|p| state.with_roles(p)))
    }

    async fn phone_taken(&self, kind: PrincipalKind, phone: &str) -> AuthResult<bool> {
        let state = self.state.lock().await;
        Ok(state
            .principals
            .values()
            .any(|p| p.kind == kind && p.phone.as_deref() == Some(phone)))
    }

    async fn create_principal(&self, new: NewPrincipal) -> AuthResult<Principal> {
        let mut state = self.state.lock().await;
        state.insert_principal(new)
    }

    async fn create_admin_with_role(&self, new: NewPrincipal, role_id: i64) -> AuthResult<Principal> {
        let mut state = self.state.lock().await;
        if !state.roles.contains_key(&role_id) {
            return Err(AuthError::NotFound(Resource::Role));
        }
        let admin = state.insert_principal(new)?;
        state.admin_roles.insert((admin.id, role_id));
        Ok(state.with_roles(&admin))
    }

    async fn create_principal_with_code(
        &self,
        new: NewPrincipal,
        code: PendingCode,
    ) -> AuthResult<(Principal, OneTimeCode)> {
        let mut state = self.state.lock().await;
        let principal = state.insert_principal(new)?;
        let code = state.insert_code(NewCode {
            owner_id: principal.id,
            owner_kind: principal.kind,
            pending: code,
        });
        Ok((principal, code))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn find_session(
        &self,
        kind: PrincipalKind,
        principal_id: i64,
    ) -> AuthResult<Option<RefreshSession>> {
        let state = self.state.lock().await;
        Ok(state.sessions.get(&(kind, principal_id)).cloned())
    }

    async fn replace_session(&self, session: RefreshSession, stamp_login: bool) -> AuthResult<()> {
        let mut state = self.state.lock().await;
        let key = (session.kind, session.principal_id);
        state.sessions.remove(&key);
        state.sessions.insert(key, session);
        if stamp_login {
            if let Some(principal) = state.principals.get_mut(&key) {
                principal.last_login_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn rotate_session(&self, expected_hash: &str, next: RefreshSession) -> AuthResult<bool> {
        let mut state = self.state.lock().await;
        let key = (next.kind, next.principal_id);
        let current_matches = state
            .sessions
            .get(&key)
            .is_some_and(|session| session.token_hash == expected_hash);
        if !current_matches {
            return Ok(false);
        }
        state.sessions.insert(key, next);
        Ok(true)
    }

    async fn delete_session(&self, kind: PrincipalKind, principal_id: i64) -> AuthResult<bool> {
        let mut state = self.state.lock().await;
        Ok(state.sessions.remove(&(kind, principal_id)).is_some())
    }
}

#[async_trait]
impl CodeStore for MemoryStore {
    async fn insert_code(&self, code: NewCode) -> AuthResult<OneTimeCode> {
        let mut state = self.state.lock().await;
        Ok(state.insert_code(code))
    }

    async fn insert_code_if_clear(
        &self,
        code: NewCode,
        now: DateTime<Utc>,
        cap: Option<CodeCap>,
    ) -> AuthResult<OneTimeCode> {
        let mut state = self.state.lock().await;
        let (owner_id, owner_kind, purpose) = (code.owner_id, code.owner_kind, code.pending.purpose);
        if state.live_codes(owner_id, owner_kind, purpose, now) > 0 {
            return Err(AuthError::CodeAlreadyOutstanding);
        }
        if let Some(cap) = cap {
            if state.codes_since(owner_id, owner_kind, purpose, cap.since) >= cap.max {
                return Err(AuthError::RateLimitExceeded);
            }
        }
        Ok(state.insert_code(code))
    }

    async fn count_live_codes(
        &self,
        owner_id: i64,
        owner_kind: PrincipalKind,
        purpose: OtpPurpose,
        now: DateTime<Utc>,
    ) -> AuthResult<i64> {
        let state = self.state.lock().await;
        Ok(state.live_codes(owner_id, owner_kind, purpose, now))
    }

    async fn count_codes_since(
        &self,
        owner_id: i64,
        owner_kind: PrincipalKind,
        purpose: OtpPurpose,
        since: DateTime<Utc>,
    ) -> AuthResult<i64> {
        let state = self.state.lock().await;
        Ok(state.codes_since(owner_id, owner_kind, purpose, since))
    }

    async fn consume_code(
        &self,
        owner_id: i64,
        owner_kind: PrincipalKind,
        purpose: OtpPurpose,
        code: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<bool> {
        let mut state = self.state.lock().await;
        let Some(record) = state.codes.iter_mut().find(|c| {
            c.owner_id == owner_id
                && c.owner_kind == owner_kind
                && c.purpose == purpose
                && c.code == code
                && !c.used
                && c.expires_at > now
        }) else {
            return Ok(false);
        };
        record.used = true;
        if let Some(principal) = state.principals.get_mut(&(owner_kind, owner_id)) {
            principal.email_verified = true;
        }
        Ok(true)
    }

    async fn delete_spent_codes(&self, now: DateTime<Utc>) -> AuthResult<u64> {
        let mut state = self.state.lock().await;
        let before = state.codes.len();
        state.codes.retain(|c| !c.used && c.expires_at >= now);
        Ok(u64::try_from(before - state.codes.len()).unwrap_or(u64::MAX))
    }
}

#[async_trait]
impl RbacStore for MemoryStore {
    async fn has_super_admin_role(&self, admin_id: i64) -> AuthResult<bool> {
        let state = self.state.lock().await;
        Ok(state
            .admin_role_list(admin_id)
            .iter()
            .any(|role| role.is_super_admin))
    }

    async fn has_permission_via_roles(&self, admin_id: i64, permission: &str) -> AuthResult<bool> {
        let state = self.state.lock().await;
        let Some(permission_id) = state
            .permissions
            .values()
            .find(|p| p.name == permission)
            .map(|p| p.id)
        else {
            return Ok(false);
        };
        Ok(state
            .admin_roles
            .iter()
            .filter(|(admin, _)| *admin == admin_id)
            .any(|(_, role_id)| state.role_permissions.contains(&(*role_id, permission_id))))
    }

    async fn find_role(&self, role_id: i64) -> AuthResult<Option<Role>> {
        let state = self.state.lock().await;
        Ok(state.roles.get(&role_id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> AuthResult<Option<Role>> {
        let state = self.state.lock().await;
        Ok(state.roles.values().find(|r| r.name == name).cloned())
    }

    async fn list_roles(&self) -> AuthResult<Vec<Role>> {
        let state = self.state.lock().await;
        Ok(state.roles.values().cloned().collect())
    }

    async fn create_role(&self, input: RoleInput) -> AuthResult<Role> {
        let mut state = self.state.lock().await;
        if state.role_name_taken(&input.name, None) {
            return Err(AuthError::AlreadyExists(Resource::Role));
        }
        let role = Role {
            id: state.next_id(),
            name: input.name,
            display_name: input.display_name,
            description: input.description,
            is_default: input.is_default,
            is_super_admin: input.is_super_admin,
        };
        state.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn update_role(&self, role_id: i64, input: RoleInput) -> AuthResult<Option<Role>> {
        let mut state = self.state.lock().await;
        if state.role_name_taken(&input.name, Some(role_id)) {
            return Err(AuthError::AlreadyExists(Resource::Role));
        }
        let Some(role) = state.roles.get_mut(&role_id) else {
            return Ok(None);
        };
        role.name = input.name;
        role.display_name = input.display_name;
        role.description = input.description;
        role.is_default = input.is_default;
        role.is_super_admin = input.is_super_admin;
        Ok(Some(role.clone()))
    }

    async fn delete_role(&self, role_id: i64) -> AuthResult<bool> {
        let mut state = self.state.lock().await;
        state.admin_roles.retain(|(_, role)| *role != role_id);
        state.role_permissions.retain(|(role, _)| *role != role_id);
        Ok(state.roles.remove(&role_id).is_some())
    }

    async fn find_permission(&self, permission_id: i64) -> AuthResult<Option<Permission>> {
        let state = self.state.lock().await;
        Ok(state.permissions.get(&permission_id).cloned())
    }

    async fn find_permission_by_name(&self, name: &str) -> AuthResult<Option<Permission>> {
        let state = self.state.lock().await;
        Ok(state.permissions.values().find(|p| p.name == name).cloned())
    }

    async fn list_permissions(&self) -> AuthResult<Vec<Permission>> {
        let state = self.state.lock().await;
        Ok(state.permissions.values().cloned().collect())
    }

    async fn create_permission(&self, input: PermissionInput) -> AuthResult<Permission> {
        let mut state = self.state.lock().await;
        if state.permission_name_taken(&input.name, None) {
            return Err(AuthError::AlreadyExists(Resource::Permission));
        }
        let permission = Permission {
            id: state.next_id(),
            name: input.name,
            description: input.description,
        };
        state.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    async fn update_permission(
        &self,
        permission_id: i64,
        input: PermissionInput,
    ) -> AuthResult<Option<Permission>> {
        let mut state = self.state.lock().await;
        if state.permission_name_taken(&input.name, Some(permission_id)) {
            return Err(AuthError::AlreadyExists(Resource::Permission));
        }
        let Some(permission) = state.permissions.get_mut(&permission_id) else {
            return Ok(None);
        };
        permission.name = input.name;
        permission.description = input.description;
        Ok(Some(permission.clone()))
    }

    async fn delete_permission(&self, permission_id: i64) -> AuthResult<bool> {
        let mut state = self.state.lock().await;
        state
            .role_permissions
            .retain(|(_, permission)| *permission != permission_id);
        Ok(state.permissions.remove(&permission_id).is_some())
    }

    async fn admin_roles(&self, admin_id: i64) -> AuthResult<Vec<Role>> {
        let state = self.state.lock().await;
        Ok(state.admin_role_list(admin_id))
    }

    async fn role_permissions(&self, role_id: i64) -> AuthResult<Vec<Permission>> {
        let state = self.state.lock().await;
        Ok(state
            .role_permissions
            .iter()
            .filter(|(role, _)| *role == role_id)
            .filter_map(|(_, permission)| state.permissions.get(permission).cloned())
            .collect())
    }

    async fn assign_role(&self, admin_id: i64, role_id: i64) -> AuthResult<bool> {
        let mut state = self.state.lock().await;
        Ok(state.admin_roles.insert((admin_id, role_id)))
    }

    async fn revoke_role(&self, admin_id: i64, role_id: i64) -> AuthResult<bool> {
        let mut state = self.state.lock().await;
        Ok(state.admin_roles.remove(&(admin_id, role_id)))
    }

    async fn assign_permission(&self, role_id: i64, permission_id: i64) -> AuthResult<bool> {
        let mut state = self.state.lock().await;
        Ok(state.role_permissions.insert((role_id, permission_id)))
    }

    async fn revoke_permission(&self, role_id: i64, permission_id: i64) -> AuthResult<bool> {
        let mut state = self.state.lock().await;
        Ok(state.role_permissions.remove(&(role_id, permission_id)))
    }
}
