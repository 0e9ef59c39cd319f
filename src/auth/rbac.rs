//! Admin role/permission resolution and administration.
//!
//! Decisions always re-query the store. A super admin role satisfies any
//! permission name, even one that was never created. Everyone else needs the
//! name reachable through admin → role → permission.

use super::{
    error::{AuthError, AuthResult, Resource},
    principal::{PrincipalKind, SUPER_ADMIN_ROLE},
};
use crate::store::{AuthStore, Permission, PermissionInput, Role, RoleInput};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// `section.action`, or just `section` when no action is given.
#[must_use]
pub fn permission_name(section: &str, action: &str) -> String {
    if action.is_empty() {
        section.to_string()
    } else {
        format!("{section}.{action}")
    }
}

#[derive(Clone)]
pub struct Rbac {
    store: Arc<dyn AuthStore>,
}

impl Rbac {
    #[must_use]
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self { store }
    }

    /// Whether `admin_id` holds `permission`.
    ///
    /// # Errors
    /// Returns [`AuthError::Internal`] if the store fails.
    #[instrument(skip(self))]
    pub async fn has_permission(&self, admin_id: i64, permission: &str) -> AuthResult<bool> {
        if self.store.has_super_admin_role(admin_id).await? {
            return Ok(true);
        }
        self.store
            .has_permission_via_roles(admin_id, permission)
            .await
    }

    /// [`Self::has_permission`] for a `section.action` pair.
    ///
    /// # Errors
    /// Returns [`AuthError::Internal`] if the store fails.
    pub async fn has_section_permission(
        &self,
        admin_id: i64,
        section: &str,
        action: &str,
    ) -> AuthResult<bool> {
        self.has_permission(admin_id, &permission_name(section, action))
            .await
    }

    /// # Errors
    /// Returns [`AuthError::PermissionDenied`] when the permission is missing.
    pub async fn require(&self, admin_id: i64, permission: &str) -> AuthResult<()> {
        if self.has_permission(admin_id, permission).await? {
            Ok(())
        } else {
            Err(AuthError::PermissionDenied)
        }
    }

    /// # Errors
    /// Returns [`AuthError::Internal`] if the store fails.
    pub async fn is_super_admin(&self, admin_id: i64) -> AuthResult<bool> {
        self.store.has_super_admin_role(admin_id).await
    }

    /// # Errors
    /// - [`AuthError::NotFound`] for an unknown admin or role
    /// - [`AuthError::AlreadyAssigned`] when the admin already holds the role
    pub async fn assign_role(&self, admin_id: i64, role_id: i64) -> AuthResult<()> {
        self.require_admin(admin_id).await?;
        self.get_role(role_id).await?;
        if !self.store.assign_role(admin_id, role_id).await? {
            return Err(AuthError::AlreadyAssigned(Resource::Role));
        }
        info!(admin_id, role_id, "role assigned");
        Ok(())
    }

    /// # Errors
    /// Returns [`AuthError::NotFound`] when the admin does not hold the role.
    pub async fn revoke_role(&self, admin_id: i64, role_id: i64) -> AuthResult<()> {
        if !self.store.revoke_role(admin_id, role_id).await? {
            return Err(AuthError::NotFound(Resource::Assignment));
        }
        info!(admin_id, role_id, "role revoked");
        Ok(())
    }

    /// # Errors
    /// - [`AuthError::NotFound`] for an unknown role or permission
    /// - [`AuthError::AlreadyAssigned`] when the role already grants it
    pub async fn assign_permission(&self, role_id: i64, permission_id: i64) -> AuthResult<()> {
        self.get_role(role_id).await?;
        self.get_permission(permission_id).await?;
        if !self.store.assign_permission(role_id, permission_id).await? {
            return Err(AuthError::AlreadyAssigned(Resource::Permission));
        }
        info!(role_id, permission_id, "permission assigned");
        Ok(())
    }

    /// # Errors
    /// Returns [`AuthError::NotFound`] when the role does not grant it.
    pub async fn revoke_permission(&self, role_id: i64, permission_id: i64) -> AuthResult<()> {
        if !self.store.revoke_permission(role_id, permission_id).await? {
            return Err(AuthError::NotFound(Resource::Assignment));
        }
        info!(role_id, permission_id, "permission revoked");
        Ok(())
    }

    /// # Errors
    /// Returns [`AuthError::NotFound`] for an unknown admin.
    pub async fn admin_roles(&self, admin_id: i64) -> AuthResult<Vec<Role>> {
        self.require_admin(admin_id).await?;
        self.store.admin_roles(admin_id).await
    }

    /// # Errors
    /// Returns [`AuthError::NotFound`] for an unknown role.
    pub async fn role_permissions(&self, role_id: i64) -> AuthResult<Vec<Permission>> {
        self.get_role(role_id).await?;
        self.store.role_permissions(role_id).await
    }

    /// # Errors
    /// Returns [`AuthError::NotFound`] for an unknown role.
    pub async fn get_role(&self, role_id: i64) -> AuthResult<Role> {
        self.store
            .find_role(role_id)
            .await?
            .ok_or(AuthError::NotFound(Resource::Role))
    }

    /// # Errors
    /// Returns [`AuthError::Internal`] if the store fails.
    pub async fn list_roles(&self) -> AuthResult<Vec<Role>> {
        self.store.list_roles().await
    }

    /// # Errors
    /// - [`AuthError::InvalidInput`] for an empty name
    /// - [`AuthError::AlreadyExists`] when the name is taken
    pub async fn create_role(&self, input: RoleInput) -> AuthResult<Role> {
        let role = self.store.create_role(clean_role(input)?).await?;
        info!(role_id = role.id, name = %role.name, "role created");
        Ok(role)
    }

    /// # Errors
    /// - [`AuthError::InvalidInput`] for an empty name
    /// - [`AuthError::NotFound`] for an unknown role
    /// - [`AuthError::AlreadyExists`] when the new name is taken
    pub async fn update_role(&self, role_id: i64, input: RoleInput) -> AuthResult<Role> {
        self.store
            .update_role(role_id, clean_role(input)?)
            .await?
            .ok_or(AuthError::NotFound(Resource::Role))
    }

    /// Delete a role together with its admin and permission assignments.
    ///
    /// # Errors
    /// Returns [`AuthError::NotFound`] for an unknown role.
    pub async fn delete_role(&self, role_id: i64) -> AuthResult<()> {
        if !self.store.delete_role(role_id).await? {
            return Err(AuthError::NotFound(Resource::Role));
        }
        info!(role_id, "role deleted");
        Ok(())
    }

    /// # Errors
    /// Returns [`AuthError::NotFound`] for an unknown permission.
    pub async fn get_permission(&self, permission_id: i64) -> AuthResult<Permission> {
        self.store
            .find_permission(permission_id)
            .await?
            .ok_or(AuthError::NotFound(Resource::Permission))
    }

    /// # Errors
    /// Returns [`AuthError::Internal`] if the store fails.
    pub async fn list_permissions(&self) -> AuthResult<Vec<Permission>> {
        self.store.list_permissions().await
    }

    /// # Errors
    /// - [`AuthError::InvalidInput`] for an empty name
    /// - [`AuthError::AlreadyExists`] when the name is taken
    pub async fn create_permission(&self, input: PermissionInput) -> AuthResult<Permission> {
        let permission = self.store.create_permission(clean_permission(input)?).await?;
        info!(permission_id = permission.id, name = %permission.name, "permission created");
        Ok(permission)
    }

    /// # Errors
    /// - [`AuthError::InvalidInput`] for an empty name
    /// - [`AuthError::NotFound`] for an unknown permission
    /// - [`AuthError::AlreadyExists`] when the new name is taken
    pub async fn update_permission(
        &self,
        permission_id: i64,
        input: PermissionInput,
    ) -> AuthResult<Permission> {
        self.store
            .update_permission(permission_id, clean_permission(input)?)
            .await?
            .ok_or(AuthError::NotFound(Resource::Permission))
    }

    /// Delete a permission together with its role assignments.
    ///
    /// # Errors
    /// Returns [`AuthError::NotFound`] for an unknown permission.
    pub async fn delete_permission(&self, permission_id: i64) -> AuthResult<()> {
        if !self.store.delete_permission(permission_id).await? {
            return Err(AuthError::NotFound(Resource::Permission));
        }
        info!(permission_id, "permission deleted");
        Ok(())
    }

    /// The `super_admin` role, created on first use. An existing role of that
    /// name whose flag was cleared gets `is_super_admin` set again.
    ///
    /// # Errors
    /// Returns [`AuthError::Internal`] if the store fails.
    pub async fn ensure_super_admin_role(&self) -> AuthResult<Role> {
        if let Some(role) = self.store.find_role_by_name(SUPER_ADMIN_ROLE).await? {
            if role.is_super_admin {
                return Ok(role);
            }
            warn!(role_id = role.id, "super_admin role lost its flag, restoring it");
            return self
                .store
                .update_role(
                    role.id,
                    RoleInput {
                        name: role.name,
                        display_name: role.display_name,
                        description: role.description,
                        is_default: role.is_default,
                        is_super_admin: true,
                    },
                )
                .await?
                .ok_or(AuthError::NotFound(Resource::Role));
        }
        let created = self
            .store
            .create_role(RoleInput {
                name: SUPER_ADMIN_ROLE.to_string(),
                display_name: "Super Admin".to_string(),
                description: Some("Holds every permission".to_string()),
                is_default: false,
                is_super_admin: true,
            })
            .await;
        match created {
            Ok(role) => Ok(role),
            // Lost a creation race; the winner's row is what we want.
            Err(AuthError::AlreadyExists(Resource::Role)) => self
                .store
                .find_role_by_name(SUPER_ADMIN_ROLE)
                .await?
                .ok_or(AuthError::NotFound(Resource::Role)),
            Err(err) => Err(err),
        }
    }

    async fn require_admin(&self, admin_id: i64) -> AuthResult<()> {
        match self.store.find_by_id(PrincipalKind::Admin, admin_id).await? {
            Some(_) => Ok(()),
            None => Err(AuthError::NotFound(Resource::Admin)),
        }
    }
}

fn clean_role(mut input: RoleInput) -> AuthResult<RoleInput> {
    input.name = input.name.trim().to_string();
    if input.name.is_empty() {
        return Err(AuthError::InvalidInput("role name is required"));
    }
    input.display_name = input.display_name.trim().to_string();
    if input.display_name.is_empty() {
        input.display_name.clone_from(&input.name);
    }
    Ok(input)
}

fn clean_permission(mut input: PermissionInput) -> AuthResult<PermissionInput> {
    input.name = input.name.trim().to_string();
    if input.name.is_empty() {
        return Err(AuthError::InvalidInput("permission name is required"));
    }
    Ok(input)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{
        auth::principal::NewPrincipal,
        store::{MemoryStore, PrincipalStore},
    };
    use secrecy::SecretString;

    async fn admin(store: &MemoryStore, email: &str) -> i64 {
        store
            .create_principal(NewPrincipal {
                kind: PrincipalKind::Admin,
                display_name: "Admin".to_string(),
                email: email.to_string(),
                phone: None,
                password_hash: SecretString::from("hash".to_string()),
                role: None,
                active: true,
                email_verified: true,
            })
            .await
            .unwrap()
            .id
    }

    fn role(name: &str) -> RoleInput {
        RoleInput {
            name: name.to_string(),
            ..RoleInput::default()
        }
    }

    fn permission(name: &str) -> PermissionInput {
        PermissionInput {
            name: name.to_string(),
            description: None,
        }
    }

    #[test]
    fn section_action_naming() {
        assert_eq!(permission_name("orders", "refund"), "orders.refund");
        assert_eq!(permission_name("orders", ""), "orders");
    }

    #[tokio::test]
    async fn super_admin_bypasses_even_unknown_names() {
        let store = Arc::new(MemoryStore::new());
        let rbac = Rbac::new(store.clone());
        let boss = admin(&store, "boss@carhub.dev").await;
        let role = rbac.ensure_super_admin_role().await.unwrap();
        assert!(role.is_super_admin);
        rbac.assign_role(boss, role.id).await.unwrap();

        assert!(rbac.has_permission(boss, "no.such.permission").await.unwrap());
        assert!(rbac
            .has_section_permission(boss, "vehicles", "delete")
            .await
            .unwrap());
        assert_eq!(rbac.ensure_super_admin_role().await.unwrap().id, role.id);
    }

    #[tokio::test]
    async fn ensure_restores_a_cleared_super_admin_flag() {
        let store = Arc::new(MemoryStore::new());
        let rbac = Rbac::new(store.clone());
        let boss = admin(&store, "boss@carhub.dev").await;
        let role = rbac.ensure_super_admin_role().await.unwrap();
        rbac.assign_role(boss, role.id).await.unwrap();

        let cleared = rbac
            .update_role(role.id, self::role(SUPER_ADMIN_ROLE))
            .await
            .unwrap();
        assert!(!cleared.is_super_admin);
        assert!(!rbac.has_permission(boss, "orders.refund").await.unwrap());

        let restored = rbac.ensure_super_admin_role().await.unwrap();
        assert_eq!(restored.id, role.id);
        assert!(restored.is_super_admin);
        assert!(rbac.has_permission(boss, "orders.refund").await.unwrap());
    }

    #[tokio::test]
    async fn support_gains_refund_once_granted() {
        let store = Arc::new(MemoryStore::new());
        let rbac = Rbac::new(store.clone());
        let agent = admin(&store, "agent@carhub.dev").await;
        let support = rbac.create_role(role("support")).await.unwrap();
        let refund = rbac
            .create_permission(permission("orders.refund"))
            .await
            .unwrap();
        rbac.assign_role(agent, support.id).await.unwrap();

        assert!(!rbac.has_permission(agent, "orders.refund").await.unwrap());
        assert!(matches!(
            rbac.require(agent, "orders.refund").await,
            Err(AuthError::PermissionDenied)
        ));

        rbac.assign_permission(support.id, refund.id).await.unwrap();
        assert!(rbac.has_permission(agent, "orders.refund").await.unwrap());
        assert!(rbac
            .has_section_permission(agent, "orders", "refund")
            .await
            .unwrap());
        assert!(!rbac.has_permission(agent, "orders.delete").await.unwrap());

        // Revocation is visible on the very next check.
        rbac.revoke_role(agent, support.id).await.unwrap();
        assert!(!rbac.has_permission(agent, "orders.refund").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_assignments_are_reported() {
        let store = Arc::new(MemoryStore::new());
        let rbac = Rbac::new(store.clone());
        let agent = admin(&store, "agent@carhub.dev").await;
        let support = rbac.create_role(role("support")).await.unwrap();
        let read = rbac.create_permission(permission("orders.read")).await.unwrap();

        rbac.assign_role(agent, support.id).await.unwrap();
        let again = rbac.assign_role(agent, support.id).await;
        assert_eq!(again.unwrap_err().tag(), "role_already_assigned");

        rbac.assign_permission(support.id, read.id).await.unwrap();
        let again = rbac.assign_permission(support.id, read.id).await;
        assert_eq!(again.unwrap_err().tag(), "permission_already_assigned");
    }

    #[tokio::test]
    async fn assignments_validate_both_ends() {
        let store = Arc::new(MemoryStore::new());
        let rbac = Rbac::new(store.clone());
        let agent = admin(&store, "agent@carhub.dev").await;
        let support = rbac.create_role(role("support")).await.unwrap();

        let tag = |r: AuthResult<()>| r.unwrap_err().tag();
        assert_eq!(tag(rbac.assign_role(999, support.id).await), "admin_not_found");
        assert_eq!(tag(rbac.assign_role(agent, 999).await), "role_not_found");
        assert_eq!(
            tag(rbac.assign_permission(support.id, 999).await),
            "permission_not_found"
        );
        assert_eq!(
            tag(rbac.revoke_role(agent, support.id).await),
            "assignment_not_found"
        );
    }

    #[tokio::test]
    async fn crud_validates_names() {
        let store = Arc::new(MemoryStore::new());
        let rbac = Rbac::new(store);

        let blank = rbac.create_role(role("  ")).await;
        assert!(matches!(blank, Err(AuthError::InvalidInput(_))));

        let support = rbac.create_role(role("support")).await.unwrap();
        assert_eq!(support.display_name, "support");
        let clash = rbac.create_role(role("support")).await;
        assert_eq!(clash.unwrap_err().tag(), "role_exists");

        let renamed = rbac
            .update_role(support.id, role("customer_support"))
            .await
            .unwrap();
        assert_eq!(renamed.name, "customer_support");
        assert!(matches!(
            rbac.update_role(999, role("ghost")).await,
            Err(AuthError::NotFound(Resource::Role))
        ));

        rbac.create_permission(permission("orders.read"))
            .await
            .unwrap();
        let clash = rbac.create_permission(permission("orders.read")).await;
        assert_eq!(clash.unwrap_err().tag(), "permission_exists");
        assert_eq!(rbac.list_permissions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deleting_a_role_drops_its_grants() {
        let store = Arc::new(MemoryStore::new());
        let rbac = Rbac::new(store.clone());
        let agent = admin(&store, "agent@carhub.dev").await;
        let support = rbac.create_role(role("support")).await.unwrap();
        let read = rbac.create_permission(permission("orders.read")).await.unwrap();
        rbac.assign_role(agent, support.id).await.unwrap();
        rbac.assign_permission(support.id, read.id).await.unwrap();

        rbac.delete_role(support.id).await.unwrap();
        assert!(!rbac.has_permission(agent, "orders.read").await.unwrap());
        assert!(rbac.admin_roles(agent).await.unwrap().is_empty());
        assert!(matches!(
            rbac.delete_role(support.id).await,
            Err(AuthError::NotFound(Resource::Role))
        ));

        rbac.delete_permission(read.id).await.unwrap();
        assert!(rbac.list_permissions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn listings_follow_assignments() {
        let store = Arc::new(MemoryStore::new());
        let rbac = Rbac::new(store.clone());
        let agent = admin(&store, "agent@carhub.dev").await;
        let support = rbac.create_role(role("support")).await.unwrap();
        let read = rbac.create_permission(permission("orders.read")).await.unwrap();
        rbac.assign_role(agent, support.id).await.unwrap();
        rbac.assign_permission(support.id, read.id).await.unwrap();

        assert_eq!(rbac.admin_roles(agent).await.unwrap(), vec![support.clone()]);
        assert_eq!(rbac.role_permissions(support.id).await.unwrap(), vec![read.clone()]);
        assert!(matches!(
            rbac.admin_roles(999).await,
            Err(AuthError::NotFound(Resource::Admin))
        ));

        rbac.revoke_permission(support.id, read.id).await.unwrap();
        assert!(rbac.role_permissions(support.id).await.unwrap().is_empty());
    }
}
