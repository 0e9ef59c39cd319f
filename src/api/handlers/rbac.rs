//! Role and permission administration.
//!
//! Everything here needs a full admin token whose owner holds a super admin
//! role at request time; `permissions/check` only needs a full admin token.

use super::{error_response, missing_payload, require_full_bearer, ErrorBody};
use crate::{
    auth::{
        rbac::permission_name, AuthError, AuthService, AuthenticatedPrincipal, PrincipalKind,
    },
    store::{Permission, PermissionInput, Role, RoleInput},
};
use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleRequest {
    pub name: String,
    /// Defaults to `name` when omitted or blank.
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_super_admin: bool,
}

impl From<RoleRequest> for RoleInput {
    fn from(request: RoleRequest) -> Self {
        Self {
            name: request.name,
            display_name: request.display_name.unwrap_or_default(),
            description: request.description,
            is_default: request.is_default,
            is_super_admin: request.is_super_admin,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl From<PermissionRequest> for PermissionInput {
    fn from(request: PermissionRequest) -> Self {
        Self {
            name: request.name,
            description: request.description,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleAssignment {
    pub admin_id: i64,
    pub role_id: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionAssignment {
    pub role_id: i64,
    pub permission_id: i64,
}

/// Either a full `permission` name or a `section` with an optional `action`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionCheck {
    #[serde(default)]
    pub permission: Option<String>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PermissionDecision {
    pub permission: String,
    pub allowed: bool,
}

#[allow(clippy::result_large_err)]
async fn require_super_admin(
    headers: &HeaderMap,
    service: &AuthService,
) -> Result<AuthenticatedPrincipal, Response> {
    let principal = require_full_bearer(headers, service)?;
    service
        .require_super_admin(&principal)
        .await
        .map_err(|err| error_response(&err))?;
    Ok(principal)
}

fn respond<T: Serialize>(status: StatusCode, result: Result<T, AuthError>) -> Response {
    match result {
        Ok(value) => (status, Json(value)).into_response(),
        Err(err) => error_response(&err),
    }
}

fn respond_empty(result: Result<(), AuthError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    get,
    path = "/v1/admin/roles",
    responses(
        (status = 200, description = "All roles", body = [Role]),
        (status = 403, description = "Caller is not a super admin", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "rbac"
)]
pub async fn list_roles(headers: HeaderMap, service: Extension<Arc<AuthService>>) -> Response {
    if let Err(response) = require_super_admin(&headers, &service).await {
        return response;
    }
    respond(StatusCode::OK, service.rbac().list_roles().await)
}

#[utoipa::path(
    post,
    path = "/v1/admin/roles",
    request_body = RoleRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 409, description = "Role name taken", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "rbac"
)]
pub async fn create_role(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<RoleRequest>>,
) -> Response {
    if let Err(response) = require_super_admin(&headers, &service).await {
        return response;
    }
    let Some(Json(request)) = payload else {
        return missing_payload();
    };
    respond(
        StatusCode::CREATED,
        service.rbac().create_role(request.into()).await,
    )
}

#[utoipa::path(
    get,
    path = "/v1/admin/roles/{role_id}",
    params(("role_id" = i64, Path, description = "Role id")),
    responses(
        (status = 200, description = "Role", body = Role),
        (status = 404, description = "Unknown role", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "rbac"
)]
pub async fn get_role(
    headers: HeaderMap,
    Path(role_id): Path<i64>,
    service: Extension<Arc<AuthService>>,
) -> Response {
    if let Err(response) = require_super_admin(&headers, &service).await {
        return response;
    }
    respond(StatusCode::OK, service.rbac().get_role(role_id).await)
}

#[utoipa::path(
    put,
    path = "/v1/admin/roles/{role_id}",
    params(("role_id" = i64, Path, description = "Role id")),
    request_body = RoleRequest,
    responses(
        (status = 200, description = "Role updated", body = Role),
        (status = 404, description = "Unknown role", body = ErrorBody),
        (status = 409, description = "Role name taken", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "rbac"
)]
pub async fn update_role(
    headers: HeaderMap,
    Path(role_id): Path<i64>,
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<RoleRequest>>,
) -> Response {
    if let Err(response) = require_super_admin(&headers, &service).await {
        return response;
    }
    let Some(Json(request)) = payload else {
        return missing_payload();
    };
    respond(
        StatusCode::OK,
        service.rbac().update_role(role_id, request.into()).await,
    )
}

#[utoipa::path(
    delete,
    path = "/v1/admin/roles/{role_id}",
    params(("role_id" = i64, Path, description = "Role id")),
    responses(
        (status = 204, description = "Role and its assignments removed"),
        (status = 404, description = "Unknown role", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "rbac"
)]
pub async fn delete_role(
    headers: HeaderMap,
    Path(role_id): Path<i64>,
    service: Extension<Arc<AuthService>>,
) -> Response {
    if let Err(response) = require_super_admin(&headers, &service).await {
        return response;
    }
    respond_empty(service.rbac().delete_role(role_id).await)
}

#[utoipa::path(
    get,
    path = "/v1/admin/roles/{role_id}/permissions",
    params(("role_id" = i64, Path, description = "Role id")),
    responses(
        (status = 200, description = "Permissions granted to the role", body = [Permission]),
        (status = 404, description = "Unknown role", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "rbac"
)]
pub async fn role_permissions(
    headers: HeaderMap,
    Path(role_id): Path<i64>,
    service: Extension<Arc<AuthService>>,
) -> Response {
    if let Err(response) = require_super_admin(&headers, &service).await {
        return response;
    }
    respond(StatusCode::OK, service.rbac().role_permissions(role_id).await)
}

#[utoipa::path(
    post,
    path = "/v1/admin/roles/assign",
    request_body = RoleAssignment,
    responses(
        (status = 204, description = "Role assigned"),
        (status = 404, description = "Unknown admin or role", body = ErrorBody),
        (status = 409, description = "Already assigned", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "rbac"
)]
pub async fn assign_role(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<RoleAssignment>>,
) -> Response {
    if let Err(response) = require_super_admin(&headers, &service).await {
        return response;
    }
    let Some(Json(request)) = payload else {
        return missing_payload();
    };
    respond_empty(
        service
            .rbac()
            .assign_role(request.admin_id, request.role_id)
            .await,
    )
}

#[utoipa::path(
    post,
    path = "/v1/admin/roles/revoke",
    request_body = RoleAssignment,
    responses(
        (status = 204, description = "Role revoked"),
        (status = 404, description = "No such assignment", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "rbac"
)]
pub async fn revoke_role(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<RoleAssignment>>,
) -> Response {
    if let Err(response) = require_super_admin(&headers, &service).await {
        return response;
    }
    let Some(Json(request)) = payload else {
        return missing_payload();
    };
    respond_empty(
        service
            .rbac()
            .revoke_role(request.admin_id, request.role_id)
            .await,
    )
}

#[utoipa::path(
    get,
    path = "/v1/admin/admins/{admin_id}/roles",
    params(("admin_id" = i64, Path, description = "Admin id")),
    responses(
        (status = 200, description = "Roles held by the admin", body = [Role]),
        (status = 404, description = "Unknown admin", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "rbac"
)]
pub async fn admin_roles(
    headers: HeaderMap,
    Path(admin_id): Path<i64>,
    service: Extension<Arc<AuthService>>,
) -> Response {
    if let Err(response) = require_super_admin(&headers, &service).await {
        return response;
    }
    respond(StatusCode::OK, service.rbac().admin_roles(admin_id).await)
}

#[utoipa::path(
    get,
    path = "/v1/admin/permissions",
    responses(
        (status = 200, description = "All permissions", body = [Permission]),
        (status = 403, description = "Caller is not a super admin", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "rbac"
)]
pub async fn list_permissions(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
) -> Response {
    if let Err(response) = require_super_admin(&headers, &service).await {
        return response;
    }
    respond(StatusCode::OK, service.rbac().list_permissions().await)
}

#[utoipa::path(
    post,
    path = "/v1/admin/permissions",
    request_body = PermissionRequest,
    responses(
        (status = 201, description = "Permission created", body = Permission),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 409, description = "Permission name taken", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "rbac"
)]
pub async fn create_permission(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<PermissionRequest>>,
) -> Response {
    if let Err(response) = require_super_admin(&headers, &service).await {
        return response;
    }
    let Some(Json(request)) = payload else {
        return missing_payload();
    };
    respond(
        StatusCode::CREATED,
        service.rbac().create_permission(request.into()).await,
    )
}

#[utoipa::path(
    get,
    path = "/v1/admin/permissions/{permission_id}",
    params(("permission_id" = i64, Path, description = "Permission id")),
    responses(
        (status = 200, description = "Permission", body = Permission),
        (status = 404, description = "Unknown permission", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "rbac"
)]
pub async fn get_permission(
    headers: HeaderMap,
    Path(permission_id): Path<i64>,
    service: Extension<Arc<AuthService>>,
) -> Response {
    if let Err(response) = require_super_admin(&headers, &service).await {
        return response;
    }
    respond(
        StatusCode::OK,
        service.rbac().get_permission(permission_id).await,
    )
}

#[utoipa::path(
    put,
    path = "/v1/admin/permissions/{permission_id}",
    params(("permission_id" = i64, Path, description = "Permission id")),
    request_body = PermissionRequest,
    responses(
        (status = 200, description = "Permission updated", body = Permission),
        (status = 404, description = "Unknown permission", body = ErrorBody),
        (status = 409, description = "Permission name taken", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "rbac"
)]
pub async fn update_permission(
    headers: HeaderMap,
    Path(permission_id): Path<i64>,
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<PermissionRequest>>,
) -> Response {
    if let Err(response) = require_super_admin(&headers, &service).await {
        return response;
    }
    let Some(Json(request)) = payload else {
        return missing_payload();
    };
    respond(
        StatusCode::OK,
        service
            .rbac()
            .update_permission(permission_id, request.into())
            .await,
    )
}

#[utoipa::path(
    delete,
    path = "/v1/admin/permissions/{permission_id}",
    params(("permission_id" = i64, Path, description = "Permission id")),
    responses(
        (status = 204, description = "Permission and its grants removed"),
        (status = 404, description = "Unknown permission", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "rbac"
)]
pub async fn delete_permission(
    headers: HeaderMap,
    Path(permission_id): Path<i64>,
    service: Extension<Arc<AuthService>>,
) -> Response {
    if let Err(response) = require_super_admin(&headers, &service).await {
        return response;
    }
    respond_empty(service.rbac().delete_permission(permission_id).await)
}

#[utoipa::path(
    post,
    path = "/v1/admin/permissions/assign",
    request_body = PermissionAssignment,
    responses(
        (status = 204, description = "Permission granted to role"),
        (status = 404, description = "Unknown role or permission", body = ErrorBody),
        (status = 409, description = "Already granted", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "rbac"
)]
pub async fn assign_permission(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<PermissionAssignment>>,
) -> Response {
    if let Err(response) = require_super_admin(&headers, &service).await {
        return response;
    }
    let Some(Json(request)) = payload else {
        return missing_payload();
    };
    respond_empty(
        service
            .rbac()
            .assign_permission(request.role_id, request.permission_id)
            .await,
    )
}

#[utoipa::path(
    post,
    path = "/v1/admin/permissions/revoke",
    request_body = PermissionAssignment,
    responses(
        (status = 204, description = "Permission withdrawn from role"),
        (status = 404, description = "No such grant", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "rbac"
)]
pub async fn revoke_permission(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<PermissionAssignment>>,
) -> Response {
    if let Err(response) = require_super_admin(&headers, &service).await {
        return response;
    }
    let Some(Json(request)) = payload else {
        return missing_payload();
    };
    respond_empty(
        service
            .rbac()
            .revoke_permission(request.role_id, request.permission_id)
            .await,
    )
}

#[utoipa::path(
    post,
    path = "/v1/admin/permissions/check",
    request_body = PermissionCheck,
    responses(
        (status = 200, description = "Decision for the calling admin", body = PermissionDecision),
        (status = 400, description = "Neither permission nor section given", body = ErrorBody),
        (status = 403, description = "Caller is not an admin", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "rbac"
)]
pub async fn check_permission(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<PermissionCheck>>,
) -> Response {
    let principal = match require_full_bearer(&headers, &service) {
        Ok(principal) if principal.kind == PrincipalKind::Admin => principal,
        Ok(_) => return error_response(&AuthError::PermissionDenied),
        Err(response) => return response,
    };
    let Some(Json(request)) = payload else {
        return missing_payload();
    };
    let permission = match (request.permission, request.section) {
        (Some(permission), _) if !permission.trim().is_empty() => {
            permission.trim().to_string()
        }
        (_, Some(section)) if !section.trim().is_empty() => permission_name(
            section.trim(),
            request.action.as_deref().unwrap_or_default().trim(),
        ),
        _ => {
            return error_response(&AuthError::InvalidInput(
                "permission or section is required",
            ))
        }
    };
    match service.rbac().has_permission(principal.id, &permission).await {
        Ok(allowed) => (
            StatusCode::OK,
            Json(PermissionDecision {
                permission,
                allowed,
            }),
        )
            .into_response(),
        Err(err) => error_response(&err),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::{
        api::handlers::test_support::{call, test_app, TestApp},
        auth::PrincipalKind,
    };
    use anyhow::Result;
    use axum::http::StatusCode;
    use serde_json::{json, Value};

    async fn admin_token(app: &TestApp, email: &str, password: &str) -> Result<String> {
        let pair = app
            .service
            .sign_in(PrincipalKind::Admin, email, password)
            .await?;
        Ok(pair.access_token)
    }

    async fn post(app: &TestApp, uri: &str, token: &str, body: Value) -> Result<(StatusCode, Value)> {
        call(&app.router, "POST", uri, Some(token), Some(body)).await
    }

    #[tokio::test]
    async fn support_refund_over_http() -> Result<()> {
        let app = test_app()?;
        app.service
            .bootstrap_super_admin("Root", "root@carhub.dev", "root-password")
            .await?;
        let (agent, super_role) = app
            .service
            .bootstrap_super_admin("Agent", "agent@carhub.dev", "agent-password")
            .await?;
        let root = admin_token(&app, "root@carhub.dev", "root-password").await?;

        let (status, _) = post(
            &app,
            "/v1/admin/roles/revoke",
            &root,
            json!({ "admin_id": agent.id, "role_id": super_role.id }),
        )
        .await?;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, support) =
            post(&app, "/v1/admin/roles", &root, json!({ "name": "support" })).await?;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(support["display_name"], "support");
        let (status, refund) = post(
            &app,
            "/v1/admin/permissions",
            &root,
            json!({ "name": "orders.refund", "description": "Refund an order" }),
        )
        .await?;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = post(
            &app,
            "/v1/admin/roles/assign",
            &root,
            json!({ "admin_id": agent.id, "role_id": support["id"] }),
        )
        .await?;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let agent_token = admin_token(&app, "agent@carhub.dev", "agent-password").await?;
        let check = json!({ "section": "orders", "action": "refund" });
        let (status, decision) = post(
            &app,
            "/v1/admin/permissions/check",
            &agent_token,
            check.clone(),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(decision["permission"], "orders.refund");
        assert_eq!(decision["allowed"], false);

        // Support agents cannot administer roles.
        let (status, body) =
            call(&app.router, "GET", "/v1/admin/roles", Some(&agent_token), None).await?;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "permission_denied");

        let grant = json!({ "role_id": support["id"], "permission_id": refund["id"] });
        let (status, _) = post(&app, "/v1/admin/permissions/assign", &root, grant.clone()).await?;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = post(&app, "/v1/admin/permissions/assign", &root, grant).await?;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "permission_already_assigned");

        let (_, decision) =
            post(&app, "/v1/admin/permissions/check", &agent_token, check).await?;
        assert_eq!(decision["allowed"], true);

        let uri = format!("/v1/admin/roles/{}/permissions", support["id"]);
        let (status, granted) = call(&app.router, "GET", &uri, Some(&root), None).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(granted[0]["name"], "orders.refund");

        let uri = format!("/v1/admin/admins/{}/roles", agent.id);
        let (_, roles) = call(&app.router, "GET", &uri, Some(&root), None).await?;
        assert_eq!(roles.as_array().map(Vec::len), Some(1));
        assert_eq!(roles[0]["name"], "support");
        Ok(())
    }

    #[tokio::test]
    async fn role_crud_and_cascade() -> Result<()> {
        let app = test_app()?;
        app.service
            .bootstrap_super_admin("Root", "root@carhub.dev", "root-password")
            .await?;
        let root = admin_token(&app, "root@carhub.dev", "root-password").await?;

        let (_, role) = post(
            &app,
            "/v1/admin/roles",
            &root,
            json!({ "name": "finance", "display_name": "Finance" }),
        )
        .await?;
        let role_uri = format!("/v1/admin/roles/{}", role["id"]);

        let (status, body) = post(&app, "/v1/admin/roles", &root, json!({ "name": "finance" })).await?;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "role_exists");

        let (status, updated) = call(
            &app.router,
            "PUT",
            &role_uri,
            Some(&root),
            Some(json!({ "name": "finance", "description": "Books" })),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["description"], "Books");

        let (status, _) = call(&app.router, "DELETE", &role_uri, Some(&root), None).await?;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = call(&app.router, "GET", &role_uri, Some(&root), None).await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "role_not_found");

        let (status, body) = post(&app, "/v1/admin/roles", &root, json!({ "name": "  " })).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_input");
        Ok(())
    }

    #[tokio::test]
    async fn users_cannot_check_permissions() -> Result<()> {
        let app = test_app()?;
        let (status, body) = call(
            &app.router,
            "POST",
            "/v1/admin/permissions/check",
            None,
            Some(json!({ "permission": "orders.read" })),
        )
        .await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid_or_expired_token");

        app.service
            .bootstrap_super_admin("Root", "root@carhub.dev", "root-password")
            .await?;
        let root = admin_token(&app, "root@carhub.dev", "root-password").await?;
        let (status, body) = post(&app, "/v1/admin/permissions/check", &root, json!({})).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_input");

        let (_, decision) = post(
            &app,
            "/v1/admin/permissions/check",
            &root,
            json!({ "permission": "never.created" }),
        )
        .await?;
        assert_eq!(decision["allowed"], true);
        Ok(())
    }
}
