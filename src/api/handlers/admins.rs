//! Admin session endpoints. Admins are provisioned, never signed up.

use super::{refresh_as, sign_in_as, sign_out_as, ErrorBody, RefreshRequest, SignInRequest};
use crate::auth::{AuthService, PrincipalKind, TokenPair};
use axum::{extract::Extension, http::HeaderMap, response::Response, Json};
use std::sync::Arc;

#[utoipa::path(
    post,
    path = "/v1/admins/signin",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Signed in, roles included", body = TokenPair),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 403, description = "Account inactive", body = ErrorBody)
    ),
    tag = "admins"
)]
pub async fn signin(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<SignInRequest>>,
) -> Response {
    sign_in_as(&service, PrincipalKind::Admin, payload).await
}

#[utoipa::path(
    post,
    path = "/v1/admins/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Rotated token pair", body = TokenPair),
        (status = 401, description = "Invalid or expired refresh token", body = ErrorBody)
    ),
    tag = "admins"
)]
pub async fn refresh(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<RefreshRequest>>,
) -> Response {
    refresh_as(&service, PrincipalKind::Admin, payload).await
}

#[utoipa::path(
    post,
    path = "/v1/admins/signout",
    responses(
        (status = 204, description = "Refresh session revoked"),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "admins"
)]
pub async fn signout(headers: HeaderMap, service: Extension<Arc<AuthService>>) -> Response {
    sign_out_as(&service, PrincipalKind::Admin, &headers).await
}
