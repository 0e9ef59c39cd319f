use super::{error_response, require_full_bearer, ErrorBody};
use crate::auth::{service::Profile, AuthService};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;

#[utoipa::path(
    get,
    path = "/v1/me",
    responses(
        (status = 200, description = "Profile of the caller", body = Profile),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody),
        (status = 403, description = "Limited or unverified identity", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "me"
)]
pub async fn me(headers: HeaderMap, service: Extension<Arc<AuthService>>) -> Response {
    let principal = match require_full_bearer(&headers, &service) {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    match service.profile(&principal).await {
        Ok(profile) => (StatusCode::OK, Json(profile)).into_response(),
        Err(err) => error_response(&err),
    }
}
