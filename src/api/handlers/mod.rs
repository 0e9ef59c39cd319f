//! HTTP handlers and the glue they share.
//!
//! Flow Overview:
//! 1) Handlers take `Option<Json<T>>` so a missing body is a plain 400.
//! 2) Protected handlers call [`require_bearer`] first; the returned
//!    [`AuthenticatedPrincipal`] is passed explicitly to the service.
//! 3) Every [`AuthError`] becomes `{"error": "<tag>"}` with a fixed status.

pub mod admins;
pub mod health;
pub mod me;
pub mod partners;
pub mod rbac;
pub mod users;

use crate::auth::{AuthError, AuthService, AuthenticatedPrincipal, PrincipalKind};
use axum::{
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyCodeRequest {
    pub code: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyCodeByEmailRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResendByEmailRequest {
    pub email: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub status: crate::auth::service::AccountStatus,
}

#[must_use]
pub fn status_for(err: &AuthError) -> StatusCode {
    match err {
        AuthError::InvalidCredentials | AuthError::InvalidOrExpiredToken => StatusCode::UNAUTHORIZED,
        AuthError::AccountInactive | AuthError::AccountNotVerified | AuthError::PermissionDenied => {
            StatusCode::FORBIDDEN
        }
        AuthError::InvalidOrExpiredCode | AuthError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        AuthError::CodeAlreadyOutstanding | AuthError::RateLimitExceeded => {
            StatusCode::TOO_MANY_REQUESTS
        }
        AuthError::NotFound(_) => StatusCode::NOT_FOUND,
        AuthError::AlreadyExists(_) | AuthError::AlreadyAssigned(_) | AuthError::AlreadyVerified => {
            StatusCode::CONFLICT
        }
        AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Render an error as its status and tag. Internal causes are logged, never sent.
#[must_use]
pub fn error_response(err: &AuthError) -> Response {
    if let AuthError::Internal(cause) = err {
        error!("request failed: {cause:#}");
    }
    (
        status_for(err),
        Json(ErrorBody {
            error: err.tag().to_string(),
        }),
    )
        .into_response()
}

pub(crate) fn missing_payload() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: "missing_payload".to_string(),
        }),
    )
        .into_response()
}

/// Token from `Authorization: Bearer <token>`.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Resolve the bearer access token into a principal, or the error response to return.
#[allow(clippy::result_large_err)]
pub fn require_bearer(
    headers: &HeaderMap,
    service: &AuthService,
) -> Result<AuthenticatedPrincipal, Response> {
    let Some(token) = bearer_token(headers) else {
        return Err(error_response(&AuthError::InvalidOrExpiredToken));
    };
    service
        .authenticate(token)
        .map_err(|err| error_response(&err))
}

/// [`require_bearer`] that also refuses limited and unverified identities.
#[allow(clippy::result_large_err)]
pub fn require_full_bearer(
    headers: &HeaderMap,
    service: &AuthService,
) -> Result<AuthenticatedPrincipal, Response> {
    let principal = require_bearer(headers, service)?;
    principal
        .require_full_access()
        .map_err(|err| error_response(&err))?;
    Ok(principal)
}

pub(crate) async fn sign_in_as(
    service: &AuthService,
    kind: PrincipalKind,
    payload: Option<Json<SignInRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };
    match service.sign_in(kind, &request.email, &request.password).await {
        Ok(pair) => (StatusCode::OK, Json(pair)).into_response(),
        Err(err) => error_response(&err),
    }
}

pub(crate) async fn refresh_as(
    service: &AuthService,
    kind: PrincipalKind,
    payload: Option<Json<RefreshRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };
    match service.refresh(kind, request.refresh_token.trim()).await {
        Ok(pair) => (StatusCode::OK, Json(pair)).into_response(),
        Err(err) => error_response(&err),
    }
}

pub(crate) async fn sign_out_as(
    service: &AuthService,
    kind: PrincipalKind,
    headers: &HeaderMap,
) -> Response {
    let principal = match require_bearer(headers, service) {
        Ok(principal) => principal,
        Err(response) => return response,
    };
    if principal.kind != kind {
        return error_response(&AuthError::InvalidOrExpiredToken);
    }
    match service.sign_out(&principal).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::{
        api,
        auth::{AuthConfig, AuthService, LogCodeSender},
        store::MemoryStore,
    };
    use anyhow::Result;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use secrecy::SecretString;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    pub struct TestApp {
        pub store: Arc<MemoryStore>,
        pub service: Arc<AuthService>,
        pub router: Router,
    }

    pub fn test_app() -> Result<TestApp> {
        let store = Arc::new(MemoryStore::new());
        let service = Arc::new(AuthService::new(
            store.clone(),
            Arc::new(LogCodeSender),
            AuthConfig::new(SecretString::from("api-test-secret".to_string())),
        )?);
        let router = api::app(service.clone(), None);
        Ok(TestApp {
            store,
            service,
            router,
        })
    }

    pub async fn call(
        router: &Router,
        method: &str,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => request
                .header("Content-Type", "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => request.body(Body::empty())?,
        };

        let response = router.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, json))
    }
}
