//! End-user endpoints.
//!
//! Signup answers with a limited bearer token. That token is accepted by
//! `verify-otp` and `resend-otp` only; everything else wants a full token.

use super::{
    error_response, missing_payload, refresh_as, require_bearer, sign_in_as, sign_out_as,
    ErrorBody, RefreshRequest, SignInRequest, StatusResponse, VerifyCodeRequest,
};
use crate::auth::{
    service::{CodeSent, Signup, SignupOutcome},
    AuthError, AuthService, PrincipalKind, TokenPair,
};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;

#[utoipa::path(
    post,
    path = "/v1/users/signup",
    request_body = Signup,
    responses(
        (status = 201, description = "User created, pending verification", body = SignupOutcome),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 409, description = "Email or phone already registered", body = ErrorBody)
    ),
    tag = "users"
)]
pub async fn signup(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<Signup>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };
    match service.signup(PrincipalKind::User, request).await {
        Ok(outcome) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/users/verify-otp",
    request_body = VerifyCodeRequest,
    responses(
        (status = 200, description = "Email verified", body = StatusResponse),
        (status = 400, description = "Invalid or expired code", body = ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn verify_otp(
    headers: HeaderMap,
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<VerifyCodeRequest>>,
) -> Response {
    let principal = match require_bearer(&headers, &service) {
        Ok(principal) if principal.kind == PrincipalKind::User => principal,
        Ok(_) => return error_response(&AuthError::InvalidOrExpiredToken),
        Err(response) => return response,
    };
    let Some(Json(request)) = payload else {
        return missing_payload();
    };
    match service
        .verify_code(PrincipalKind::User, principal.id, &request.code)
        .await
    {
        Ok(status) => (StatusCode::OK, Json(StatusResponse { status })).into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/users/resend-otp",
    responses(
        (status = 202, description = "A new code is on its way", body = CodeSent),
        (status = 409, description = "Already verified", body = ErrorBody),
        (status = 429, description = "A code is still live or the hourly cap is reached", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn resend_otp(headers: HeaderMap, service: Extension<Arc<AuthService>>) -> Response {
    let principal = match require_bearer(&headers, &service) {
        Ok(principal) if principal.kind == PrincipalKind::User => principal,
        Ok(_) => return error_response(&AuthError::InvalidOrExpiredToken),
        Err(response) => return response,
    };
    match service.resend_code(PrincipalKind::User, principal.id).await {
        Ok(sent) => (StatusCode::ACCEPTED, Json(sent)).into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/users/signin",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Signed in", body = TokenPair),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 403, description = "Account inactive or not verified", body = ErrorBody)
    ),
    tag = "users"
)]
pub async fn signin(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<SignInRequest>>,
) -> Response {
    sign_in_as(&service, PrincipalKind::User, payload).await
}

#[utoipa::path(
    post,
    path = "/v1/users/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Rotated token pair", body = TokenPair),
        (status = 401, description = "Invalid or expired refresh token", body = ErrorBody)
    ),
    tag = "users"
)]
pub async fn refresh(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<RefreshRequest>>,
) -> Response {
    refresh_as(&service, PrincipalKind::User, payload).await
}

#[utoipa::path(
    post,
    path = "/v1/users/signout",
    responses(
        (status = 204, description = "Refresh session revoked"),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn signout(headers: HeaderMap, service: Extension<Arc<AuthService>>) -> Response {
    sign_out_as(&service, PrincipalKind::User, &headers).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::{
        api::handlers::test_support::{call, test_app},
        auth::PrincipalKind,
    };
    use anyhow::Result;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn signup_verify_signin_over_http() -> Result<()> {
        let app = test_app()?;
        let (status, body) = call(
            &app.router,
            "POST",
            "/v1/users/signup",
            None,
            Some(json!({
                "display_name": "Asha",
                "email": "a@x.com",
                "password": "correct-horse"
            })),
        )
        .await?;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "pending_verification");
        let limited = body["access_token"].as_str().unwrap().to_string();
        let user_id = body["principal_id"].as_i64().unwrap();

        // Limited token cannot reach the profile.
        let (status, body) = call(&app.router, "GET", "/v1/me", Some(&limited), None).await?;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "account_not_verified");

        let (status, body) =
            call(&app.router, "POST", "/v1/users/resend-otp", Some(&limited), None).await?;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "code_already_outstanding");

        let code = app
            .store
            .codes_for(user_id, PrincipalKind::User)
            .await
            .pop()
            .unwrap()
            .code;
        let (status, body) = call(
            &app.router,
            "POST",
            "/v1/users/verify-otp",
            Some(&limited),
            Some(json!({ "code": code })),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "verified");

        let (status, body) = call(
            &app.router,
            "POST",
            "/v1/users/signin",
            None,
            Some(json!({ "email": "A@x.com", "password": "correct-horse" })),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["expires_in"], 3600);
        assert_eq!(body["token_type"], "Bearer");
        let access = body["access_token"].as_str().unwrap().to_string();
        let refresh = body["refresh_token"].as_str().unwrap().to_string();

        let (status, body) = call(&app.router, "GET", "/v1/me", Some(&access), None).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "a@x.com");
        assert_eq!(body["email_verified"], true);

        let (status, rotated) = call(
            &app.router,
            "POST",
            "/v1/users/refresh",
            None,
            Some(json!({ "refresh_token": refresh })),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &app.router,
            "POST",
            "/v1/users/refresh",
            None,
            Some(json!({ "refresh_token": refresh })),
        )
        .await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid_or_expired_token");

        let new_access = rotated["access_token"].as_str().unwrap();
        let (status, _) =
            call(&app.router, "POST", "/v1/users/signout", Some(new_access), None).await?;
        assert_eq!(status, StatusCode::NO_CONTENT);
        Ok(())
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_look_alike() -> Result<()> {
        let app = test_app()?;
        let (_, wrong) = call(
            &app.router,
            "POST",
            "/v1/users/signin",
            None,
            Some(json!({ "email": "nobody@x.com", "password": "whatever1" })),
        )
        .await?;
        assert_eq!(wrong["error"], "invalid_credentials");
        Ok(())
    }

    #[tokio::test]
    async fn missing_body_is_bad_request() -> Result<()> {
        let app = test_app()?;
        let (status, body) = call(&app.router, "POST", "/v1/users/signup", None, None).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "missing_payload");

        let (status, _) = call(&app.router, "POST", "/v1/users/resend-otp", None, None).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
