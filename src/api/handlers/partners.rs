//! Partner endpoints. Partners get no token before verification, so the OTP
//! endpoints are addressed by email.

use super::{
    error_response, missing_payload, refresh_as, sign_in_as, sign_out_as, ErrorBody,
    RefreshRequest, ResendByEmailRequest, SignInRequest, StatusResponse, VerifyCodeByEmailRequest,
};
use crate::auth::{
    service::{CodeSent, Signup, SignupOutcome},
    AuthService, PrincipalKind, TokenPair,
};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;

#[utoipa::path(
    post,
    path = "/v1/partners/signup",
    request_body = Signup,
    responses(
        (status = 201, description = "Partner pending verification (also returned on re-entry)", body = SignupOutcome),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 409, description = "Email already registered and verified", body = ErrorBody)
    ),
    tag = "partners"
)]
pub async fn signup(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<Signup>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };
    match service.signup(PrincipalKind::Partner, request).await {
        Ok(outcome) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/partners/verify-otp",
    request_body = VerifyCodeByEmailRequest,
    responses(
        (status = 200, description = "Email verified", body = StatusResponse),
        (status = 400, description = "Invalid or expired code", body = ErrorBody),
        (status = 409, description = "Already verified", body = ErrorBody)
    ),
    tag = "partners"
)]
pub async fn verify_otp(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<VerifyCodeByEmailRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };
    match service
        .verify_code_by_email(PrincipalKind::Partner, &request.email, &request.code)
        .await
    {
        Ok(status) => (StatusCode::OK, Json(StatusResponse { status })).into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/partners/resend-otp",
    request_body = ResendByEmailRequest,
    responses(
        (status = 202, description = "A new code is on its way", body = CodeSent),
        (status = 404, description = "Unknown partner", body = ErrorBody),
        (status = 409, description = "Already verified", body = ErrorBody),
        (status = 429, description = "A code is still live", body = ErrorBody)
    ),
    tag = "partners"
)]
pub async fn resend_otp(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<ResendByEmailRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };
    match service
        .resend_code_by_email(PrincipalKind::Partner, &request.email)
        .await
    {
        Ok(sent) => (StatusCode::ACCEPTED, Json(sent)).into_response(),
        Err(err) => error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/partners/signin",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Signed in", body = TokenPair),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 403, description = "Account inactive or not verified", body = ErrorBody)
    ),
    tag = "partners"
)]
pub async fn signin(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<SignInRequest>>,
) -> Response {
    sign_in_as(&service, PrincipalKind::Partner, payload).await
}

#[utoipa::path(
    post,
    path = "/v1/partners/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Rotated token pair", body = TokenPair),
        (status = 401, description = "Invalid or expired refresh token", body = ErrorBody)
    ),
    tag = "partners"
)]
pub async fn refresh(
    service: Extension<Arc<AuthService>>,
    payload: Option<Json<RefreshRequest>>,
) -> Response {
    refresh_as(&service, PrincipalKind::Partner, payload).await
}

#[utoipa::path(
    post,
    path = "/v1/partners/signout",
    responses(
        (status = 204, description = "Refresh session revoked"),
        (status = 401, description = "Missing or invalid bearer token", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "partners"
)]
pub async fn signout(headers: HeaderMap, service: Extension<Arc<AuthService>>) -> Response {
    sign_out_as(&service, PrincipalKind::Partner, &headers).await
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
    async fn partner_flow_by_email() -> Result<()> {
        let app = test_app()?;
        let signup = json!({
            "display_name": "Fleet Co",
            "email": "fleet@x.com",
            "password": "fleet-password"
        });
        let (status, first) = call(
            &app.router,
            "POST",
            "/v1/partners/signup",
            None,
            Some(signup.clone()),
        )
        .await?;
        assert_eq!(status, StatusCode::CREATED);
        assert!(first.get("access_token").is_none());

        let (status, again) =
            call(&app.router, "POST", "/v1/partners/signup", None, Some(signup)).await?;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(again["principal_id"], first["principal_id"]);
        assert_eq!(again["next_action"], "verify_otp");

        let (status, body) = call(
            &app.router,
            "POST",
            "/v1/partners/signin",
            None,
            Some(json!({ "email": "fleet@x.com", "password": "fleet-password" })),
        )
        .await?;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "account_not_verified");

        let partner_id = first["principal_id"].as_i64().unwrap();
        let code = app
            .store
            .codes_for(partner_id, PrincipalKind::Partner)
            .await
            .pop()
            .unwrap()
            .code;
        let (status, _) = call(
            &app.router,
            "POST",
            "/v1/partners/verify-otp",
            None,
            Some(json!({ "email": "fleet@x.com", "code": code })),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &app.router,
            "POST",
            "/v1/partners/resend-otp",
            None,
            Some(json!({ "email": "fleet@x.com" })),
        )
        .await?;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "email_already_verified");

        let (status, pair) = call(
            &app.router,
            "POST",
            "/v1/partners/signin",
            None,
            Some(json!({ "email": "fleet@x.com", "password": "fleet-password" })),
        )
        .await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pair["roles"], json!(["partner"]));

        // A partner refresh token is useless on the user endpoint.
        let (status, _) = call(
            &app.router,
            "POST",
            "/v1/users/refresh",
            None,
            Some(json!({ "refresh_token": pair["refresh_token"] })),
        )
        .await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
