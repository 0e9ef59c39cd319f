use crate::{
    auth::{AuthConfig, AuthService, LogCodeSender},
    store::PgStore,
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    Extension, Router,
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{error, info, info_span, Span};
use ulid::Ulid;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

pub(crate) mod handlers;
mod openapi;

pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Full application: documented routes, Swagger UI and middleware.
///
/// `pool` is only used by `/health`; without it the database is reported as
/// `memory`.
pub fn app(service: Arc<AuthService>, pool: Option<PgPool>) -> Router {
    let (router, openapi) = router().split_for_parts();

    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_origin(Any);

    let app = router
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", openapi))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(service)),
        );

    match pool {
        Some(pool) => app.layer(Extension(pool)),
        None => app,
    }
}

/// Start the server
/// # Errors
/// Return error if failed to connect to the database or to bind the port
pub async fn new(
    port: u16,
    dsn: String,
    auth_config: AuthConfig,
    otp_sweep_interval: Option<Duration>,
) -> Result<()> {
    let pool = connect(&dsn).await?;

    let store = Arc::new(PgStore::new(pool.clone()));
    let service = Arc::new(AuthService::new(
        store,
        Arc::new(LogCodeSender),
        auth_config,
    )?);

    if let Some(every) = otp_sweep_interval {
        spawn_otp_sweep(service.clone(), every);
    }

    let app = app(service, Some(pool));

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", err);
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

/// Connect to the database
/// # Errors
/// Return error if the pool can't be established
pub async fn connect(dsn: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")
}

// Deletes expired and used codes every `every`; failures are only logged.
fn spawn_otp_sweep(service: Arc<AuthService>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match service.otp().sweep().await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "swept spent one-time codes"),
                Err(err) => error!("OTP sweep failed: {}", err),
            }
        }
    });
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
