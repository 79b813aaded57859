//! HTTP surface for the authentication core.

use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{delete, get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use url::Url;

pub(crate) mod handlers;
mod openapi;

pub use openapi::openapi;

use crate::auth::AuthFlow;
use crate::directory::UserDirectory;
use crate::passkeys::PasskeyService;
use crate::sessions::SessionStore;
use crate::token::TokenService;
use crate::totp::TotpService;

/// Everything the handlers need, shared via an `Extension` layer.
pub struct AppState {
    pub flow: AuthFlow,
    pub tokens: Arc<TokenService>,
    pub totp: Arc<TotpService>,
    pub passkeys: Arc<PasskeyService>,
    pub sessions: Arc<dyn SessionStore>,
    pub directory: Arc<dyn UserDirectory>,
}

#[must_use]
pub fn router() -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/openapi.json", get(openapi::serve_openapi))
        .route("/v1/auth/login", post(handlers::login::login))
        .route(
            "/v1/auth/2fa/verify",
            post(handlers::login::verify_second_factor),
        )
        .route(
            "/v1/auth/2fa/enroll/start",
            post(handlers::totp::enroll_start),
        )
        .route(
            "/v1/auth/2fa/enroll/finish",
            post(handlers::totp::enroll_finish),
        )
        .route("/v1/auth/2fa/disable", post(handlers::totp::disable))
        .route(
            "/v1/auth/passkeys/login/start",
            post(handlers::passkeys::login_start),
        )
        .route(
            "/v1/auth/passkeys/login/finish",
            post(handlers::passkeys::login_finish),
        )
        .route(
            "/v1/auth/passkeys/register/start",
            post(handlers::passkeys::register_start),
        )
        .route(
            "/v1/auth/passkeys/register/finish",
            post(handlers::passkeys::register_finish),
        )
        .route("/v1/auth/passkeys", get(handlers::passkeys::list))
        .route("/v1/auth/passkeys/:id", delete(handlers::passkeys::revoke))
        .route("/v1/auth/sessions", get(handlers::sessions::list))
        .route(
            "/v1/auth/sessions/:jti/revoke",
            post(handlers::sessions::revoke),
        )
        .route(
            "/v1/auth/sessions/revoke-all",
            post(handlers::sessions::revoke_all),
        )
        .route("/v1/auth/principal", get(handlers::principal::principal))
}

/// Start the server.
///
/// # Errors
/// Returns an error if the listener cannot bind or the frontend origin is
/// not a valid URL.
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    pool: sqlx::PgPool,
    frontend_base_url: &str,
) -> Result<()> {
    let origin = frontend_origin(frontend_base_url)?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_origin(AllowOrigin::exact(origin))
        .allow_credentials(true);

    let app = router().layer(
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
            .layer(Extension(state))
            .layer(Extension(pool)),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
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

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontend_origin_strips_path_and_keeps_port() {
        let origin = frontend_origin("https://members.example.com:8443/app/").unwrap();
        assert_eq!(origin, "https://members.example.com:8443");

        let origin = frontend_origin("http://localhost:5173").unwrap();
        assert_eq!(origin, "http://localhost:5173");

        assert!(frontend_origin("not a url").is_err());
    }
}
