//! OpenAPI document for the auth API.

use axum::Json;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::api::handlers;
use crate::passkeys::CredentialSummary;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::login::login,
        handlers::login::verify_second_factor,
        handlers::totp::enroll_start,
        handlers::totp::enroll_finish,
        handlers::totp::disable,
        handlers::passkeys::login_start,
        handlers::passkeys::login_finish,
        handlers::passkeys::register_start,
        handlers::passkeys::register_finish,
        handlers::passkeys::list,
        handlers::passkeys::revoke,
        handlers::sessions::list,
        handlers::sessions::revoke,
        handlers::sessions::revoke_all,
        handlers::principal::principal,
    ),
    components(schemas(
        handlers::health::Health,
        handlers::types::LoginRequest,
        handlers::types::LoginResponse,
        handlers::types::SecondFactorRequest,
        handlers::types::TokenResponse,
        handlers::types::PasskeyLoginStartRequest,
        handlers::types::ChallengeResponse,
        handlers::types::PasskeyLoginFinishRequest,
        handlers::types::PasskeyRegisterFinishRequest,
        handlers::types::SessionView,
        handlers::types::RevokedResponse,
        handlers::types::TotpEnrollStartResponse,
        handlers::types::TotpEnrollFinishRequest,
        handlers::types::TotpEnrollFinishResponse,
        handlers::types::TotpDisableRequest,
        handlers::types::PrincipalResponse,
        CredentialSummary,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Password login and token validation"),
        (name = "totp", description = "TOTP enrollment and verification"),
        (name = "passkeys", description = "Passkey ceremonies and credential management"),
        (name = "sessions", description = "Session listing and revocation"),
        (name = "health", description = "Liveness"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

pub async fn serve_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi())
}
