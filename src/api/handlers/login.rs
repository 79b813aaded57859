//! Password login and the 2FA verification step.

use axum::{Extension, Json, http::HeaderMap};
use std::sync::Arc;

use crate::api::AppState;
use crate::api::handlers::{
    types::{LoginRequest, LoginResponse, SecondFactorRequest, TokenResponse},
    utils::client_addr,
};
use crate::auth::{AuthError, LoginOutcome, SecondFactor};

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued, or a second factor is required", body = LoginResponse),
        (status = 401, description = "Authentication failed"),
        (status = 423, description = "Too many failed attempts"),
        (status = 503, description = "Directory or session store unavailable")
    ),
    tag = "auth"
)]
pub async fn login(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthError> {
    let addr = client_addr(&headers);
    let outcome = state
        .flow
        .login(&body.username, &body.password, addr, body.device_name)
        .await?;

    let response = match outcome {
        LoginOutcome::Issued(issued) => LoginResponse::issued(issued.token, issued.expires_at),
        LoginOutcome::SecondFactorRequired => LoginResponse::second_factor(),
    };
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/verify",
    request_body = SecondFactorRequest,
    responses(
        (status = 200, description = "Second factor accepted, token issued", body = TokenResponse),
        (status = 401, description = "Authentication failed"),
        (status = 423, description = "Too many failed attempts"),
        (status = 503, description = "Directory or session store unavailable")
    ),
    tag = "auth"
)]
pub async fn verify_second_factor(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SecondFactorRequest>,
) -> Result<Json<TokenResponse>, AuthError> {
    let factor = match (&body.code, &body.backup_code) {
        (Some(code), _) => SecondFactor::Totp(code),
        (None, Some(code)) => SecondFactor::BackupCode(code),
        (None, None) => return Err(AuthError::InvalidCredentials),
    };

    let addr = client_addr(&headers);
    let issued = state
        .flow
        .verify_second_factor(&body.username, factor, addr, body.device_name.clone())
        .await?;

    Ok(Json(TokenResponse {
        token: issued.token,
        expires_at: issued.expires_at,
    }))
}
