//! TOTP enrollment and disablement endpoints.

use axum::{Extension, Json, http::HeaderMap};
use std::sync::Arc;

use crate::api::AppState;
use crate::api::handlers::{
    types::{
        TotpDisableRequest, TotpEnrollFinishRequest, TotpEnrollFinishResponse,
        TotpEnrollStartResponse,
    },
    utils::require_principal,
};
use crate::auth::AuthError;
use crate::totp::EnrollmentOutcome;

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/enroll/start",
    responses(
        (status = 200, description = "Fresh secret and provisioning URI", body = TotpEnrollStartResponse),
        (status = 401, description = "Not authenticated"),
        (status = 503, description = "Directory unavailable")
    ),
    security(("bearer" = [])),
    tag = "totp"
)]
pub async fn enroll_start(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<TotpEnrollStartResponse>, AuthError> {
    let claims = require_principal(&state, &headers).await?;
    let subject = state
        .directory
        .subject_by_id(claims.sub)
        .await
        .map_err(AuthError::Unavailable)?
        .ok_or(AuthError::InvalidCredentials)?;

    let start = state
        .totp
        .begin_enrollment(&subject)
        .map_err(AuthError::Unavailable)?;

    Ok(Json(TotpEnrollStartResponse {
        secret: start.secret_base32,
        provisioning_uri: start.provisioning_uri,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/enroll/finish",
    request_body = TotpEnrollFinishRequest,
    responses(
        (status = 200, description = "2FA enabled, backup codes returned once", body = TotpEnrollFinishResponse),
        (status = 401, description = "Not authenticated or proof code rejected"),
        (status = 503, description = "Storage unavailable")
    ),
    security(("bearer" = [])),
    tag = "totp"
)]
pub async fn enroll_finish(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<TotpEnrollFinishRequest>,
) -> Result<Json<TotpEnrollFinishResponse>, AuthError> {
    let claims = require_principal(&state, &headers).await?;
    let subject = state
        .directory
        .subject_by_id(claims.sub)
        .await
        .map_err(AuthError::Unavailable)?
        .ok_or(AuthError::InvalidCredentials)?;

    let outcome = state
        .totp
        .finish_enrollment(&subject, &body.secret, &body.code)
        .await
        .map_err(AuthError::Unavailable)?;

    match outcome {
        EnrollmentOutcome::Enabled { backup_codes } => {
            Ok(Json(TotpEnrollFinishResponse { backup_codes }))
        }
        EnrollmentOutcome::Rejected => Err(AuthError::InvalidCredentials),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/disable",
    request_body = TotpDisableRequest,
    responses(
        (status = 204, description = "2FA disabled"),
        (status = 401, description = "Not authenticated or code rejected"),
        (status = 503, description = "Storage unavailable")
    ),
    security(("bearer" = [])),
    tag = "totp"
)]
pub async fn disable(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<TotpDisableRequest>,
) -> Result<axum::http::StatusCode, AuthError> {
    let claims = require_principal(&state, &headers).await?;

    let disabled = state
        .totp
        .disable(claims.sub, &body.code)
        .await
        .map_err(AuthError::Unavailable)?;

    if disabled {
        Ok(axum::http::StatusCode::NO_CONTENT)
    } else {
        Err(AuthError::InvalidCredentials)
    }
}
