//! Passkey login and credential management endpoints.

use axum::{Extension, Json, extract::Path, http::HeaderMap, http::StatusCode};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::handlers::{
    types::{
        ChallengeResponse, PasskeyLoginFinishRequest, PasskeyLoginStartRequest,
        PasskeyRegisterFinishRequest, TokenResponse,
    },
    utils::{client_addr, require_principal},
};
use crate::auth::AuthError;
use crate::passkeys::CredentialSummary;

#[utoipa::path(
    post,
    path = "/v1/auth/passkeys/login/start",
    request_body = PasskeyLoginStartRequest,
    responses(
        (status = 200, description = "Assertion options", body = ChallengeResponse),
        (status = 503, description = "Credential store unavailable")
    ),
    tag = "passkeys"
)]
pub async fn login_start(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<PasskeyLoginStartRequest>,
) -> Result<Json<ChallengeResponse>, AuthError> {
    let start = state
        .passkeys
        .start_authentication(&body.username)
        .await
        .map_err(AuthError::Unavailable)?;

    Ok(Json(ChallengeResponse {
        ceremony_id: start.ceremony_id,
        options: start.options,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/passkeys/login/finish",
    request_body = PasskeyLoginFinishRequest,
    responses(
        (status = 200, description = "Assertion accepted, token issued", body = TokenResponse),
        (status = 401, description = "Assertion rejected or challenge expired"),
        (status = 503, description = "Credential store unavailable")
    ),
    tag = "passkeys"
)]
pub async fn login_finish(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PasskeyLoginFinishRequest>,
) -> Result<Json<TokenResponse>, AuthError> {
    let subject = state
        .passkeys
        .finish_authentication(body.ceremony_id, &body.client_response)
        .await?;

    let addr = client_addr(&headers);
    let issued = state
        .flow
        .issue_for_subject(&subject, addr, body.device_name)
        .await?;

    Ok(Json(TokenResponse {
        token: issued.token,
        expires_at: issued.expires_at,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/passkeys/register/start",
    responses(
        (status = 200, description = "Creation options", body = ChallengeResponse),
        (status = 401, description = "Not authenticated"),
        (status = 503, description = "Credential store unavailable")
    ),
    security(("bearer" = [])),
    tag = "passkeys"
)]
pub async fn register_start(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ChallengeResponse>, AuthError> {
    let claims = require_principal(&state, &headers).await?;
    let subject = state
        .directory
        .subject_by_id(claims.sub)
        .await
        .map_err(AuthError::Unavailable)?
        .ok_or(AuthError::InvalidCredentials)?;

    let start = state
        .passkeys
        .start_registration(&subject)
        .await
        .map_err(AuthError::Unavailable)?;

    Ok(Json(ChallengeResponse {
        ceremony_id: start.ceremony_id,
        options: start.options,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/passkeys/register/finish",
    request_body = PasskeyRegisterFinishRequest,
    responses(
        (status = 200, description = "Credential registered", body = CredentialSummary),
        (status = 401, description = "Not authenticated or attestation rejected"),
        (status = 503, description = "Credential store unavailable")
    ),
    security(("bearer" = [])),
    tag = "passkeys"
)]
pub async fn register_finish(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PasskeyRegisterFinishRequest>,
) -> Result<Json<CredentialSummary>, AuthError> {
    let claims = require_principal(&state, &headers).await?;
    let summary = state
        .passkeys
        .finish_registration(
            body.ceremony_id,
            claims.sub,
            &body.device_name,
            &body.client_response,
        )
        .await?;

    Ok(Json(summary))
}

#[utoipa::path(
    get,
    path = "/v1/auth/passkeys",
    responses(
        (status = 200, description = "Registered credentials", body = [CredentialSummary]),
        (status = 401, description = "Not authenticated"),
        (status = 503, description = "Credential store unavailable")
    ),
    security(("bearer" = [])),
    tag = "passkeys"
)]
pub async fn list(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<CredentialSummary>>, AuthError> {
    let claims = require_principal(&state, &headers).await?;
    let credentials = state
        .passkeys
        .list_credentials(claims.sub)
        .await
        .map_err(AuthError::Unavailable)?;
    Ok(Json(credentials))
}

#[utoipa::path(
    delete,
    path = "/v1/auth/passkeys/{id}",
    params(("id" = Uuid, Path, description = "Credential to revoke")),
    responses(
        (status = 204, description = "Credential revoked"),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "No such credential for this subject"),
        (status = 503, description = "Credential store unavailable")
    ),
    security(("bearer" = [])),
    tag = "passkeys"
)]
pub async fn revoke(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AuthError> {
    let claims = require_principal(&state, &headers).await?;
    let removed = state
        .passkeys
        .remove_credential(claims.sub, id)
        .await
        .map_err(AuthError::Unavailable)?;

    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}
