//! Session listing and revocation endpoints.

use axum::{Extension, Json, extract::Path, http::HeaderMap, http::StatusCode};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::handlers::{
    types::{RevokedResponse, SessionView},
    utils::require_principal,
};
use crate::auth::AuthError;

#[utoipa::path(
    get,
    path = "/v1/auth/sessions",
    responses(
        (status = 200, description = "Active sessions for the caller", body = [SessionView]),
        (status = 401, description = "Not authenticated"),
        (status = 503, description = "Session store unavailable")
    ),
    security(("bearer" = [])),
    tag = "sessions"
)]
pub async fn list(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionView>>, AuthError> {
    let claims = require_principal(&state, &headers).await?;
    let records = state
        .sessions
        .list_active(claims.sub)
        .await
        .map_err(AuthError::Unavailable)?;

    let views = records
        .iter()
        .map(|record| SessionView::from_record(record, claims.jti))
        .collect();
    Ok(Json(views))
}

#[utoipa::path(
    post,
    path = "/v1/auth/sessions/{jti}/revoke",
    params(("jti" = Uuid, Path, description = "Session to revoke")),
    responses(
        (status = 204, description = "Session revoked"),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "No such session for this subject"),
        (status = 503, description = "Session store unavailable")
    ),
    security(("bearer" = [])),
    tag = "sessions"
)]
pub async fn revoke(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path(jti): Path<Uuid>,
) -> Result<StatusCode, AuthError> {
    let claims = require_principal(&state, &headers).await?;

    // Owner-only. A foreign jti looks identical to a missing one.
    let record = state
        .sessions
        .find(jti)
        .await
        .map_err(AuthError::Unavailable)?;
    let Some(record) = record.filter(|r| r.subject_id == claims.sub) else {
        return Ok(StatusCode::NOT_FOUND);
    };

    state
        .sessions
        .revoke(record.jti)
        .await
        .map_err(AuthError::Unavailable)?;
    info!(subject = %claims.sub, jti = %record.jti, "session revoked");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/v1/auth/sessions/revoke-all",
    responses(
        (status = 200, description = "All other sessions revoked", body = RevokedResponse),
        (status = 401, description = "Not authenticated"),
        (status = 503, description = "Session store unavailable")
    ),
    security(("bearer" = [])),
    tag = "sessions"
)]
pub async fn revoke_all(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<RevokedResponse>, AuthError> {
    let claims = require_principal(&state, &headers).await?;

    // The caller's own session survives.
    let revoked = state
        .sessions
        .revoke_all(claims.sub, Some(claims.jti))
        .await
        .map_err(AuthError::Unavailable)?;

    info!(subject = %claims.sub, revoked, "revoked all other sessions");
    Ok(Json(RevokedResponse { revoked }))
}
