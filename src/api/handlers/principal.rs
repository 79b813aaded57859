//! Who-am-I endpoint backed by token validation.

use axum::{Extension, Json, http::HeaderMap};
use std::sync::Arc;

use crate::api::AppState;
use crate::api::handlers::{types::PrincipalResponse, utils::require_principal};
use crate::auth::AuthError;

#[utoipa::path(
    get,
    path = "/v1/auth/principal",
    responses(
        (status = 200, description = "The authenticated subject", body = PrincipalResponse),
        (status = 401, description = "Token missing, expired, tampered, or revoked"),
        (status = 503, description = "Directory or session store unavailable")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn principal(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<PrincipalResponse>, AuthError> {
    let claims = require_principal(&state, &headers).await?;

    let subject = state
        .directory
        .subject_by_id(claims.sub)
        .await
        .map_err(AuthError::Unavailable)?
        .ok_or(AuthError::InvalidCredentials)?;
    let permissions = state
        .directory
        .permissions(subject.id)
        .await
        .map_err(AuthError::Unavailable)?;

    Ok(Json(PrincipalResponse {
        subject_id: subject.id,
        username: subject.username,
        role: subject.role,
        totp_enabled: subject.totp_enabled,
        permissions,
    }))
}
