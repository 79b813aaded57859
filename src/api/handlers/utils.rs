//! Shared handler helpers.

use axum::http::HeaderMap;
use std::net::IpAddr;

use crate::api::AppState;
use crate::auth::AuthError;
use crate::token::{Claims, Validated};

/// Source address as reported by the reverse proxy. `None` when neither
/// header is present or parseable; callers treat that as unknown rather
/// than failing.
#[must_use]
pub fn client_addr(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        let first = forwarded.to_str().ok()?.split(',').next()?.trim();
        return first.parse().ok();
    }
    headers
        .get("x-real-ip")
        .and_then(|val| val.to_str().ok())
        .and_then(|val| val.trim().parse().ok())
}

/// Validate the bearer token and return its claims.
///
/// # Errors
/// `InvalidCredentials` for a missing, malformed, expired, or revoked
/// token; `Unavailable` when the session registry cannot be reached.
pub async fn require_principal(state: &AppState, headers: &HeaderMap) -> Result<Claims, AuthError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|val| val.to_str().ok())
        .and_then(|val| val.strip_prefix("Bearer "))
        .ok_or(AuthError::InvalidCredentials)?;

    match state
        .tokens
        .validate(token)
        .await
        .map_err(AuthError::Unavailable)?
    {
        Validated::Valid(claims) => Ok(claims),
        Validated::Invalid => Err(AuthError::InvalidCredentials),
    }
}
