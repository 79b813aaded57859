//! Error taxonomy for the authentication core.
//!
//! Anything a caller could use to distinguish *which* credential failed is
//! collapsed into [`AuthError::InvalidCredentials`]. Lockout is reported
//! distinctly; hiding it frustrates legitimate users and tells attackers
//! nothing they cannot already infer from being rate-limited.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Bad password, bad TOTP/backup code, bad passkey assertion.
    #[error("authentication failed")]
    InvalidCredentials,

    /// The attempt guard tripped for this username or source address.
    #[error("account temporarily locked")]
    LockedOut,

    /// Source country is blocked. Clients see a generic failure; the
    /// distinct variant exists so the server side can log it apart.
    #[error("authentication failed")]
    GeoBlocked,

    /// Passkey ceremony state missing, expired, or already consumed.
    #[error("challenge expired, please retry")]
    ChallengeExpired,

    /// Storage outage on a path that must fail closed.
    #[error("service unavailable")]
    Unavailable(#[source] anyhow::Error),

    /// Startup-only configuration failure. The process refuses to start
    /// rather than degrade.
    #[error("configuration error: {0}")]
    Config(String),
}

impl AuthError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials | Self::GeoBlocked | Self::ChallengeExpired => {
                StatusCode::UNAUTHORIZED
            }
            Self::LockedOut => StatusCode::LOCKED,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message exposed to clients. `GeoBlocked` deliberately shares the
    /// `InvalidCredentials` wording.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidCredentials | Self::GeoBlocked => "authentication failed",
            Self::LockedOut => "too many failed attempts, try again later",
            Self::ChallengeExpired => "challenge expired, please retry",
            Self::Unavailable(_) => "service unavailable",
            Self::Config(_) => "internal error",
        }
    }
}

impl From<crate::passkeys::CeremonyError> for AuthError {
    fn from(err: crate::passkeys::CeremonyError) -> Self {
        use crate::passkeys::CeremonyError;
        match err {
            CeremonyError::NotFound | CeremonyError::Expired => Self::ChallengeExpired,
            CeremonyError::SubjectMismatch
            | CeremonyError::Rejected
            | CeremonyError::CounterReplay => Self::InvalidCredentials,
            CeremonyError::Storage(source) => Self::Unavailable(source),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.public_message() }));
        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geo_block_is_indistinguishable_from_bad_credentials() {
        let geo = AuthError::GeoBlocked;
        let creds = AuthError::InvalidCredentials;
        assert_eq!(geo.status(), creds.status());
        assert_eq!(geo.public_message(), creds.public_message());
    }

    #[test]
    fn lockout_maps_to_423() {
        assert_eq!(AuthError::LockedOut.status(), StatusCode::LOCKED);
    }

    #[test]
    fn unavailable_is_not_reported_as_invalid_credentials() {
        let err = AuthError::Unavailable(anyhow::anyhow!("pool timeout"));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_ne!(
            err.public_message(),
            AuthError::InvalidCredentials.public_message()
        );
    }
}
