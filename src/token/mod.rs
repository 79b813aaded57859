//! Signed session tokens.
//!
//! Tokens are compact HS256 JWTs carrying subject id, username, role, and a
//! unique `jti`. Validation is deliberately generic: expired, tampered, and
//! revoked tokens all come back as the same `Invalid` outcome so callers
//! cannot probe which check failed. The signing key is process-wide config;
//! its absence is a fatal startup error.

use anyhow::{Context, Result, anyhow};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretSlice};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::directory::Subject;
use crate::sessions::{SessionRecord, SessionStore};

const MIN_KEY_LEN: usize = 32;
const DEFAULT_TTL_HOURS: i64 = 8;
const SESSION_LOOKUP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub preferred_username: String,
    pub role: String,
    pub jti: Uuid,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone, Debug)]
pub struct IssuedToken {
    pub token: String,
    pub jti: Uuid,
    pub expires_at: chrono::DateTime<Utc>,
}

/// Outcome of [`TokenService::validate`].
#[derive(Clone, Debug)]
pub enum Validated {
    Valid(Claims),
    /// Signature, expiry, or revocation check failed. Which one is not
    /// disclosed.
    Invalid,
}

pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
    sessions: Arc<dyn SessionStore>,
}

impl TokenService {
    /// # Errors
    /// Returns an error if the signing key is shorter than 32 bytes. The
    /// caller treats this as fatal at startup.
    pub fn new(signing_key: &SecretSlice<u8>, sessions: Arc<dyn SessionStore>) -> Result<Self> {
        let key = signing_key.expose_secret();
        if key.len() < MIN_KEY_LEN {
            return Err(anyhow!(
                "token signing key must be at least {MIN_KEY_LEN} bytes"
            ));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        // No clock leeway: a token expires exactly at exp.
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub", "jti"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(key),
            decoding: DecodingKey::from_secret(key),
            validation,
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
            sessions,
        })
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Mint a token for the subject and register the session under its
    /// fresh `jti` in the same call.
    ///
    /// # Errors
    /// Returns an error if signing or session registration fails.
    pub async fn issue(
        &self,
        subject: &Subject,
        source_addr: Option<IpAddr>,
        device_name: Option<String>,
    ) -> Result<IssuedToken> {
        let now = Utc::now();
        let expires_at = now + self.ttl;
        let jti = Uuid::new_v4();

        let claims = Claims {
            sub: subject.id,
            preferred_username: subject.username.clone(),
            role: subject.role.clone(),
            jti,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .context("Failed to sign session token")?;

        self.sessions
            .insert(&SessionRecord {
                jti,
                subject_id: subject.id,
                issued_at: now,
                expires_at,
                source_addr,
                device_name,
                revoked: false,
            })
            .await?;

        Ok(IssuedToken {
            token,
            jti,
            expires_at,
        })
    }

    /// Verify signature and expiry, then confirm the `jti` is still active
    /// in the session registry. Registry errors and timeouts fail closed.
    ///
    /// # Errors
    /// Returns an error when the session registry is unreachable. The token
    /// is not accepted in that case either.
    pub async fn validate(&self, token: &str) -> Result<Validated> {
        let Ok(data) = decode::<Claims>(token, &self.decoding, &self.validation) else {
            return Ok(Validated::Invalid);
        };

        let lookup = tokio::time::timeout(
            SESSION_LOOKUP_TIMEOUT,
            self.sessions.is_active(data.claims.jti),
        )
        .await;

        match lookup {
            Ok(Ok(true)) => Ok(Validated::Valid(data.claims)),
            Ok(Ok(false)) => Ok(Validated::Invalid),
            Ok(Err(err)) => {
                warn!(error = %err, "session registry lookup failed, rejecting token");
                Err(err)
            }
            Err(_) => {
                warn!("session registry lookup timed out, rejecting token");
                Err(anyhow!("session registry lookup timed out"))
            }
        }
    }
}
