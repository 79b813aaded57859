//! Request/response bodies for the auth API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;
use webauthn_rs::prelude::{PublicKeyCredential, RegisterPublicKeyCredential};

use crate::sessions::SessionRecord;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub device_name: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Present (true) when the password was accepted but a TOTP or backup
    /// code must follow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second_factor_required: Option<bool>,
}

impl LoginResponse {
    #[must_use]
    pub fn issued(token: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: Some(token),
            expires_at: Some(expires_at),
            second_factor_required: None,
        }
    }

    #[must_use]
    pub fn second_factor() -> Self {
        Self {
            token: None,
            expires_at: None,
            second_factor_required: Some(true),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecondFactorRequest {
    pub username: String,
    pub code: Option<String>,
    pub backup_code: Option<String>,
    pub device_name: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PasskeyLoginStartRequest {
    pub username: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse {
    pub ceremony_id: Uuid,
    #[schema(value_type = Object)]
    pub options: Value,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PasskeyLoginFinishRequest {
    pub ceremony_id: Uuid,
    #[schema(value_type = Object)]
    pub client_response: PublicKeyCredential,
    pub device_name: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PasskeyRegisterFinishRequest {
    pub ceremony_id: Uuid,
    pub device_name: String,
    #[schema(value_type = Object)]
    pub client_response: RegisterPublicKeyCredential,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub jti: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub source_addr: Option<String>,
    pub device_name: Option<String>,
    /// True for the session whose token made this request.
    pub current: bool,
}

impl SessionView {
    #[must_use]
    pub fn from_record(record: &SessionRecord, current_jti: Uuid) -> Self {
        Self {
            jti: record.jti,
            issued_at: record.issued_at,
            expires_at: record.expires_at,
            source_addr: record.source_addr.map(|addr| addr.to_string()),
            device_name: record.device_name.clone(),
            current: record.jti == current_jti,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RevokedResponse {
    pub revoked: u64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TotpEnrollStartResponse {
    pub secret: String,
    pub provisioning_uri: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TotpEnrollFinishRequest {
    pub secret: String,
    pub code: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TotpEnrollFinishResponse {
    /// Plaintext backup codes, shown exactly once.
    pub backup_codes: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TotpDisableRequest {
    pub code: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalResponse {
    pub subject_id: Uuid,
    pub username: String,
    pub role: String,
    pub totp_enabled: bool,
    pub permissions: Vec<String>,
}
