//! Passkey ceremony manager.
//!
//! Flow Overview:
//! 1) Registration: issue creation options bound to the subject, cache the
//!    in-progress state with a short TTL, verify the authenticator response
//!    and persist the credential.
//! 2) Authentication: issue assertion options for a username's known
//!    credentials, cache the state, verify the assertion and enforce the
//!    signature counter rule.
//!
//! Security boundaries:
//! - Ceremony states are single use and expire after the TTL.
//! - An unknown username (or one with no credentials) receives a decoy
//!   challenge of identical shape whose finish rejects like any failed
//!   assertion, so neither response reveals whether the account exists.
//! - The reported signature counter must strictly exceed the stored one.
//!   Equal or lower indicates a cloned or replayed authenticator and is
//!   rejected even when the signature itself verifies.

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use rand::RngCore;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;
use webauthn_rs::prelude::*;

use crate::directory::{Subject, UserDirectory};
use crate::passkeys::repo::{PasskeyRepo, StoredPasskey};

const DEFAULT_CHALLENGE_TTL_SECONDS: u64 = 300;
const DECOY_CHALLENGE_LEN: usize = 32;

#[derive(Clone, Debug)]
pub struct CeremonyConfig {
    rp_id: String,
    rp_name: String,
    origin: Url,
    challenge_ttl: Duration,
}

impl CeremonyConfig {
    /// # Errors
    /// Returns an error if the relying-party id is empty or the origin does
    /// not parse as a URL.
    pub fn new(rp_id: &str, rp_name: &str, origin: &str) -> Result<Self> {
        if rp_id.trim().is_empty() {
            return Err(anyhow!("Passkey relying-party id must not be empty"));
        }
        let origin =
            Url::parse(origin).with_context(|| format!("Invalid passkey origin: {origin}"))?;
        Ok(Self {
            rp_id: rp_id.to_string(),
            rp_name: rp_name.to_string(),
            origin,
            challenge_ttl: Duration::from_secs(DEFAULT_CHALLENGE_TTL_SECONDS),
        })
    }

    #[must_use]
    pub fn with_challenge_ttl(mut self, ttl: Duration) -> Self {
        self.challenge_ttl = ttl;
        self
    }

    #[must_use]
    pub fn rp_id(&self) -> &str {
        &self.rp_id
    }
}

#[derive(Debug, Error)]
pub enum CeremonyError {
    /// No cached state for the ceremony id, or it was already consumed.
    #[error("ceremony not found")]
    NotFound,
    #[error("ceremony expired")]
    Expired,
    /// Ceremony was started for a different subject.
    #[error("subject mismatch")]
    SubjectMismatch,
    /// Assertion or attestation did not verify, or the credential is
    /// unknown. Details are logged, never surfaced.
    #[error("assertion rejected")]
    Rejected,
    /// Signature counter did not advance.
    #[error("signature counter replay")]
    CounterReplay,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Options handed to the client along with the id it must echo back.
#[derive(Clone, Debug)]
pub struct CeremonyStart {
    pub ceremony_id: Uuid,
    pub options: serde_json::Value,
}

#[derive(Clone, Debug, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSummary {
    pub id: Uuid,
    pub device_name: String,
    pub created_at: chrono::DateTime<Utc>,
    pub last_used_at: Option<chrono::DateTime<Utc>>,
}

struct RegistrationState {
    subject_id: Uuid,
    created_at: Instant,
    registration: PasskeyRegistration,
}

struct AuthenticationState {
    created_at: Instant,
    progress: AuthProgress,
}

/// Decoy ceremonies carry no verifier state. Their finish always rejects
/// the assertion, the same outcome a garbage assertion gets against a real
/// ceremony.
enum AuthProgress {
    Ceremony {
        subject_id: Uuid,
        authentication: PasskeyAuthentication,
    },
    Decoy,
}

pub struct PasskeyService {
    config: CeremonyConfig,
    webauthn: Webauthn,
    repo: Arc<dyn PasskeyRepo>,
    directory: Arc<dyn UserDirectory>,
    reg_states: Mutex<HashMap<Uuid, RegistrationState>>,
    auth_states: Mutex<HashMap<Uuid, AuthenticationState>>,
}

impl PasskeyService {
    /// # Errors
    /// Returns an error if the verifier cannot be built from the config.
    pub fn new(
        config: CeremonyConfig,
        repo: Arc<dyn PasskeyRepo>,
        directory: Arc<dyn UserDirectory>,
    ) -> Result<Self> {
        let webauthn = WebauthnBuilder::new(&config.rp_id, &config.origin)?
            .rp_name(&config.rp_name)
            .build()?;
        Ok(Self {
            config,
            webauthn,
            repo,
            directory,
            reg_states: Mutex::new(HashMap::new()),
            auth_states: Mutex::new(HashMap::new()),
        })
    }

    /// Begin registration for an authenticated subject. Existing credential
    /// ids are excluded so the authenticator refuses duplicates.
    ///
    /// # Errors
    /// Returns an error on storage failure or if options cannot be built.
    pub async fn start_registration(&self, subject: &Subject) -> Result<CeremonyStart> {
        let existing = self.repo.list_for_subject(subject.id).await?;
        let exclude: Vec<CredentialID> = existing
            .iter()
            .map(|entry| CredentialID::from(entry.credential_id.clone()))
            .collect();
        let exclude = if exclude.is_empty() {
            None
        } else {
            Some(exclude)
        };

        let (challenge, registration) = self.webauthn.start_passkey_registration(
            subject.id,
            &subject.username,
            &subject.username,
            exclude,
        )?;

        let ceremony_id = Uuid::new_v4();
        let mut states = self.reg_states.lock().await;
        prune_states(&mut states, self.config.challenge_ttl, |s| s.created_at);
        states.insert(
            ceremony_id,
            RegistrationState {
                subject_id: subject.id,
                created_at: Instant::now(),
                registration,
            },
        );

        Ok(CeremonyStart {
            ceremony_id,
            options: serde_json::to_value(&challenge).context("serialize creation options")?,
        })
    }

    /// Verify the authenticator response and persist the new credential.
    /// The cached state is consumed regardless of outcome.
    ///
    /// # Errors
    /// `NotFound`/`Expired` when the ceremony is unknown or stale,
    /// `SubjectMismatch` when it belongs to someone else, `Rejected` when
    /// attestation fails.
    pub async fn finish_registration(
        &self,
        ceremony_id: Uuid,
        subject_id: Uuid,
        device_name: &str,
        response: &RegisterPublicKeyCredential,
    ) -> Result<CredentialSummary, CeremonyError> {
        let state = {
            let mut states = self.reg_states.lock().await;
            prune_states(&mut states, self.config.challenge_ttl, |s| s.created_at);
            states.remove(&ceremony_id).ok_or(CeremonyError::NotFound)?
        };

        if state.created_at.elapsed() >= self.config.challenge_ttl {
            return Err(CeremonyError::Expired);
        }
        if state.subject_id != subject_id {
            return Err(CeremonyError::SubjectMismatch);
        }

        let passkey = self
            .webauthn
            .finish_passkey_registration(response, &state.registration)
            .map_err(|err| {
                warn!(subject = %subject_id, error = %err, "passkey registration rejected");
                CeremonyError::Rejected
            })?;

        let stored = StoredPasskey {
            id: Uuid::new_v4(),
            subject_id,
            device_name: device_name.to_string(),
            credential_id: passkey.cred_id().as_slice().to_vec(),
            credential_json: serde_json::to_vec(&passkey)
                .context("serialize credential")
                .map_err(CeremonyError::Storage)?,
            sign_count: 0,
            created_at: Utc::now(),
            last_used_at: None,
        };
        self.repo.insert(&stored).await?;

        info!(subject = %subject_id, passkey = %stored.id, "passkey registered");
        Ok(CredentialSummary {
            id: stored.id,
            device_name: stored.device_name,
            created_at: stored.created_at,
            last_used_at: None,
        })
    }

    /// Begin authentication for a username. Unknown usernames (and subjects
    /// without credentials) receive a decoy challenge whose finish rejects
    /// the assertion outright.
    ///
    /// # Errors
    /// Returns an error on storage failure or if options cannot be built.
    pub async fn start_authentication(&self, username: &str) -> Result<CeremonyStart> {
        let subject = self.directory.subject_by_username(username).await?;
        let Some(subject) = subject else {
            return Ok(self.decoy_challenge().await);
        };

        let stored = self.repo.list_for_subject(subject.id).await?;
        if stored.is_empty() {
            return Ok(self.decoy_challenge().await);
        }

        let mut passkeys = Vec::with_capacity(stored.len());
        for entry in &stored {
            let passkey: Passkey = serde_json::from_slice(&entry.credential_json)
                .context("deserialize stored credential")?;
            passkeys.push(passkey);
        }

        let (challenge, authentication) = self.webauthn.start_passkey_authentication(&passkeys)?;

        let ceremony_id = Uuid::new_v4();
        let mut states = self.auth_states.lock().await;
        prune_states(&mut states, self.config.challenge_ttl, |s| s.created_at);
        states.insert(
            ceremony_id,
            AuthenticationState {
                created_at: Instant::now(),
                progress: AuthProgress::Ceremony {
                    subject_id: subject.id,
                    authentication,
                },
            },
        );

        Ok(CeremonyStart {
            ceremony_id,
            options: serde_json::to_value(&challenge).context("serialize request options")?,
        })
    }

    /// Verify the assertion, enforce the counter rule, and resolve the
    /// authenticated subject. The cached state is consumed regardless of
    /// outcome.
    ///
    /// # Errors
    /// `NotFound`/`Expired` for unknown or stale ceremonies, `Rejected` when
    /// the assertion fails or the credential is unknown, `CounterReplay`
    /// when the reported counter does not strictly advance.
    pub async fn finish_authentication(
        &self,
        ceremony_id: Uuid,
        response: &PublicKeyCredential,
    ) -> Result<Subject, CeremonyError> {
        let state = {
            let mut states = self.auth_states.lock().await;
            prune_states(&mut states, self.config.challenge_ttl, |s| s.created_at);
            states.remove(&ceremony_id).ok_or(CeremonyError::NotFound)?
        };

        if state.created_at.elapsed() >= self.config.challenge_ttl {
            return Err(CeremonyError::Expired);
        }

        let AuthProgress::Ceremony {
            subject_id,
            authentication,
        } = state.progress
        else {
            warn!("passkey assertion rejected");
            return Err(CeremonyError::Rejected);
        };

        let result = self
            .webauthn
            .finish_passkey_authentication(response, &authentication)
            .map_err(|err| {
                warn!(error = %err, "passkey assertion rejected");
                CeremonyError::Rejected
            })?;

        let stored = self
            .repo
            .find_by_credential_id(result.cred_id().as_slice())
            .await?
            .ok_or(CeremonyError::Rejected)?;
        if stored.subject_id != subject_id {
            return Err(CeremonyError::Rejected);
        }

        let reported = i64::from(result.counter());
        if !counter_advances(stored.sign_count, reported) {
            warn!(
                subject = %stored.subject_id,
                passkey = %stored.id,
                stored = stored.sign_count,
                reported,
                "passkey signature counter did not advance"
            );
            return Err(CeremonyError::CounterReplay);
        }

        let mut passkey: Passkey = serde_json::from_slice(&stored.credential_json)
            .context("deserialize stored credential")?;
        let _ = passkey.update_credential(&result);
        let refreshed = serde_json::to_vec(&passkey)
            .context("serialize credential")
            .map_err(CeremonyError::Storage)?;
        self.repo
            .record_authentication(stored.id, reported, &refreshed)
            .await?;

        let subject = self
            .directory
            .subject_by_id(stored.subject_id)
            .await?
            .ok_or(CeremonyError::Rejected)?;
        info!(subject = %subject.id, passkey = %stored.id, "passkey authentication succeeded");
        Ok(subject)
    }

    /// # Errors
    /// Returns an error on storage failure.
    pub async fn list_credentials(&self, subject_id: Uuid) -> Result<Vec<CredentialSummary>> {
        let stored = self.repo.list_for_subject(subject_id).await?;
        Ok(stored
            .into_iter()
            .map(|entry| CredentialSummary {
                id: entry.id,
                device_name: entry.device_name,
                created_at: entry.created_at,
                last_used_at: entry.last_used_at,
            })
            .collect())
    }

    /// Returns false when the credential does not exist or belongs to
    /// another subject.
    ///
    /// # Errors
    /// Returns an error on storage failure.
    pub async fn remove_credential(&self, subject_id: Uuid, passkey_id: Uuid) -> Result<bool> {
        let removed = self.repo.delete(subject_id, passkey_id).await?;
        if removed {
            info!(subject = %subject_id, passkey = %passkey_id, "passkey revoked");
        }
        Ok(removed)
    }

    // Same JSON shape as real assertion options, and the ceremony id is
    // cached like a real one. Finishing it rejects the assertion, so the
    // responses stay identical whether or not the account has credentials.
    async fn decoy_challenge(&self) -> CeremonyStart {
        let mut bytes = [0u8; DECOY_CHALLENGE_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        let options = serde_json::json!({
            "publicKey": {
                "challenge": URL_SAFE_NO_PAD.encode(bytes),
                "timeout": 60_000,
                "rpId": self.config.rp_id,
                "allowCredentials": [],
                "userVerification": "preferred",
            }
        });
        let ceremony_id = Uuid::new_v4();
        let mut states = self.auth_states.lock().await;
        prune_states(&mut states, self.config.challenge_ttl, |s| s.created_at);
        states.insert(
            ceremony_id,
            AuthenticationState {
                created_at: Instant::now(),
                progress: AuthProgress::Decoy,
            },
        );
        CeremonyStart {
            ceremony_id,
            options,
        }
    }
}

/// Strict advancement rule: equal counters reject. An authenticator that
/// reports the stored value again is indistinguishable from a clone.
fn counter_advances(stored: i64, reported: i64) -> bool {
    reported > stored
}

fn prune_states<S>(states: &mut HashMap<Uuid, S>, ttl: Duration, created_at: impl Fn(&S) -> Instant) {
    states.retain(|_, entry| created_at(entry).elapsed() < ttl);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::passkeys::memory::MemoryPasskeyRepo;

    fn test_subject() -> Subject {
        Subject {
            id: Uuid::new_v4(),
            username: "bosun".to_string(),
            role: "member".to_string(),
            totp_enabled: false,
        }
    }

    async fn test_service(subject: Option<&Subject>) -> PasskeyService {
        let directory = Arc::new(MemoryDirectory::new());
        if let Some(subject) = subject {
            directory.add_member(subject.clone(), None, vec![]).await;
        }
        let config = CeremonyConfig::new("example.com", "Muster", "https://example.com").unwrap();
        PasskeyService::new(config, Arc::new(MemoryPasskeyRepo::new()), directory).unwrap()
    }

    fn dummy_assertion() -> PublicKeyCredential {
        serde_json::from_value(serde_json::json!({
            "id": "dummy",
            "rawId": "AA",
            "type": "public-key",
            "response": {
                "authenticatorData": "AA",
                "clientDataJSON": "AA",
                "signature": "AA"
            }
        }))
        .unwrap()
    }

    #[test]
    fn counter_must_strictly_advance() {
        assert!(counter_advances(0, 1));
        assert!(counter_advances(41, 42));
        assert!(!counter_advances(0, 0));
        assert!(!counter_advances(42, 42));
        assert!(!counter_advances(42, 41));
    }

    #[test]
    fn empty_rp_id_is_rejected() {
        assert!(CeremonyConfig::new("", "Muster", "https://example.com").is_err());
        assert!(CeremonyConfig::new("example.com", "Muster", "not a url").is_err());
    }

    #[tokio::test]
    async fn unknown_username_gets_decoy_challenge() {
        let service = test_service(None).await;
        let start = service.start_authentication("nobody").await.unwrap();

        let public_key = start.options.get("publicKey").unwrap();
        assert!(public_key.get("challenge").is_some());
        assert_eq!(
            public_key.get("allowCredentials").unwrap(),
            &serde_json::json!([])
        );
    }

    // A bad assertion must fail the same way against a decoy ceremony as
    // against a real one, or the finish step becomes an account oracle.
    #[tokio::test]
    async fn decoy_finish_rejects_like_a_real_ceremony() {
        let subject = test_subject();
        let service = test_service(Some(&subject)).await;

        let decoy = service.start_authentication("nobody").await.unwrap();
        let err = service
            .finish_authentication(decoy.ceremony_id, &dummy_assertion())
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::Rejected));

        // Decoy ceremonies are single use as well.
        let err = service
            .finish_authentication(decoy.ceremony_id, &dummy_assertion())
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::NotFound));
    }

    #[tokio::test]
    async fn known_user_without_credentials_matches_decoy_shape() {
        let subject = test_subject();
        let service = test_service(Some(&subject)).await;

        let known = service
            .start_authentication(&subject.username)
            .await
            .unwrap();
        let unknown = service.start_authentication("nobody").await.unwrap();

        let keys = |v: &serde_json::Value| {
            let mut names: Vec<String> = v
                .get("publicKey")
                .and_then(|pk| pk.as_object())
                .map(|obj| obj.keys().cloned().collect())
                .unwrap_or_default();
            names.sort();
            names
        };
        assert_eq!(keys(&known.options), keys(&unknown.options));
    }

    #[tokio::test]
    async fn registration_state_is_single_use() {
        let subject = test_subject();
        let service = test_service(Some(&subject)).await;

        let start = service.start_registration(&subject).await.unwrap();
        assert!(start.options.get("publicKey").is_some());

        let mut states = service.reg_states.lock().await;
        assert!(states.remove(&start.ceremony_id).is_some());
        assert!(states.remove(&start.ceremony_id).is_none());
    }

    #[tokio::test]
    async fn registration_finish_rejects_other_subject() {
        let subject = test_subject();
        let service = test_service(Some(&subject)).await;

        let start = service.start_registration(&subject).await.unwrap();
        let response: RegisterPublicKeyCredential = serde_json::from_value(serde_json::json!({
            "id": "dummy",
            "rawId": "AA",
            "type": "public-key",
            "response": {
                "attestationObject": "AA",
                "clientDataJSON": "AA"
            }
        }))
        .unwrap();

        let err = service
            .finish_registration(start.ceremony_id, Uuid::new_v4(), "laptop", &response)
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::SubjectMismatch));

        // State was consumed by the failed attempt.
        let err = service
            .finish_registration(start.ceremony_id, subject.id, "laptop", &response)
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::NotFound));
    }

    #[tokio::test]
    async fn expired_ceremony_is_rejected() {
        let subject = test_subject();
        let directory = Arc::new(MemoryDirectory::new());
        directory.add_member(subject.clone(), None, vec![]).await;
        let config = CeremonyConfig::new("example.com", "Muster", "https://example.com")
            .unwrap()
            .with_challenge_ttl(Duration::from_millis(20));
        let service =
            PasskeyService::new(config, Arc::new(MemoryPasskeyRepo::new()), directory).unwrap();

        let start = service.start_registration(&subject).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let response: RegisterPublicKeyCredential = serde_json::from_value(serde_json::json!({
            "id": "dummy",
            "rawId": "AA",
            "type": "public-key",
            "response": {
                "attestationObject": "AA",
                "clientDataJSON": "AA"
            }
        }))
        .unwrap();
        let err = service
            .finish_registration(start.ceremony_id, subject.id, "laptop", &response)
            .await
            .unwrap_err();
        // Pruned on lookup, so the stale state is simply gone.
        assert!(matches!(
            err,
            CeremonyError::NotFound | CeremonyError::Expired
        ));
    }
}
