//! TOTP second-factor service.
//!
//! Flow Overview:
//! 1) `begin_enrollment` hands the client a fresh secret and provisioning
//!    URI without persisting anything.
//! 2) `finish_enrollment` persists the secret (encrypted) only after the
//!    subject proves possession with one valid code, and mints the backup
//!    code set.
//! 3) `verify` / `verify_backup_code` power the second leg of login.
//! 4) `disable` demands a currently valid code so a hijacked session cannot
//!    silently downgrade the account.

use anyhow::{Context, Result, anyhow};
use secrecy::{ExposeSecret, SecretSlice};
use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::info;
use uuid::Uuid;

use crate::directory::{Subject, UserDirectory};
use crate::totp::backup::{BackupCodeBatch, normalize_backup_code, verify_backup_code};
use crate::totp::{crypto, repo::TotpRepo};

const CODE_DIGITS: usize = 6;
// One time step either side absorbs client clock skew.
const SKEW_STEPS: u8 = 1;
const STEP_SECONDS: u64 = 30;

/// What `begin_enrollment` returns: nothing is persisted yet.
#[derive(Clone, Debug)]
pub struct EnrollmentStart {
    pub secret_base32: String,
    pub provisioning_uri: String,
}

/// Outcome of `finish_enrollment`.
#[derive(Debug)]
pub enum EnrollmentOutcome {
    /// 2FA is now enabled; the plaintext backup codes are returned exactly
    /// once.
    Enabled { backup_codes: Vec<String> },
    /// The proof code did not match; nothing was persisted.
    Rejected,
}

pub struct TotpService {
    repo: Arc<dyn TotpRepo>,
    directory: Arc<dyn UserDirectory>,
    encryption_key: SecretSlice<u8>,
    issuer: String,
}

impl TotpService {
    /// # Errors
    /// Returns an error if the encryption key has the wrong length.
    pub fn new(
        repo: Arc<dyn TotpRepo>,
        directory: Arc<dyn UserDirectory>,
        encryption_key: SecretSlice<u8>,
        issuer: String,
    ) -> Result<Self> {
        if encryption_key.expose_secret().len() != crypto::KEY_LEN {
            return Err(anyhow!(
                "totp encryption key must be {} bytes",
                crypto::KEY_LEN
            ));
        }
        Ok(Self {
            repo,
            directory,
            encryption_key,
            issuer,
        })
    }

    /// Generate a fresh secret and provisioning URI. Persists nothing; the
    /// secret only becomes real if the subject finishes enrollment.
    ///
    /// # Errors
    /// Returns an error if secret generation fails.
    pub fn begin_enrollment(&self, subject: &Subject) -> Result<EnrollmentStart> {
        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|e| anyhow!("totp secret generation failed: {e:?}"))?;
        let totp = build_totp(secret_bytes, &self.issuer, &subject.username)?;

        Ok(EnrollmentStart {
            secret_base32: totp.get_secret_base32(),
            provisioning_uri: totp.get_url(),
        })
    }

    /// Verify the proof code and, on success, enable 2FA atomically:
    /// encrypted secret stored, flag set, ten fresh backup codes minted
    /// (replacing any prior set).
    ///
    /// # Errors
    /// Returns an error on storage or crypto failure. A wrong code is not
    /// an error; it is `EnrollmentOutcome::Rejected`.
    pub async fn finish_enrollment(
        &self,
        subject: &Subject,
        secret_base32: &str,
        code: &str,
    ) -> Result<EnrollmentOutcome> {
        if !is_valid_code(code) {
            return Ok(EnrollmentOutcome::Rejected);
        }

        let secret_bytes = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|e| anyhow!("invalid enrollment secret: {e:?}"))?;
        let totp = build_totp(secret_bytes.clone(), &self.issuer, &subject.username)?;

        if !totp.check_current(code).unwrap_or(false) {
            return Ok(EnrollmentOutcome::Rejected);
        }

        let sealed = crypto::encrypt_secret(
            self.encryption_key.expose_secret(),
            &secret_bytes,
            subject.id,
        )?;
        self.repo.store_secret(subject.id, &sealed).await?;

        let batch = BackupCodeBatch::generate()?;
        self.repo
            .replace_backup_codes(subject.id, &batch.code_hashes)
            .await?;
        self.directory.set_totp_enabled(subject.id, true).await?;

        info!(subject = %subject.id, "totp enrollment completed");
        Ok(EnrollmentOutcome::Enabled {
            backup_codes: batch.codes,
        })
    }

    /// Check a 6-digit code against the stored secret with skew tolerance.
    ///
    /// # Errors
    /// Returns an error on storage or decryption failure.
    pub async fn verify(&self, subject_id: Uuid, code: &str) -> Result<bool> {
        // Malformed input never touches the secret.
        if !is_valid_code(code) {
            return Ok(false);
        }
        let Some(sealed) = self.repo.load_secret(subject_id).await? else {
            return Ok(false);
        };
        let secret_bytes =
            crypto::decrypt_secret(self.encryption_key.expose_secret(), &sealed, subject_id)?;
        let subject = self
            .directory
            .subject_by_id(subject_id)
            .await?
            .context("subject disappeared during totp verify")?;
        let totp = build_totp(secret_bytes, &self.issuer, &subject.username)?;
        Ok(totp.check_current(code).unwrap_or(false))
    }

    /// Check a backup code and consume it on match.
    ///
    /// Every unused hash is compared; there is no early exit on the first
    /// match, which keeps timing roughly independent of match position.
    ///
    /// # Errors
    /// Returns an error on storage failure.
    pub async fn verify_backup_code(&self, subject_id: Uuid, code: &str) -> Result<bool> {
        let Ok(normalized) = normalize_backup_code(code) else {
            return Ok(false);
        };

        let stored = self.repo.unused_backup_codes(subject_id).await?;
        let mut matched: Option<Uuid> = None;
        for entry in &stored {
            let hit = verify_backup_code(&normalized, &entry.code_hash).unwrap_or(false);
            if hit && matched.is_none() {
                matched = Some(entry.id);
            }
        }

        match matched {
            Some(code_id) => self.repo.consume_backup_code(code_id).await,
            None => Ok(false),
        }
    }

    /// Disable 2FA. Requires a currently valid TOTP code.
    ///
    /// # Errors
    /// Returns an error on storage failure. A wrong code returns `Ok(false)`
    /// and changes nothing.
    pub async fn disable(&self, subject_id: Uuid, code: &str) -> Result<bool> {
        if !self.verify(subject_id, code).await? {
            return Ok(false);
        }
        self.repo.delete_secret(subject_id).await?;
        self.repo.revoke_backup_codes(subject_id).await?;
        self.directory.set_totp_enabled(subject_id, false).await?;
        info!(subject = %subject_id, "totp disabled");
        Ok(true)
    }
}

fn is_valid_code(code: &str) -> bool {
    code.len() == CODE_DIGITS && code.bytes().all(|b| b.is_ascii_digit())
}

pub(crate) fn build_totp(secret_bytes: Vec<u8>, issuer: &str, account: &str) -> Result<TOTP> {
    TOTP::new(
        Algorithm::SHA1,
        CODE_DIGITS,
        SKEW_STEPS,
        STEP_SECONDS,
        secret_bytes,
        Some(issuer.to_string()),
        account.to_string(),
    )
    .map_err(|e| anyhow!("totp construction failed: {e}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::totp::memory::MemoryTotpRepo;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn test_subject() -> Subject {
        Subject {
            id: Uuid::new_v4(),
            username: "quartermaster".to_string(),
            role: "member".to_string(),
            totp_enabled: false,
        }
    }

    async fn service_with_subject(subject: &Subject) -> TotpService {
        let directory = Arc::new(MemoryDirectory::new());
        directory.add_member(subject.clone(), None, vec![]).await;
        TotpService::new(
            Arc::new(MemoryTotpRepo::new()),
            directory,
            SecretSlice::from(vec![9u8; crypto::KEY_LEN]),
            "Muster".to_string(),
        )
        .unwrap()
    }

    fn now_unix() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    #[test]
    fn code_shape_is_enforced() {
        assert!(is_valid_code("123456"));
        assert!(!is_valid_code("12345"));
        assert!(!is_valid_code("1234567"));
        assert!(!is_valid_code("12345a"));
        assert!(!is_valid_code(""));
    }

    #[test]
    fn skew_accepts_adjacent_step_only() {
        let secret = Secret::generate_secret().to_bytes().unwrap();
        let totp = build_totp(secret, "Muster", "alice").unwrap();
        let now = now_unix();

        let current = totp.generate(now);
        let previous = totp.generate(now - STEP_SECONDS);
        let distant = totp.generate(now - 4 * STEP_SECONDS);

        assert!(totp.check(&current, now));
        assert!(totp.check(&previous, now));
        if distant != current && distant != previous {
            assert!(!totp.check(&distant, now));
        }
    }

    #[tokio::test]
    async fn enrollment_round_trip() {
        let subject = test_subject();
        let service = service_with_subject(&subject).await;

        let start = service.begin_enrollment(&subject).unwrap();
        assert!(start.provisioning_uri.starts_with("otpauth://totp/"));

        let secret_bytes = Secret::Encoded(start.secret_base32.clone())
            .to_bytes()
            .unwrap();
        let totp = build_totp(secret_bytes, "Muster", &subject.username).unwrap();
        let code = totp.generate(now_unix());

        let outcome = service
            .finish_enrollment(&subject, &start.secret_base32, &code)
            .await
            .unwrap();
        let EnrollmentOutcome::Enabled { backup_codes } = outcome else {
            panic!("enrollment should succeed with a fresh code");
        };
        assert_eq!(backup_codes.len(), 10);

        // A freshly generated code from the same secret verifies.
        let fresh = build_totp(
            Secret::Encoded(start.secret_base32).to_bytes().unwrap(),
            "Muster",
            &subject.username,
        )
        .unwrap()
        .generate(now_unix());
        assert!(service.verify(subject.id, &fresh).await.unwrap());
    }

    #[tokio::test]
    async fn wrong_enrollment_code_persists_nothing() {
        let subject = test_subject();
        let service = service_with_subject(&subject).await;

        let start = service.begin_enrollment(&subject).unwrap();
        let outcome = service
            .finish_enrollment(&subject, &start.secret_base32, "000000")
            .await
            .unwrap();
        assert!(matches!(outcome, EnrollmentOutcome::Rejected));

        // No secret stored, so any verify fails.
        assert!(!service.verify(subject.id, "123456").await.unwrap());
        let updated = service
            .directory
            .subject_by_id(subject.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!updated.totp_enabled);
    }

    #[tokio::test]
    async fn backup_code_is_single_use() {
        let subject = test_subject();
        let service = service_with_subject(&subject).await;

        let start = service.begin_enrollment(&subject).unwrap();
        let secret_bytes = Secret::Encoded(start.secret_base32.clone())
            .to_bytes()
            .unwrap();
        let code = build_totp(secret_bytes, "Muster", &subject.username)
            .unwrap()
            .generate(now_unix());
        let outcome = service
            .finish_enrollment(&subject, &start.secret_base32, &code)
            .await
            .unwrap();
        let EnrollmentOutcome::Enabled { backup_codes } = outcome else {
            panic!("enrollment should succeed");
        };

        let first = backup_codes.first().unwrap();
        assert!(service.verify_backup_code(subject.id, first).await.unwrap());
        assert!(!service.verify_backup_code(subject.id, first).await.unwrap());
        // Other codes in the batch remain usable.
        let second = backup_codes.get(1).unwrap();
        assert!(service.verify_backup_code(subject.id, second).await.unwrap());
    }

    #[tokio::test]
    async fn disable_requires_valid_code() {
        let subject = test_subject();
        let service = service_with_subject(&subject).await;

        let start = service.begin_enrollment(&subject).unwrap();
        let secret_bytes = Secret::Encoded(start.secret_base32.clone())
            .to_bytes()
            .unwrap();
        let totp = build_totp(secret_bytes, "Muster", &subject.username).unwrap();
        let code = totp.generate(now_unix());
        service
            .finish_enrollment(&subject, &start.secret_base32, &code)
            .await
            .unwrap();

        assert!(!service.disable(subject.id, "000000").await.unwrap());
        let fresh = totp.generate(now_unix());
        assert!(service.disable(subject.id, &fresh).await.unwrap());
        // Once disabled, codes no longer verify.
        let again = totp.generate(now_unix());
        assert!(!service.verify(subject.id, &again).await.unwrap());
    }
}
