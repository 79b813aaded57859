//! Backup (recovery) code generation and verification.
//!
//! A set of exactly ten codes is minted whenever 2FA is enabled, replacing
//! any prior set. Only Argon2id hashes are stored; the plaintext batch is
//! returned to the caller once and never again.

use anyhow::{Context, Result};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use rand::{RngCore, rngs::OsRng};

pub const BACKUP_CODE_COUNT: usize = 10;
const BACKUP_CODE_LEN: usize = 12;
const BACKUP_CODE_GROUP_SIZE: usize = 4;
// No 0/O/1/I to keep hand transcription unambiguous.
const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A freshly generated batch: plaintext codes plus their hashes.
#[derive(Debug)]
pub struct BackupCodeBatch {
    pub codes: Vec<String>,
    pub code_hashes: Vec<String>,
}

impl BackupCodeBatch {
    /// Generate a full batch of [`BACKUP_CODE_COUNT`] codes.
    ///
    /// # Errors
    /// Returns an error if hashing fails.
    pub fn generate() -> Result<Self> {
        let mut rng = OsRng;
        Self::generate_with_rng(&mut rng)
    }

    fn generate_with_rng<R: RngCore + ?Sized>(rng: &mut R) -> Result<Self> {
        let mut codes = Vec::with_capacity(BACKUP_CODE_COUNT);
        let mut code_hashes = Vec::with_capacity(BACKUP_CODE_COUNT);
        for _ in 0..BACKUP_CODE_COUNT {
            let code = generate_code(rng)?;
            let hash = hash_backup_code(&code)?;
            codes.push(code);
            code_hashes.push(hash);
        }
        Ok(Self { codes, code_hashes })
    }
}

/// Strip separators, uppercase, and validate shape.
///
/// # Errors
/// Returns an error for inputs that cannot be a backup code.
pub fn normalize_backup_code(input: &str) -> Result<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    if normalized.len() != BACKUP_CODE_LEN {
        return Err(anyhow::anyhow!("invalid backup code length"));
    }
    if !normalized
        .as_bytes()
        .iter()
        .all(|ch| BACKUP_CODE_ALPHABET.contains(ch))
    {
        return Err(anyhow::anyhow!("invalid backup code characters"));
    }
    Ok(normalized)
}

/// Group a normalized code for display (`ABCD-EFGH-JKLM`).
///
/// # Errors
/// Returns an error if the input is not a normalized code.
pub fn format_backup_code(normalized: &str) -> Result<String> {
    if normalized.len() != BACKUP_CODE_LEN {
        return Err(anyhow::anyhow!("invalid backup code length"));
    }
    let mut out = String::with_capacity(BACKUP_CODE_LEN + 2);
    for (idx, chunk) in normalized
        .as_bytes()
        .chunks(BACKUP_CODE_GROUP_SIZE)
        .enumerate()
    {
        if idx > 0 {
            out.push('-');
        }
        out.push_str(std::str::from_utf8(chunk).context("invalid backup code chunk")?);
    }
    Ok(out)
}

/// Verify a candidate code against one stored hash.
///
/// # Errors
/// Returns an error for malformed input or corrupted stored hashes.
pub fn verify_backup_code(code: &str, stored_hash: &str) -> Result<bool> {
    let normalized = normalize_backup_code(code)?;
    let parsed =
        PasswordHash::new(stored_hash).map_err(|_| anyhow::anyhow!("invalid backup code hash"))?;
    Ok(Argon2::default()
        .verify_password(normalized.as_bytes(), &parsed)
        .is_ok())
}

fn generate_code<R: RngCore + ?Sized>(rng: &mut R) -> Result<String> {
    let mut raw = [0u8; BACKUP_CODE_LEN];
    rng.fill_bytes(&mut raw);
    let mut normalized = String::with_capacity(BACKUP_CODE_LEN);
    for byte in raw {
        let idx = usize::from(byte) % BACKUP_CODE_ALPHABET.len();
        if let Some(&char_byte) = BACKUP_CODE_ALPHABET.get(idx) {
            normalized.push(char_byte as char);
        }
    }
    format_backup_code(&normalized)
}

fn hash_backup_code(code: &str) -> Result<String> {
    let normalized = normalize_backup_code(code)?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(normalized.as_bytes(), &salt)
        .map_err(|_| anyhow::anyhow!("failed to hash backup code"))?
        .to_string();
    Ok(hash)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn batch_has_exactly_ten_codes() {
        let batch = BackupCodeBatch::generate().unwrap();
        assert_eq!(batch.codes.len(), BACKUP_CODE_COUNT);
        assert_eq!(batch.code_hashes.len(), BACKUP_CODE_COUNT);
    }

    #[test]
    fn normalize_strips_separators_and_uppercases() {
        let normalized = normalize_backup_code("abcd-efgh-jklm").unwrap();
        assert_eq!(normalized, "ABCDEFGHJKLM");
    }

    #[test]
    fn format_groups_in_fours() {
        assert_eq!(format_backup_code("ABCDEFGHJKLM").unwrap(), "ABCD-EFGH-JKLM");
    }

    #[test]
    fn hash_and_verify_round_trip() {
        let batch = BackupCodeBatch::generate().unwrap();
        let code = batch.codes.first().unwrap();
        let hash = batch.code_hashes.first().unwrap();
        assert!(verify_backup_code(code, hash).unwrap());
        assert!(!verify_backup_code("ABCD-EFGH-9999", hash).unwrap());
    }

    #[test]
    fn ambiguous_characters_never_generated() {
        let batch = BackupCodeBatch::generate().unwrap();
        for code in &batch.codes {
            assert!(!code.contains('0'));
            assert!(!code.contains('O'));
            assert!(!code.contains('1'));
            assert!(!code.contains('I'));
        }
    }
}
