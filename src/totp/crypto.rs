//! At-rest encryption for TOTP secrets.
//!
//! Secrets are sealed with ChaCha20-Poly1305 under a dedicated key that is
//! configured independently of the token-signing key. The AAD binds the
//! ciphertext to its owning subject so a row copied between users fails to
//! decrypt.

use anyhow::Result;
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use rand::{RngCore, rngs::OsRng};
use uuid::Uuid;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Encrypt a raw TOTP secret. Returns `nonce (12 bytes) || ciphertext`.
///
/// # Errors
/// Returns an error if encryption fails or the key length is wrong.
pub fn encrypt_secret(key: &[u8], secret: &[u8], subject_id: Uuid) -> Result<Vec<u8>> {
    if key.len() != KEY_LEN {
        return Err(anyhow::anyhow!(
            "totp encryption key must be {KEY_LEN} bytes, got {}",
            key.len()
        ));
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let aad = construct_aad(subject_id);
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: secret,
                aad: &aad,
            },
        )
        .map_err(|e| anyhow::anyhow!("totp secret encryption failed: {e}"))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt a sealed TOTP secret produced by [`encrypt_secret`].
///
/// # Errors
/// Returns an error on tampered data, a wrong key, or a wrong subject.
pub fn decrypt_secret(key: &[u8], sealed: &[u8], subject_id: Uuid) -> Result<Vec<u8>> {
    if key.len() != KEY_LEN {
        return Err(anyhow::anyhow!(
            "totp encryption key must be {KEY_LEN} bytes, got {}",
            key.len()
        ));
    }
    if sealed.len() < NONCE_LEN {
        return Err(anyhow::anyhow!("sealed totp secret too short"));
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let aad = construct_aad(subject_id);

    cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad: &aad,
            },
        )
        .map_err(|e| anyhow::anyhow!("totp secret decryption failed: {e}"))
}

fn construct_aad(subject_id: Uuid) -> Vec<u8> {
    format!("totp-secret:v1|{subject_id}").into_bytes()
}
