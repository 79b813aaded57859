//! User directory: the narrow read interface over member accounts.
//!
//! The portal's member CRUD lives elsewhere; this core only needs lookups by
//! name/id, the password hash, and the permission set. Writes are limited to
//! password-hash rotation and the 2FA flag flips performed by enrollment.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use async_trait::async_trait;
use uuid::Uuid;

pub use memory::MemoryDirectory;
pub use postgres::PgDirectory;

/// A member account as seen by the authentication core.
#[derive(Clone, Debug)]
pub struct Subject {
    pub id: Uuid,
    pub username: String,
    pub role: String,
    pub totp_enabled: bool,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Lookup by username. `Ok(None)` for unknown names; never an error, so
    /// callers cannot leak existence through response shape.
    async fn subject_by_username(&self, username: &str) -> Result<Option<Subject>>;

    async fn subject_by_id(&self, id: Uuid) -> Result<Option<Subject>>;

    /// PHC-format Argon2id hash for the subject, if one is set.
    async fn password_hash(&self, id: Uuid) -> Result<Option<String>>;

    async fn update_password_hash(&self, id: Uuid, hash: &str) -> Result<()>;

    async fn permissions(&self, id: Uuid) -> Result<Vec<String>>;

    /// Flip the 2FA-enabled flag (set on enrollment finish, cleared on
    /// disable).
    async fn set_totp_enabled(&self, id: Uuid, enabled: bool) -> Result<()>;
}

/// Verify a candidate password against a stored PHC hash.
///
/// A malformed stored hash verifies as `false` rather than erroring: the
/// caller treats it as a failed credential, not a server fault.
#[must_use]
pub fn verify_password(candidate: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(candidate.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::{PasswordHasher, password_hash::SaltString};
    use rand::rngs::OsRng;

    fn hash(password: &str) -> String {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .unwrap_or_default()
    }

    #[test]
    fn verify_password_round_trip() {
        let stored = hash("correct horse");
        assert!(verify_password("correct horse", &stored));
        assert!(!verify_password("wrong horse", &stored));
    }

    #[test]
    fn malformed_hash_fails_closed() {
        assert!(!verify_password("anything", "not-a-phc-hash"));
        assert!(!verify_password("anything", ""));
    }
}
