//! Revocable registry of issued session tokens.
//!
//! Tokens are stateless; this registry is the revocation side channel. A
//! token is honored only while its `jti` is present, unexpired, and not
//! revoked here.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::MemorySessionStore;
pub use postgres::PgSessionStore;

/// One issued token, keyed by its `jti` claim.
#[derive(Clone, Debug)]
pub struct SessionRecord {
    pub jti: Uuid,
    pub subject_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub source_addr: Option<IpAddr>,
    pub device_name: Option<String>,
    pub revoked: bool,
}

impl SessionRecord {
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, record: &SessionRecord) -> Result<()>;

    async fn find(&self, jti: Uuid) -> Result<Option<SessionRecord>>;

    /// Active means present, unexpired, and not revoked.
    async fn is_active(&self, jti: Uuid) -> Result<bool>;

    /// Returns false when the session does not exist.
    async fn revoke(&self, jti: Uuid) -> Result<bool>;

    /// Revoke every active session for a subject, optionally sparing one
    /// (the caller's own). Returns the number revoked.
    async fn revoke_all(&self, subject_id: Uuid, except: Option<Uuid>) -> Result<u64>;

    async fn list_active(&self, subject_id: Uuid) -> Result<Vec<SessionRecord>>;

    /// Drop expired rows. Returns the number removed.
    async fn prune_expired(&self) -> Result<u64>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn record_activity_window() {
        let now = Utc::now();
        let record = SessionRecord {
            jti: Uuid::new_v4(),
            subject_id: Uuid::new_v4(),
            issued_at: now - Duration::hours(1),
            expires_at: now + Duration::hours(7),
            source_addr: None,
            device_name: None,
            revoked: false,
        };
        assert!(record.is_active(now));
        assert!(!record.is_active(now + Duration::hours(8)));

        let revoked = SessionRecord {
            revoked: true,
            ..record
        };
        assert!(!revoked.is_active(now));
    }
}
