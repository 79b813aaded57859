//! In-memory session registry for tests and local development.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{SessionRecord, SessionStore};

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Uuid, SessionRecord>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, record: &SessionRecord) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(record.jti, record.clone());
        Ok(())
    }

    async fn find(&self, jti: Uuid) -> Result<Option<SessionRecord>> {
        let sessions = self.sessions.lock().await;
        Ok(sessions.get(&jti).cloned())
    }

    async fn is_active(&self, jti: Uuid) -> Result<bool> {
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .get(&jti)
            .is_some_and(|record| record.is_active(Utc::now())))
    }

    async fn revoke(&self, jti: Uuid) -> Result<bool> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(&jti) {
            Some(record) => {
                record.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_all(&self, subject_id: Uuid, except: Option<Uuid>) -> Result<u64> {
        let mut sessions = self.sessions.lock().await;
        let now = Utc::now();
        let mut revoked = 0;
        for record in sessions.values_mut() {
            if record.subject_id == subject_id
                && record.is_active(now)
                && except != Some(record.jti)
            {
                record.revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn list_active(&self, subject_id: Uuid) -> Result<Vec<SessionRecord>> {
        let sessions = self.sessions.lock().await;
        let now = Utc::now();
        let mut active: Vec<SessionRecord> = sessions
            .values()
            .filter(|record| record.subject_id == subject_id && record.is_active(now))
            .cloned()
            .collect();
        active.sort_by_key(|record| record.issued_at);
        Ok(active)
    }

    async fn prune_expired(&self) -> Result<u64> {
        let mut sessions = self.sessions.lock().await;
        let now = Utc::now();
        let before = sessions.len();
        sessions.retain(|_, record| record.expires_at > now);
        Ok((before - sessions.len()) as u64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn record(subject_id: Uuid) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            jti: Uuid::new_v4(),
            subject_id,
            issued_at: now,
            expires_at: now + Duration::hours(8),
            source_addr: None,
            device_name: Some("laptop".to_string()),
            revoked: false,
        }
    }

    #[tokio::test]
    async fn revoke_all_spares_the_exception() {
        let store = Arc::new(MemorySessionStore::new());
        let subject = Uuid::new_v4();
        let keep = record(subject);
        let drop_a = record(subject);
        let drop_b = record(subject);
        let other = record(Uuid::new_v4());
        for r in [&keep, &drop_a, &drop_b, &other] {
            store.insert(r).await.unwrap();
        }

        let revoked = store.revoke_all(subject, Some(keep.jti)).await.unwrap();
        assert_eq!(revoked, 2);
        assert!(store.is_active(keep.jti).await.unwrap());
        assert!(!store.is_active(drop_a.jti).await.unwrap());
        assert!(!store.is_active(drop_b.jti).await.unwrap());
        assert!(store.is_active(other.jti).await.unwrap());
    }

    #[tokio::test]
    async fn revoked_and_expired_sessions_are_inactive() {
        let store = MemorySessionStore::new();
        let subject = Uuid::new_v4();

        let mut expired = record(subject);
        expired.expires_at = Utc::now() - Duration::minutes(1);
        store.insert(&expired).await.unwrap();
        assert!(!store.is_active(expired.jti).await.unwrap());

        let live = record(subject);
        store.insert(&live).await.unwrap();
        assert!(store.is_active(live.jti).await.unwrap());
        assert!(store.revoke(live.jti).await.unwrap());
        assert!(!store.is_active(live.jti).await.unwrap());

        assert!(!store.revoke(Uuid::new_v4()).await.unwrap());

        let active = store.list_active(subject).await.unwrap();
        assert!(active.is_empty());

        assert_eq!(store.prune_expired().await.unwrap(), 1);
    }
}
