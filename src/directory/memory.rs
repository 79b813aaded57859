//! In-memory user directory for tests and local development.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Subject, UserDirectory};

#[derive(Clone, Debug)]
struct MemberEntry {
    subject: Subject,
    password_hash: Option<String>,
    permissions: Vec<String>,
}

#[derive(Default)]
pub struct MemoryDirectory {
    members: Mutex<HashMap<Uuid, MemberEntry>>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_member(
        &self,
        subject: Subject,
        password_hash: Option<String>,
        permissions: Vec<String>,
    ) {
        let mut members = self.members.lock().await;
        members.insert(
            subject.id,
            MemberEntry {
                subject,
                password_hash,
                permissions,
            },
        );
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn subject_by_username(&self, username: &str) -> Result<Option<Subject>> {
        let members = self.members.lock().await;
        Ok(members
            .values()
            .find(|entry| entry.subject.username == username)
            .map(|entry| entry.subject.clone()))
    }

    async fn subject_by_id(&self, id: Uuid) -> Result<Option<Subject>> {
        let members = self.members.lock().await;
        Ok(members.get(&id).map(|entry| entry.subject.clone()))
    }

    async fn password_hash(&self, id: Uuid) -> Result<Option<String>> {
        let members = self.members.lock().await;
        Ok(members.get(&id).and_then(|entry| entry.password_hash.clone()))
    }

    async fn update_password_hash(&self, id: Uuid, hash: &str) -> Result<()> {
        let mut members = self.members.lock().await;
        if let Some(entry) = members.get_mut(&id) {
            entry.password_hash = Some(hash.to_string());
        }
        Ok(())
    }

    async fn permissions(&self, id: Uuid) -> Result<Vec<String>> {
        let members = self.members.lock().await;
        Ok(members
            .get(&id)
            .map(|entry| entry.permissions.clone())
            .unwrap_or_default())
    }

    async fn set_totp_enabled(&self, id: Uuid, enabled: bool) -> Result<()> {
        let mut members = self.members.lock().await;
        if let Some(entry) = members.get_mut(&id) {
            entry.subject.totp_enabled = enabled;
        }
        Ok(())
    }
}
