//! In-memory passkey store for tests and local development.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::repo::{PasskeyRepo, StoredPasskey};

#[derive(Default)]
pub struct MemoryPasskeyRepo {
    passkeys: Mutex<HashMap<Uuid, StoredPasskey>>,
}

impl MemoryPasskeyRepo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PasskeyRepo for MemoryPasskeyRepo {
    async fn insert(&self, passkey: &StoredPasskey) -> Result<()> {
        let mut passkeys = self.passkeys.lock().await;
        passkeys.insert(passkey.id, passkey.clone());
        Ok(())
    }

    async fn list_for_subject(&self, subject_id: Uuid) -> Result<Vec<StoredPasskey>> {
        let passkeys = self.passkeys.lock().await;
        let mut found: Vec<StoredPasskey> = passkeys
            .values()
            .filter(|entry| entry.subject_id == subject_id)
            .cloned()
            .collect();
        found.sort_by_key(|entry| entry.created_at);
        Ok(found)
    }

    async fn find_by_credential_id(&self, credential_id: &[u8]) -> Result<Option<StoredPasskey>> {
        let passkeys = self.passkeys.lock().await;
        Ok(passkeys
            .values()
            .find(|entry| entry.credential_id == credential_id)
            .cloned())
    }

    async fn record_authentication(
        &self,
        id: Uuid,
        sign_count: i64,
        credential_json: &[u8],
    ) -> Result<()> {
        let mut passkeys = self.passkeys.lock().await;
        if let Some(entry) = passkeys.get_mut(&id) {
            entry.sign_count = sign_count;
            entry.credential_json = credential_json.to_vec();
            entry.last_used_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn delete(&self, subject_id: Uuid, passkey_id: Uuid) -> Result<bool> {
        let mut passkeys = self.passkeys.lock().await;
        match passkeys.get(&passkey_id) {
            Some(entry) if entry.subject_id == subject_id => {
                passkeys.remove(&passkey_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
