//! In-memory TOTP repository for tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::repo::{StoredBackupCode, TotpRepo};

#[derive(Clone, Debug)]
struct CodeEntry {
    code_hash: String,
    used: bool,
}

#[derive(Default)]
pub struct MemoryTotpRepo {
    secrets: Mutex<HashMap<Uuid, Vec<u8>>>,
    codes: Mutex<HashMap<Uuid, Vec<(Uuid, CodeEntry)>>>,
}

impl MemoryTotpRepo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TotpRepo for MemoryTotpRepo {
    async fn store_secret(&self, subject_id: Uuid, sealed_secret: &[u8]) -> Result<()> {
        let mut secrets = self.secrets.lock().await;
        secrets.insert(subject_id, sealed_secret.to_vec());
        Ok(())
    }

    async fn load_secret(&self, subject_id: Uuid) -> Result<Option<Vec<u8>>> {
        let secrets = self.secrets.lock().await;
        Ok(secrets.get(&subject_id).cloned())
    }

    async fn delete_secret(&self, subject_id: Uuid) -> Result<()> {
        let mut secrets = self.secrets.lock().await;
        secrets.remove(&subject_id);
        Ok(())
    }

    async fn replace_backup_codes(&self, subject_id: Uuid, code_hashes: &[String]) -> Result<()> {
        let mut codes = self.codes.lock().await;
        codes.insert(
            subject_id,
            code_hashes
                .iter()
                .map(|hash| {
                    (
                        Uuid::new_v4(),
                        CodeEntry {
                            code_hash: hash.clone(),
                            used: false,
                        },
                    )
                })
                .collect(),
        );
        Ok(())
    }

    async fn unused_backup_codes(&self, subject_id: Uuid) -> Result<Vec<StoredBackupCode>> {
        let codes = self.codes.lock().await;
        Ok(codes
            .get(&subject_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, entry)| !entry.used)
                    .map(|(id, entry)| StoredBackupCode {
                        id: *id,
                        code_hash: entry.code_hash.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn consume_backup_code(&self, code_id: Uuid) -> Result<bool> {
        let mut codes = self.codes.lock().await;
        for entries in codes.values_mut() {
            for (id, entry) in entries.iter_mut() {
                if *id == code_id {
                    if entry.used {
                        return Ok(false);
                    }
                    entry.used = true;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    async fn revoke_backup_codes(&self, subject_id: Uuid) -> Result<()> {
        let mut codes = self.codes.lock().await;
        if let Some(entries) = codes.get_mut(&subject_id) {
            for (_, entry) in entries.iter_mut() {
                entry.used = true;
            }
        }
        Ok(())
    }
}
