//! Storage contract for TOTP secrets and backup codes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

/// A stored (unused) backup code hash.
#[derive(Clone, Debug)]
pub struct StoredBackupCode {
    pub id: Uuid,
    pub code_hash: String,
}

#[async_trait]
pub trait TotpRepo: Send + Sync {
    /// Persist the encrypted secret. Called only after the subject proved
    /// possession during enrollment.
    async fn store_secret(&self, subject_id: Uuid, sealed_secret: &[u8]) -> Result<()>;

    async fn load_secret(&self, subject_id: Uuid) -> Result<Option<Vec<u8>>>;

    async fn delete_secret(&self, subject_id: Uuid) -> Result<()>;

    /// Replace the subject's backup codes with a fresh set. Atomic: any
    /// prior set is invalidated in the same operation.
    async fn replace_backup_codes(&self, subject_id: Uuid, code_hashes: &[String]) -> Result<()>;

    /// All unused codes for the subject.
    async fn unused_backup_codes(&self, subject_id: Uuid) -> Result<Vec<StoredBackupCode>>;

    /// Mark one code used. Returns false when it was already consumed by a
    /// concurrent request (the caller must then reject).
    async fn consume_backup_code(&self, code_id: Uuid) -> Result<bool>;

    /// Revoke all remaining codes (2FA disable).
    async fn revoke_backup_codes(&self, subject_id: Uuid) -> Result<()>;
}

#[derive(Clone)]
pub struct PgTotpRepo {
    pool: PgPool,
}

impl PgTotpRepo {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TotpRepo for PgTotpRepo {
    async fn store_secret(&self, subject_id: Uuid, sealed_secret: &[u8]) -> Result<()> {
        let query = r"
            INSERT INTO user_totp (user_id, secret_ciphertext, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id) DO UPDATE
            SET secret_ciphertext = $2,
                created_at = NOW()
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(subject_id)
            .bind(sealed_secret)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to store totp secret")?;
        Ok(())
    }

    async fn load_secret(&self, subject_id: Uuid) -> Result<Option<Vec<u8>>> {
        let query = "SELECT secret_ciphertext FROM user_totp WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(subject_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to load totp secret")?;
        Ok(row.map(|row| row.get("secret_ciphertext")))
    }

    async fn delete_secret(&self, subject_id: Uuid) -> Result<()> {
        let query = "DELETE FROM user_totp WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(subject_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete totp secret")?;
        Ok(())
    }

    async fn replace_backup_codes(&self, subject_id: Uuid, code_hashes: &[String]) -> Result<()> {
        // One transaction: the old set disappears with the new set's arrival.
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin backup code transaction")?;

        let query = "DELETE FROM user_backup_codes WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(subject_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to drop prior backup codes")?;

        let query = r"
            INSERT INTO user_backup_codes (id, user_id, code_hash, issued_at)
            VALUES ($1, $2, $3, NOW())
        ";
        for hash in code_hashes {
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "INSERT",
                db.statement = query
            );
            sqlx::query(query)
                .bind(Uuid::new_v4())
                .bind(subject_id)
                .bind(hash)
                .execute(&mut *tx)
                .instrument(span)
                .await
                .context("failed to insert backup code")?;
        }

        tx.commit().await.context("commit backup code transaction")?;
        Ok(())
    }

    async fn unused_backup_codes(&self, subject_id: Uuid) -> Result<Vec<StoredBackupCode>> {
        let query = r"
            SELECT id, code_hash
            FROM user_backup_codes
            WHERE user_id = $1
              AND used_at IS NULL
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(subject_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list backup codes")?;
        Ok(rows
            .into_iter()
            .map(|row| StoredBackupCode {
                id: row.get("id"),
                code_hash: row.get("code_hash"),
            })
            .collect())
    }

    async fn consume_backup_code(&self, code_id: Uuid) -> Result<bool> {
        // Conditional update: a concurrent consumer loses the race cleanly.
        let query = r"
            UPDATE user_backup_codes
            SET used_at = NOW()
            WHERE id = $1
              AND used_at IS NULL
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(code_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to consume backup code")?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_backup_codes(&self, subject_id: Uuid) -> Result<()> {
        let query = r"
            UPDATE user_backup_codes
            SET used_at = NOW()
            WHERE user_id = $1
              AND used_at IS NULL
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(subject_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke backup codes")?;
        Ok(())
    }
}
