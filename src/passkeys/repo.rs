//! Persistence for registered passkey credentials.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{Instrument, info_span};
use uuid::Uuid;

/// A registered credential as stored. `credential_json` is the serialized
/// verifier state; `sign_count` is tracked separately so the replay check
/// does not depend on verifier internals.
#[derive(Clone, Debug)]
pub struct StoredPasskey {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub device_name: String,
    pub credential_id: Vec<u8>,
    pub credential_json: Vec<u8>,
    pub sign_count: i64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait PasskeyRepo: Send + Sync {
    async fn insert(&self, passkey: &StoredPasskey) -> Result<()>;

    async fn list_for_subject(&self, subject_id: Uuid) -> Result<Vec<StoredPasskey>>;

    /// Lookup by the authenticator-assigned credential id.
    async fn find_by_credential_id(&self, credential_id: &[u8]) -> Result<Option<StoredPasskey>>;

    /// Record a successful authentication: new counter, refreshed verifier
    /// state, last-used stamp.
    async fn record_authentication(
        &self,
        id: Uuid,
        sign_count: i64,
        credential_json: &[u8],
    ) -> Result<()>;

    /// Returns false when no credential matched.
    async fn delete(&self, subject_id: Uuid, passkey_id: Uuid) -> Result<bool>;
}

pub struct PgPasskeyRepo {
    pool: PgPool,
}

impl PgPasskeyRepo {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PasskeyRepo for PgPasskeyRepo {
    async fn insert(&self, passkey: &StoredPasskey) -> Result<()> {
        let query = "INSERT INTO user_passkeys \
             (id, user_id, device_name, credential_id, credential_json, sign_count, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)";

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );

        sqlx::query(query)
            .bind(passkey.id)
            .bind(passkey.subject_id)
            .bind(&passkey.device_name)
            .bind(&passkey.credential_id)
            .bind(&passkey.credential_json)
            .bind(passkey.sign_count)
            .bind(passkey.created_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("Failed to insert passkey credential")?;

        Ok(())
    }

    async fn list_for_subject(&self, subject_id: Uuid) -> Result<Vec<StoredPasskey>> {
        let query = "SELECT id, user_id, device_name, credential_id, credential_json, \
             sign_count, created_at, last_used_at \
             FROM user_passkeys WHERE user_id = $1 ORDER BY created_at";

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );

        let rows: Vec<(
            Uuid,
            Uuid,
            String,
            Vec<u8>,
            Vec<u8>,
            i64,
            DateTime<Utc>,
            Option<DateTime<Utc>>,
        )> = sqlx::query_as(query)
            .bind(subject_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("Failed to list passkey credentials")?;

        Ok(rows.into_iter().map(row_to_passkey).collect())
    }

    async fn find_by_credential_id(&self, credential_id: &[u8]) -> Result<Option<StoredPasskey>> {
        let query = "SELECT id, user_id, device_name, credential_id, credential_json, \
             sign_count, created_at, last_used_at \
             FROM user_passkeys WHERE credential_id = $1";

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );

        let row: Option<(
            Uuid,
            Uuid,
            String,
            Vec<u8>,
            Vec<u8>,
            i64,
            DateTime<Utc>,
            Option<DateTime<Utc>>,
        )> = sqlx::query_as(query)
            .bind(credential_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("Failed to look up passkey credential")?;

        Ok(row.map(row_to_passkey))
    }

    async fn record_authentication(
        &self,
        id: Uuid,
        sign_count: i64,
        credential_json: &[u8],
    ) -> Result<()> {
        let query = "UPDATE user_passkeys \
             SET sign_count = $2, credential_json = $3, last_used_at = NOW() \
             WHERE id = $1";

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );

        sqlx::query(query)
            .bind(id)
            .bind(sign_count)
            .bind(credential_json)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("Failed to update passkey after authentication")?;

        Ok(())
    }

    async fn delete(&self, subject_id: Uuid, passkey_id: Uuid) -> Result<bool> {
        let query = "DELETE FROM user_passkeys WHERE id = $1 AND user_id = $2";

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );

        let result = sqlx::query(query)
            .bind(passkey_id)
            .bind(subject_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("Failed to delete passkey credential")?;

        Ok(result.rows_affected() > 0)
    }
}

#[allow(clippy::type_complexity)]
fn row_to_passkey(
    row: (
        Uuid,
        Uuid,
        String,
        Vec<u8>,
        Vec<u8>,
        i64,
        DateTime<Utc>,
        Option<DateTime<Utc>>,
    ),
) -> StoredPasskey {
    StoredPasskey {
        id: row.0,
        subject_id: row.1,
        device_name: row.2,
        credential_id: row.3,
        credential_json: row.4,
        sign_count: row.5,
        created_at: row.6,
        last_used_at: row.7,
    }
}
