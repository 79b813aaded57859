//! Postgres-backed user directory.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{Subject, UserDirectory};

#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn subject_from_row(row: &sqlx::postgres::PgRow) -> Subject {
        Subject {
            id: row.get("id"),
            username: row.get("username"),
            role: row.get("role"),
            totp_enabled: row.get("totp_enabled"),
        }
    }
}

#[async_trait]
impl UserDirectory for PgDirectory {
    async fn subject_by_username(&self, username: &str) -> Result<Option<Subject>> {
        let query = r"
            SELECT id, username, role, totp_enabled
            FROM users
            WHERE username = $1
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(username)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup subject by username")?;
        Ok(row.map(|row| Self::subject_from_row(&row)))
    }

    async fn subject_by_id(&self, id: Uuid) -> Result<Option<Subject>> {
        let query = r"
            SELECT id, username, role, totp_enabled
            FROM users
            WHERE id = $1
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup subject by id")?;
        Ok(row.map(|row| Self::subject_from_row(&row)))
    }

    async fn password_hash(&self, id: Uuid) -> Result<Option<String>> {
        let query = "SELECT password_hash FROM users WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to read password hash")?;
        Ok(row.and_then(|row| row.get::<Option<String>, _>("password_hash")))
    }

    async fn update_password_hash(&self, id: Uuid, hash: &str) -> Result<()> {
        let query = r"
            UPDATE users
            SET password_hash = $2,
                updated_at = NOW()
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update password hash")?;
        Ok(())
    }

    async fn permissions(&self, id: Uuid) -> Result<Vec<String>> {
        let query = r"
            SELECT permission
            FROM user_permissions
            WHERE user_id = $1
            ORDER BY permission
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list permissions")?;
        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("permission"))
            .collect())
    }

    async fn set_totp_enabled(&self, id: Uuid, enabled: bool) -> Result<()> {
        let query = r"
            UPDATE users
            SET totp_enabled = $2,
                updated_at = NOW()
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .bind(enabled)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update totp flag")?;
        Ok(())
    }
}
