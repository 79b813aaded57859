//! Postgres-backed session registry.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::net::IpAddr;
use tracing::{Instrument, info_span};
use uuid::Uuid;

use super::{SessionRecord, SessionStore};

pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type SessionRow = (
    Uuid,
    Uuid,
    DateTime<Utc>,
    DateTime<Utc>,
    Option<IpAddr>,
    Option<String>,
    bool,
);

fn row_to_record(row: SessionRow) -> SessionRecord {
    SessionRecord {
        jti: row.0,
        subject_id: row.1,
        issued_at: row.2,
        expires_at: row.3,
        source_addr: row.4,
        device_name: row.5,
        revoked: row.6,
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, record: &SessionRecord) -> Result<()> {
        let query = "INSERT INTO sessions \
             (jti, user_id, issued_at, expires_at, source_addr, device_name, revoked) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)";

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );

        sqlx::query(query)
            .bind(record.jti)
            .bind(record.subject_id)
            .bind(record.issued_at)
            .bind(record.expires_at)
            .bind(record.source_addr)
            .bind(&record.device_name)
            .bind(record.revoked)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("Failed to insert session record")?;

        Ok(())
    }

    async fn find(&self, jti: Uuid) -> Result<Option<SessionRecord>> {
        let query = "SELECT jti, user_id, issued_at, expires_at, source_addr, device_name, revoked \
             FROM sessions WHERE jti = $1";

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );

        let row: Option<SessionRow> = sqlx::query_as(query)
            .bind(jti)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("Failed to look up session record")?;

        Ok(row.map(row_to_record))
    }

    async fn is_active(&self, jti: Uuid) -> Result<bool> {
        let query = "SELECT EXISTS (SELECT 1 FROM sessions \
             WHERE jti = $1 AND NOT revoked AND expires_at > NOW())";

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );

        let (active,): (bool,) = sqlx::query_as(query)
            .bind(jti)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("Failed to check session activity")?;

        Ok(active)
    }

    async fn revoke(&self, jti: Uuid) -> Result<bool> {
        let query = "UPDATE sessions SET revoked = TRUE WHERE jti = $1";

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );

        let result = sqlx::query(query)
            .bind(jti)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("Failed to revoke session")?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all(&self, subject_id: Uuid, except: Option<Uuid>) -> Result<u64> {
        let query = "UPDATE sessions SET revoked = TRUE \
             WHERE user_id = $1 AND NOT revoked AND expires_at > NOW() \
             AND ($2::uuid IS NULL OR jti <> $2)";

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );

        let result = sqlx::query(query)
            .bind(subject_id)
            .bind(except)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("Failed to revoke sessions for subject")?;

        Ok(result.rows_affected())
    }

    async fn list_active(&self, subject_id: Uuid) -> Result<Vec<SessionRecord>> {
        let query = "SELECT jti, user_id, issued_at, expires_at, source_addr, device_name, revoked \
             FROM sessions \
             WHERE user_id = $1 AND NOT revoked AND expires_at > NOW() \
             ORDER BY issued_at";

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );

        let rows: Vec<SessionRow> = sqlx::query_as(query)
            .bind(subject_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("Failed to list active sessions")?;

        Ok(rows.into_iter().map(row_to_record).collect())
    }

    async fn prune_expired(&self) -> Result<u64> {
        let query = "DELETE FROM sessions WHERE expires_at <= NOW()";

        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );

        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("Failed to prune expired sessions")?;

        Ok(result.rows_affected())
    }
}
