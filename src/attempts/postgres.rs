//! Postgres attempt store.
//!
//! The failure record is keyed (source_addr, username) with a conditional
//! upsert so concurrent failed attempts never lose an increment. An upsert
//! landing on an expired row restarts the count at one instead of resuming.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::net::IpAddr;
use std::time::Duration;
use tracing::Instrument;

use super::AttemptStore;

#[derive(Clone)]
pub struct PgAttemptStore {
    pool: PgPool,
}

impl PgAttemptStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[allow(clippy::cast_possible_wrap)]
fn window_seconds(window: Duration) -> i64 {
    window.as_secs() as i64
}

#[async_trait]
impl AttemptStore for PgAttemptStore {
    async fn record_failure(&self, username: &str, addr: IpAddr, window: Duration) -> Result<()> {
        let query = r"
            INSERT INTO login_attempts (source_addr, username, failures, last_failure_at)
            VALUES ($1, $2, 1, NOW())
            ON CONFLICT (source_addr, username) DO UPDATE
            SET failures = CASE
                    WHEN login_attempts.last_failure_at < NOW() - ($3 * INTERVAL '1 second')
                        THEN 1
                    ELSE login_attempts.failures + 1
                END,
                last_failure_at = NOW()
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(addr)
            .bind(username)
            .bind(window_seconds(window))
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to record login failure")?;
        Ok(())
    }

    async fn username_failures(&self, username: &str, window: Duration) -> Result<u32> {
        let query = r"
            SELECT COALESCE(SUM(failures), 0)::BIGINT AS total
            FROM login_attempts
            WHERE username = $1
              AND last_failure_at > NOW() - ($2 * INTERVAL '1 second')
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(username)
            .bind(window_seconds(window))
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to count username failures")?;
        let total: i64 = row.get("total");
        Ok(u32::try_from(total).unwrap_or(u32::MAX))
    }

    async fn address_failures(&self, addr: IpAddr, window: Duration) -> Result<u32> {
        let query = r"
            SELECT COALESCE(SUM(failures), 0)::BIGINT AS total
            FROM login_attempts
            WHERE source_addr = $1
              AND last_failure_at > NOW() - ($2 * INTERVAL '1 second')
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(addr)
            .bind(window_seconds(window))
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to count address failures")?;
        let total: i64 = row.get("total");
        Ok(u32::try_from(total).unwrap_or(u32::MAX))
    }

    async fn clear_username(&self, username: &str) -> Result<()> {
        let query = "DELETE FROM login_attempts WHERE username = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(username)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to clear login attempts")?;
        Ok(())
    }

    async fn prune_expired(&self, window: Duration) -> Result<()> {
        let query = r"
            DELETE FROM login_attempts
            WHERE last_failure_at < NOW() - ($1 * INTERVAL '1 second')
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(window_seconds(window))
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to prune expired login attempts")?;
        Ok(())
    }
}
