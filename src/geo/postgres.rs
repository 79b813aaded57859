//! Postgres-backed geo rule store and address resolver.
//!
//! The rules table is written by the admin workflow; this core only reads
//! it. Country resolution uses an ip_country_ranges table maintained by the
//! same workflow (imported from a public geo dataset).

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::net::IpAddr;
use tracing::{Instrument, warn};

use super::{GeoResolver, GeoRule, GeoRuleKind, GeoRuleStore};

#[derive(Clone)]
pub struct PgGeoRuleStore {
    pool: PgPool,
}

impl PgGeoRuleStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GeoRuleStore for PgGeoRuleStore {
    async fn load_rules(&self) -> Result<Vec<GeoRule>> {
        let query = "SELECT country, rule::text AS rule FROM geo_rules";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to load geo rules")?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let country: String = row.get("country");
                let rule: String = row.get("rule");
                let kind = match rule.as_str() {
                    "allow" => GeoRuleKind::Allow,
                    "block" => GeoRuleKind::Block,
                    other => {
                        warn!("unknown geo rule '{other}' for {country}, ignoring");
                        return None;
                    }
                };
                Some(GeoRule {
                    country,
                    rule: kind,
                })
            })
            .collect())
    }
}

/// Resolver backed by CIDR ranges in Postgres.
#[derive(Clone)]
pub struct PgGeoResolver {
    pool: PgPool,
}

impl PgGeoResolver {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GeoResolver for PgGeoResolver {
    async fn country_for(&self, addr: IpAddr) -> Option<String> {
        let query = r"
            SELECT country
            FROM ip_country_ranges
            WHERE range >> $1
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        match sqlx::query(query)
            .bind(addr)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
        {
            Ok(row) => row.map(|row| row.get("country")),
            Err(err) => {
                // Resolution errors fail open upstream.
                warn!("geo resolution failed for {addr}: {err}");
                None
            }
        }
    }
}
