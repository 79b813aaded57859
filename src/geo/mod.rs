//! Geographic access gate.
//!
//! A source address resolves to a country code, and the country is checked
//! against an allow/block rule table. Rules are read-mostly admin data, so
//! the gate keeps a cached copy refreshed on a short TTL instead of hitting
//! the store on every login.
//!
//! The gate fails OPEN: a resolver miss, a loopback/private address, or a
//! rule-store outage never blocks a login. Rejections here are logged
//! distinctly and are not counted as credential failures.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

pub use memory::{MemoryGeoRuleStore, StaticResolver};
pub use postgres::{PgGeoResolver, PgGeoRuleStore};

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeoRuleKind {
    Allow,
    Block,
}

#[derive(Clone, Debug)]
pub struct GeoRule {
    pub country: String,
    pub rule: GeoRuleKind,
}

/// Maps a source address to an ISO country code.
#[async_trait]
pub trait GeoResolver: Send + Sync {
    /// `None` when the address cannot be resolved. Implementations should
    /// return `None` rather than erroring for private/loopback ranges.
    async fn country_for(&self, addr: IpAddr) -> Option<String>;
}

#[async_trait]
pub trait GeoRuleStore: Send + Sync {
    async fn load_rules(&self) -> Result<Vec<GeoRule>>;
}

struct RuleCache {
    loaded_at: Instant,
    by_country: HashMap<String, GeoRuleKind>,
}

pub struct GeoGate {
    resolver: Arc<dyn GeoResolver>,
    store: Arc<dyn GeoRuleStore>,
    ttl: Duration,
    cache: Mutex<Option<RuleCache>>,
}

impl GeoGate {
    #[must_use]
    pub fn new(resolver: Arc<dyn GeoResolver>, store: Arc<dyn GeoRuleStore>) -> Self {
        Self::with_ttl(resolver, store, DEFAULT_CACHE_TTL)
    }

    #[must_use]
    pub fn with_ttl(
        resolver: Arc<dyn GeoResolver>,
        store: Arc<dyn GeoRuleStore>,
        ttl: Duration,
    ) -> Self {
        Self {
            resolver,
            store,
            ttl,
            cache: Mutex::new(None),
        }
    }

    /// Country code for an address, `None` when unresolvable.
    pub async fn country_for(&self, addr: IpAddr) -> Option<String> {
        if is_non_routable(addr) {
            return None;
        }
        self.resolver.country_for(addr).await
    }

    /// True only when the address resolves to a country with a BLOCK rule.
    pub async fn is_blocked(&self, addr: IpAddr) -> bool {
        let Some(country) = self.country_for(addr).await else {
            return false;
        };
        match self.rule_for(&country).await {
            Some(GeoRuleKind::Block) => true,
            Some(GeoRuleKind::Allow) | None => false,
        }
    }

    async fn rule_for(&self, country: &str) -> Option<GeoRuleKind> {
        let mut cache = self.cache.lock().await;
        let stale = cache
            .as_ref()
            .is_none_or(|entry| entry.loaded_at.elapsed() >= self.ttl);
        if stale {
            match self.store.load_rules().await {
                Ok(rules) => {
                    let by_country = rules
                        .into_iter()
                        .map(|rule| (rule.country.to_ascii_uppercase(), rule.rule))
                        .collect();
                    *cache = Some(RuleCache {
                        loaded_at: Instant::now(),
                        by_country,
                    });
                }
                Err(err) => {
                    // Keep serving the stale copy if one exists.
                    warn!("geo rule refresh failed, failing open: {err:#}");
                    if cache.is_none() {
                        return None;
                    }
                }
            }
        }
        cache
            .as_ref()
            .and_then(|entry| entry.by_country.get(&country.to_ascii_uppercase()).copied())
    }
}

fn is_non_routable(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_unspecified() || v4.is_link_local()
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::net::Ipv4Addr;

    fn public(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, last))
    }

    fn gate_with_rules(resolver: StaticResolver, rules: Vec<GeoRule>) -> GeoGate {
        GeoGate::new(
            Arc::new(resolver),
            Arc::new(MemoryGeoRuleStore::new(rules)),
        )
    }

    #[tokio::test]
    async fn blocked_country_is_blocked() {
        let resolver = StaticResolver::mapping([(public(1), "KP")]);
        let gate = gate_with_rules(
            resolver,
            vec![GeoRule {
                country: "KP".to_string(),
                rule: GeoRuleKind::Block,
            }],
        );
        assert!(gate.is_blocked(public(1)).await);
    }

    #[tokio::test]
    async fn unlisted_country_is_allowed() {
        let resolver = StaticResolver::mapping([(public(2), "NZ")]);
        let gate = gate_with_rules(
            resolver,
            vec![GeoRule {
                country: "KP".to_string(),
                rule: GeoRuleKind::Block,
            }],
        );
        assert!(!gate.is_blocked(public(2)).await);
    }

    #[tokio::test]
    async fn loopback_and_private_addresses_fail_open() {
        let resolver = StaticResolver::empty();
        let gate = gate_with_rules(resolver, vec![]);
        assert!(!gate.is_blocked(IpAddr::V4(Ipv4Addr::LOCALHOST)).await);
        assert!(
            !gate
                .is_blocked(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 4)))
                .await
        );
    }

    #[tokio::test]
    async fn unresolvable_address_fails_open() {
        let resolver = StaticResolver::empty();
        let gate = gate_with_rules(
            resolver,
            vec![GeoRule {
                country: "KP".to_string(),
                rule: GeoRuleKind::Block,
            }],
        );
        assert!(!gate.is_blocked(public(3)).await);
    }

    struct BrokenRuleStore;

    #[async_trait]
    impl GeoRuleStore for BrokenRuleStore {
        async fn load_rules(&self) -> Result<Vec<GeoRule>> {
            Err(anyhow!("rules table unavailable"))
        }
    }

    #[tokio::test]
    async fn rule_store_outage_fails_open() {
        let resolver = StaticResolver::mapping([(public(4), "KP")]);
        let gate = GeoGate::new(Arc::new(resolver), Arc::new(BrokenRuleStore));
        assert!(!gate.is_blocked(public(4)).await);
    }

    #[tokio::test]
    async fn country_codes_match_case_insensitively() {
        let resolver = StaticResolver::mapping([(public(5), "kp")]);
        let gate = gate_with_rules(
            resolver,
            vec![GeoRule {
                country: "KP".to_string(),
                rule: GeoRuleKind::Block,
            }],
        );
        assert!(gate.is_blocked(public(5)).await);
    }
}
