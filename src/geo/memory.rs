//! In-memory geo resolver and rule store for tests and development.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;

use super::{GeoResolver, GeoRule, GeoRuleStore};

/// Resolver backed by a fixed address-to-country table.
#[derive(Default)]
pub struct StaticResolver {
    countries: HashMap<IpAddr, String>,
}

impl StaticResolver {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn mapping<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (IpAddr, &'static str)>,
    {
        Self {
            countries: entries
                .into_iter()
                .map(|(addr, country)| (addr, country.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl GeoResolver for StaticResolver {
    async fn country_for(&self, addr: IpAddr) -> Option<String> {
        self.countries.get(&addr).cloned()
    }
}

pub struct MemoryGeoRuleStore {
    rules: Vec<GeoRule>,
}

impl MemoryGeoRuleStore {
    #[must_use]
    pub fn new(rules: Vec<GeoRule>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl GeoRuleStore for MemoryGeoRuleStore {
    async fn load_rules(&self) -> Result<Vec<GeoRule>> {
        Ok(self.rules.clone())
    }
}
