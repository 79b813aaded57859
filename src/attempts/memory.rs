//! In-memory attempt store for tests and single-node development.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::AttemptStore;

#[derive(Clone, Copy, Debug)]
struct Counter {
    failures: u32,
    last_failure: Instant,
}

#[derive(Default)]
pub struct MemoryAttemptStore {
    records: Mutex<HashMap<(String, IpAddr), Counter>>,
}

impl MemoryAttemptStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn live(counter: &Counter, window: Duration) -> bool {
    counter.last_failure.elapsed() < window
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn record_failure(&self, username: &str, addr: IpAddr, window: Duration) -> Result<()> {
        let mut records = self.records.lock().await;
        let entry = records
            .entry((username.to_string(), addr))
            .or_insert(Counter {
                failures: 0,
                last_failure: Instant::now(),
            });
        // An expired record restarts at one rather than resuming its count.
        entry.failures = if live(entry, window) {
            entry.failures.saturating_add(1)
        } else {
            1
        };
        entry.last_failure = Instant::now();
        Ok(())
    }

    async fn username_failures(&self, username: &str, window: Duration) -> Result<u32> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|((name, _), counter)| name == username && live(counter, window))
            .map(|(_, counter)| counter.failures)
            .sum())
    }

    async fn address_failures(&self, addr: IpAddr, window: Duration) -> Result<u32> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|((_, a), counter)| *a == addr && live(counter, window))
            .map(|(_, counter)| counter.failures)
            .sum())
    }

    async fn clear_username(&self, username: &str) -> Result<()> {
        let mut records = self.records.lock().await;
        records.retain(|(name, _), _| name != username);
        Ok(())
    }

    async fn prune_expired(&self, window: Duration) -> Result<()> {
        let mut records = self.records.lock().await;
        records.retain(|_, counter| live(counter, window));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7));
    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn failures_accumulate_per_key() {
        let store = MemoryAttemptStore::new();
        store.record_failure("alice", ADDR, WINDOW).await.ok();
        store.record_failure("alice", ADDR, WINDOW).await.ok();
        store.record_failure("bob", ADDR, WINDOW).await.ok();
        assert_eq!(store.username_failures("alice", WINDOW).await.ok(), Some(2));
        assert_eq!(store.address_failures(ADDR, WINDOW).await.ok(), Some(3));
    }

    #[tokio::test]
    async fn expired_record_restarts_at_one() {
        let store = MemoryAttemptStore::new();
        let short = Duration::from_millis(20);
        store.record_failure("alice", ADDR, short).await.ok();
        tokio::time::sleep(Duration::from_millis(40)).await;
        store.record_failure("alice", ADDR, short).await.ok();
        assert_eq!(store.username_failures("alice", short).await.ok(), Some(1));
    }
}
