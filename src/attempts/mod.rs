//! Attempt guard: dual-axis brute-force lockout.
//!
//! Every failed primary-credential check increments two counters, one keyed
//! by username and one keyed by source address, through a single atomic
//! store operation. Either axis can trip the lockout: the username axis at a
//! low threshold, the address axis at a coarser one that catches spraying
//! across many usernames. Counters older than the window count as zero.
//!
//! The guard fails OPEN: it is a secondary defense layered under the geo
//! gate and credential hashing, so a storage outage must not deny all
//! logins. Store calls run under a bounded timeout for the same reason.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub use memory::MemoryAttemptStore;
pub use postgres::PgAttemptStore;

const DEFAULT_USERNAME_THRESHOLD: u32 = 5;
const DEFAULT_ADDRESS_THRESHOLD: u32 = 10;
const DEFAULT_WINDOW_SECONDS: u64 = 15 * 60;
const STORE_CALL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug)]
pub struct GuardConfig {
    pub username_threshold: u32,
    pub address_threshold: u32,
    pub window: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            username_threshold: DEFAULT_USERNAME_THRESHOLD,
            address_threshold: DEFAULT_ADDRESS_THRESHOLD,
            window: Duration::from_secs(DEFAULT_WINDOW_SECONDS),
        }
    }
}

/// Storage contract for failure counters.
///
/// `record_failure` must be a single increment-or-insert operation; a
/// read-then-write sequence loses updates under concurrent failed attempts.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn record_failure(&self, username: &str, addr: IpAddr, window: Duration) -> Result<()>;

    /// Failures for this username within the window, across all addresses.
    async fn username_failures(&self, username: &str, window: Duration) -> Result<u32>;

    /// Failures from this address within the window, summed across usernames.
    async fn address_failures(&self, addr: IpAddr, window: Duration) -> Result<u32>;

    /// Remove all records for a username (any address). Called on success.
    async fn clear_username(&self, username: &str) -> Result<()>;

    /// Drop records whose last failure predates the window. Best effort.
    async fn prune_expired(&self, window: Duration) -> Result<()>;
}

pub struct AttemptGuard {
    store: Arc<dyn AttemptStore>,
    config: GuardConfig,
}

impl AttemptGuard {
    #[must_use]
    pub fn new(store: Arc<dyn AttemptStore>, config: GuardConfig) -> Self {
        Self { store, config }
    }

    #[must_use]
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// True when either axis is at or over its threshold inside the window.
    ///
    /// Storage errors and timeouts resolve to `false` (fail open).
    pub async fn is_locked_out(&self, username: &str, addr: IpAddr) -> bool {
        let window = self.config.window;

        match tokio::time::timeout(STORE_CALL_TIMEOUT, self.store.prune_expired(window)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!("attempt guard prune failed: {err:#}");
            }
            Err(_) => {
                warn!("attempt guard prune timed out");
            }
        }

        let by_username = tokio::time::timeout(
            STORE_CALL_TIMEOUT,
            self.store.username_failures(username, window),
        )
        .await;
        match by_username {
            Ok(Ok(count)) if count >= self.config.username_threshold => return true,
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                warn!("attempt guard username check failed, failing open: {err:#}");
            }
            Err(_) => {
                warn!("attempt guard username check timed out, failing open");
            }
        }

        let by_address = tokio::time::timeout(
            STORE_CALL_TIMEOUT,
            self.store.address_failures(addr, window),
        )
        .await;
        match by_address {
            Ok(Ok(count)) if count >= self.config.address_threshold => true,
            Ok(Ok(_)) => false,
            Ok(Err(err)) => {
                warn!("attempt guard address check failed, failing open: {err:#}");
                false
            }
            Err(_) => {
                warn!("attempt guard address check timed out, failing open");
                false
            }
        }
    }

    /// Record one credential failure on both axes.
    pub async fn record_failure(&self, username: &str, addr: IpAddr) {
        let write = tokio::time::timeout(
            STORE_CALL_TIMEOUT,
            self.store.record_failure(username, addr, self.config.window),
        )
        .await;
        match write {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!("attempt guard failed to record failure: {err:#}");
            }
            Err(_) => {
                warn!("attempt guard failure record timed out");
            }
        }
    }

    /// A successful login forgives all prior failures for this username,
    /// from every address. Other usernames' counters from the same address
    /// keep running until their own windows expire.
    pub async fn clear(&self, username: &str) {
        match tokio::time::timeout(STORE_CALL_TIMEOUT, self.store.clear_username(username)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!("attempt guard failed to clear attempts: {err:#}");
            }
            Err(_) => {
                warn!("attempt guard clear timed out");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, last))
    }

    fn guard_with(config: GuardConfig) -> AttemptGuard {
        AttemptGuard::new(Arc::new(MemoryAttemptStore::new()), config)
    }

    #[tokio::test]
    async fn username_axis_locks_at_threshold() {
        let guard = guard_with(GuardConfig::default());
        for _ in 0..5 {
            guard.record_failure("alice", addr(1)).await;
        }
        assert!(guard.is_locked_out("alice", addr(1)).await);
        // Same address, different username: under the address threshold.
        assert!(!guard.is_locked_out("bob", addr(1)).await);
    }

    #[tokio::test]
    async fn address_axis_locks_across_usernames() {
        let guard = guard_with(GuardConfig::default());
        // Ten failures from one address, each username under its own limit.
        for i in 0..10 {
            guard.record_failure(&format!("user{i}"), addr(2)).await;
        }
        assert!(guard.is_locked_out("someone-new", addr(2)).await);
        // A different address is unaffected.
        assert!(!guard.is_locked_out("someone-new", addr(3)).await);
    }

    #[tokio::test]
    async fn success_clears_only_that_username() {
        let guard = guard_with(GuardConfig::default());
        for _ in 0..5 {
            guard.record_failure("alice", addr(4)).await;
        }
        for _ in 0..4 {
            guard.record_failure("bob", addr(4)).await;
        }
        guard.clear("alice").await;
        assert!(!guard.is_locked_out("alice", addr(4)).await);
        guard.record_failure("bob", addr(4)).await;
        assert!(guard.is_locked_out("bob", addr(4)).await);
    }

    #[tokio::test]
    async fn lockout_expires_with_the_window() {
        let config = GuardConfig {
            window: Duration::from_millis(80),
            ..GuardConfig::default()
        };
        let guard = guard_with(config);
        for _ in 0..5 {
            guard.record_failure("carol", addr(5)).await;
        }
        assert!(guard.is_locked_out("carol", addr(5)).await);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!guard.is_locked_out("carol", addr(5)).await);
    }

    struct BrokenStore;

    #[async_trait]
    impl AttemptStore for BrokenStore {
        async fn record_failure(&self, _: &str, _: IpAddr, _: Duration) -> Result<()> {
            Err(anyhow!("store down"))
        }
        async fn username_failures(&self, _: &str, _: Duration) -> Result<u32> {
            Err(anyhow!("store down"))
        }
        async fn address_failures(&self, _: IpAddr, _: Duration) -> Result<u32> {
            Err(anyhow!("store down"))
        }
        async fn clear_username(&self, _: &str) -> Result<()> {
            Err(anyhow!("store down"))
        }
        async fn prune_expired(&self, _: Duration) -> Result<()> {
            Err(anyhow!("store down"))
        }
    }

    #[tokio::test]
    async fn storage_outage_fails_open() {
        let guard = AttemptGuard::new(Arc::new(BrokenStore), GuardConfig::default());
        assert!(!guard.is_locked_out("alice", addr(6)).await);
    }

    struct StalledStore;

    #[async_trait]
    impl AttemptStore for StalledStore {
        async fn record_failure(&self, _: &str, _: IpAddr, _: Duration) -> Result<()> {
            std::future::pending().await
        }
        async fn username_failures(&self, _: &str, _: Duration) -> Result<u32> {
            std::future::pending().await
        }
        async fn address_failures(&self, _: IpAddr, _: Duration) -> Result<u32> {
            std::future::pending().await
        }
        async fn clear_username(&self, _: &str) -> Result<()> {
            std::future::pending().await
        }
        async fn prune_expired(&self, _: Duration) -> Result<()> {
            std::future::pending().await
        }
    }

    // Every store call sits behind the bounded timeout, so a hung store
    // must not stall the login path.
    #[tokio::test(start_paused = true)]
    async fn hung_store_fails_open() {
        let guard = AttemptGuard::new(Arc::new(StalledStore), GuardConfig::default());
        assert!(!guard.is_locked_out("alice", addr(7)).await);
        guard.record_failure("alice", addr(7)).await;
        guard.clear("alice").await;
    }
}
