//! Round-robin host pool with time-decaying punishment and background refresh.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::constants::{DEFAULT_PUNISH_PERIOD, DEFAULT_REFRESH_PERIOD};
use crate::discovery::HostDiscovery;

/// Errors raised by [`HostPool`] operations.
#[derive(Debug, Error)]
pub enum HostPoolError {
    /// The pool was constructed or refreshed down to zero hosts.
    #[error("host pool is empty")]
    Empty,
}

#[derive(Debug, Clone)]
struct HostEntry {
    host: String,
    punished_until: Option<Instant>,
}

impl HostEntry {
    fn fresh(host: String) -> Self {
        Self {
            host,
            punished_until: None,
        }
    }

    fn is_punished(&self, now: Instant) -> bool {
        self.punished_until.is_some_and(|until| until > now)
    }
}

/// Construction parameters for [`HostPool`].
///
/// Mirrors `kodocli.UploadConfig`-style plain config structs: no file or env
/// loading, just a struct the caller fills in and passes to the constructor.
#[derive(Debug, Clone)]
pub struct HostPoolConfig {
    /// How often the background task asks the discovery source for a fresh host list.
    pub refresh_period: Duration,
    /// How long a punished host is excluded from [`HostPool::select`].
    pub punish_period: Duration,
}

impl Default for HostPoolConfig {
    fn default() -> Self {
        Self {
            refresh_period: DEFAULT_REFRESH_PERIOD,
            punish_period: DEFAULT_PUNISH_PERIOD,
        }
    }
}

/// A rotating pool of candidate hosts with punishment and periodic refresh.
///
/// Reads (`select`, `is_punished`) take a read lock; mutations (`punish`,
/// `refresh`) take a write lock. The round-robin cursor is a separate atomic
/// so that advancing it does not itself require the write lock.
#[derive(Debug)]
pub struct HostPool {
    entries: RwLock<Vec<HostEntry>>,
    cursor: AtomicUsize,
    punish_period: Duration,
    refresh_period: Duration,
}

impl HostPool {
    /// Builds a pool from an initial host list and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HostPoolError::Empty`] if `initial_hosts` is empty.
    pub fn new(initial_hosts: Vec<String>, config: HostPoolConfig) -> Result<Self, HostPoolError> {
        if initial_hosts.is_empty() {
            return Err(HostPoolError::Empty);
        }
        Ok(Self {
            entries: RwLock::new(initial_hosts.into_iter().map(HostEntry::fresh).collect()),
            cursor: AtomicUsize::new(0),
            punish_period: config.punish_period,
            refresh_period: config.refresh_period,
        })
    }

    /// Spawns the detached background refresh task on the given runtime.
    ///
    /// Fires every `refresh_period` from the pool's [`HostPoolConfig`],
    /// asking `discovery` for a fresh host list. A non-empty result replaces
    /// the pool; old punishments are carried over to any host that matches
    /// by string equality.
    pub fn spawn_background_refresh(
        self: &Arc<Self>,
        discovery: Arc<dyn HostDiscovery>,
    ) -> tokio::task::JoinHandle<()> {
        let pool = Arc::clone(self);
        let refresh_period = self.refresh_period;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresh_period);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                match discovery.refresh().await {
                    Ok(hosts) if !hosts.is_empty() => pool.replace_hosts(hosts).await,
                    Ok(_) => debug!("discovery returned no hosts, keeping current pool"),
                    Err(err) => warn!(%err, "host discovery refresh failed"),
                }
            }
        })
    }

    /// Replaces the host list, carrying over punishment state by string equality.
    #[instrument(skip(self))]
    pub async fn replace_hosts(&self, new_hosts: Vec<String>) {
        let mut entries = self.entries.write().await;
        let old = std::mem::take(&mut *entries);
        *entries = new_hosts
            .into_iter()
            .map(|host| {
                let punished_until = old
                    .iter()
                    .find(|e| e.host == host)
                    .and_then(|e| e.punished_until);
                HostEntry {
                    host,
                    punished_until,
                }
            })
            .collect();
        self.cursor.store(0, Ordering::Relaxed);
        debug!(count = entries.len(), "host pool refreshed");
    }

    /// Returns the next host in round-robin order, skipping punished hosts.
    ///
    /// If a full cycle passes without finding an unpunished host, forced
    /// progress returns the next candidate anyway — `select` never fails
    /// while the pool holds at least one host.
    ///
    /// # Errors
    ///
    /// Returns [`HostPoolError::Empty`] if the pool currently has zero hosts
    /// (e.g. after a refresh replaced it with an empty list — `replace_hosts`
    /// only does that if discovery itself returns an empty list, which is
    /// otherwise filtered out by `spawn_background_refresh`).
    #[instrument(skip(self))]
    pub async fn select(&self) -> Result<String, HostPoolError> {
        let entries = self.entries.read().await;
        if entries.is_empty() {
            return Err(HostPoolError::Empty);
        }
        let now = Instant::now();
        let len = entries.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
        for offset in 0..len {
            let idx = (start + offset) % len;
            if !entries[idx].is_punished(now) {
                return Ok(entries[idx].host.clone());
            }
        }
        // Forced progress: every host is punished, return the cursor's pick anyway.
        Ok(entries[start].host.clone())
    }

    /// Marks `host` as punished for the configured punish period. No-op if absent.
    #[instrument(skip(self))]
    pub async fn punish(&self, host: &str) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.host == host) {
            entry.punished_until = Some(Instant::now() + self.punish_period);
            debug!(host, "punished");
        }
    }

    /// Calls [`HostPool::punish`] iff `should_punish` is true.
    ///
    /// Bundles classification and punishment for callers that don't need the
    /// two steps separated (the retry driver in `retry.rs` classifies first
    /// and calls `punish` directly instead).
    pub async fn fail(&self, host: &str, should_punish: bool) {
        if should_punish {
            self.punish(host).await;
        }
    }

    /// Returns whether `host` is currently punished.
    pub async fn is_punished(&self, host: &str) -> bool {
        let entries = self.entries.read().await;
        let now = Instant::now();
        entries
            .iter()
            .find(|e| e.host == host)
            .is_some_and(|e| e.is_punished(now))
    }

    /// Read-only snapshot of the current host list, in rotation order.
    pub async fn hosts_snapshot(&self) -> Vec<String> {
        self.entries.read().await.iter().map(|e| e.host.clone()).collect()
    }

    /// Number of hosts currently in the pool.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the pool currently holds zero hosts.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn new_rejects_empty_host_list() {
        let result = HostPool::new(Vec::new(), HostPoolConfig::default());
        assert!(matches!(result, Err(HostPoolError::Empty)));
    }

    #[tokio::test]
    async fn select_round_robins_across_hosts() {
        let pool = HostPool::new(hosts(&["h1", "h2", "h3"]), HostPoolConfig::default()).unwrap();
        let mut counts = std::collections::HashMap::new();
        for _ in 0..6 {
            let host = pool.select().await.unwrap();
            *counts.entry(host).or_insert(0) += 1;
        }
        assert_eq!(counts.get("h1"), Some(&2));
        assert_eq!(counts.get("h2"), Some(&2));
        assert_eq!(counts.get("h3"), Some(&2));
    }

    #[tokio::test]
    async fn punished_host_excluded_until_period_elapses() {
        let pool = HostPool::new(
            hosts(&["h1", "h2", "h3"]),
            HostPoolConfig {
                refresh_period: Duration::from_secs(300),
                punish_period: Duration::from_secs(30),
            },
        )
        .unwrap();

        pool.punish("h1").await;
        assert!(pool.is_punished("h1").await);

        let mut counts = std::collections::HashMap::new();
        for _ in 0..6 {
            let host = pool.select().await.unwrap();
            *counts.entry(host).or_insert(0) += 1;
        }
        assert_eq!(counts.get("h1"), None);
        assert_eq!(counts.get("h2"), Some(&3));
        assert_eq!(counts.get("h3"), Some(&3));
    }

    #[tokio::test]
    async fn select_forces_progress_when_all_hosts_punished() {
        let pool = HostPool::new(hosts(&["h1", "h2"]), HostPoolConfig::default()).unwrap();
        pool.punish("h1").await;
        pool.punish("h2").await;
        // Must still return a host, not hang or error.
        let host = pool.select().await.unwrap();
        assert!(host == "h1" || host == "h2");
    }

    #[tokio::test]
    async fn refresh_preserves_punishment_by_string_equality() {
        let pool = HostPool::new(hosts(&["h1", "h2"]), HostPoolConfig::default()).unwrap();
        pool.punish("h1").await;
        pool.replace_hosts(hosts(&["h1", "h3"])).await;
        assert!(pool.is_punished("h1").await);
        assert!(!pool.is_punished("h3").await);
        assert_eq!(pool.len().await, 2);
    }

    #[tokio::test]
    async fn fail_punishes_only_when_told_to() {
        let pool = HostPool::new(hosts(&["h1"]), HostPoolConfig::default()).unwrap();
        pool.fail("h1", false).await;
        assert!(!pool.is_punished("h1").await);
        pool.fail("h1", true).await;
        assert!(pool.is_punished("h1").await);
    }
}
