//! Host discovery interface feeding [`crate::host::HostPool`]'s background refresh.

use async_trait::async_trait;
use thiserror::Error;

/// Errors a discovery backend can surface to the pool's refresh loop.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The discovery backend itself failed (network error, bad response, ...).
    #[error("host discovery failed: {0}")]
    Backend(String),
}

/// Periodically produces a fresh host list for [`crate::host::HostPool`].
///
/// Deliberately minimal: the discovery backend (the actual RPC client, its
/// caching, and its own retry policy) lives outside this crate. The pool
/// only needs an opaque "give me the current hosts" callback, not the RPC
/// client itself.
#[async_trait]
pub trait HostDiscovery: Send + Sync {
    /// Returns the current set of candidate hosts.
    async fn refresh(&self) -> Result<Vec<String>, DiscoveryError>;
}

/// A discovery source that always returns a fixed host list.
///
/// Useful for tests and for callers who don't need periodic refresh at all.
pub struct StaticHosts(pub Vec<String>);

#[async_trait]
impl HostDiscovery for StaticHosts {
    async fn refresh(&self) -> Result<Vec<String>, DiscoveryError> {
        Ok(self.0.clone())
    }
}
