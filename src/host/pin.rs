//! Single-slot affinity cache: remembers the last host a caller succeeded on.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct Slot {
    host: String,
    expires_at: Instant,
}

/// A single atomically-swappable `(host, expiry)` slot with a TTL.
///
/// `pin` stores a host; `unpin` removes-and-returns it, but only the first
/// caller after a `pin` gets it back — a parallel burst of requests does not
/// all collapse onto the same host. Modeled as a mutex-guarded cell rather
/// than a lock-free compare-and-swap, matching the "alternatively a
/// once-cell/mutex" option called out for this component.
#[derive(Debug, Default)]
pub struct HostPin {
    slot: Mutex<Option<Slot>>,
}

impl HostPin {
    /// Creates an empty pin.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Stores `host`, claimable until `ttl` elapses.
    pub fn pin(&self, host: impl Into<String>, ttl: Duration) {
        let host = host.into();
        debug!(host = %host, ttl_ms = ttl.as_millis(), "pinning host");
        let mut slot = self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = Some(Slot {
            host,
            expires_at: Instant::now() + ttl,
        });
    }

    /// Removes and returns the pinned host, if present and not expired.
    ///
    /// Single-use: a second call immediately after returns `None` even if
    /// the TTL has not elapsed, since the slot was cleared by the first call.
    pub fn unpin(&self) -> Option<String> {
        let mut slot = self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match slot.take() {
            Some(s) if s.expires_at > Instant::now() => Some(s.host),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpin_returns_pinned_host_once() {
        let pin = HostPin::new();
        pin.pin("h1", Duration::from_secs(30));
        assert_eq!(pin.unpin(), Some("h1".to_string()));
        assert_eq!(pin.unpin(), None);
    }

    #[test]
    fn unpin_on_empty_slot_returns_none() {
        let pin = HostPin::new();
        assert_eq!(pin.unpin(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_pin_is_not_returned() {
        let pin = HostPin::new();
        pin.pin("h1", Duration::from_millis(10));
        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(pin.unpin(), None);
    }

    #[test]
    fn re_pinning_overwrites_previous_slot() {
        let pin = HostPin::new();
        pin.pin("h1", Duration::from_secs(30));
        pin.pin("h2", Duration::from_secs(30));
        assert_eq!(pin.unpin(), Some("h2".to_string()));
    }
}
