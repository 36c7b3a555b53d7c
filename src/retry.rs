//! Generic pool- and pin-aware retry driver.
//!
//! Every host-addressed operation (upload a part, fetch a range, commit an
//! upload) wants the same loop: consult the pin, fall back to the pool,
//! punish on failure, stop repopulating the pin once an attempt turns out
//! non-retryable. Rather than duplicating that loop per call site, it's
//! expressed once here, generically over the operation: the operation is a
//! function of host only, so retry logic stays independent of RPC shape.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::host::{HostPin, HostPool, HostPoolError};

/// Whether a classified error should be retried or treated as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Punish the host and try again on a different one.
    Retry,
    /// Stop; the error is not transient.
    Fatal,
}

/// Errors the retry driver itself can surface, wrapping the operation's error type.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The underlying operation failed; this is its error, possibly after retries.
    #[error(transparent)]
    Operation(E),
    /// The host pool could not produce a host at all.
    #[error(transparent)]
    Pool(#[from] HostPoolError),
}

/// Runs `op` in a bounded retry loop that consults `pool`/`pin` for a host
/// each attempt, classifies the resulting error with `classify`, and applies
/// `backoff` before the next attempt on a retryable failure.
///
/// The pin is checked first (and cleared on use — single-use affinity),
/// falling back to the pool's round robin; the pin is (re-)populated only on
/// a non-retryable outcome (success or fatal), so a run of failures never
/// pins a bad host.
///
/// # Errors
///
/// Returns [`RetryError::Pool`] if the host pool is empty, or
/// [`RetryError::Operation`] with the last observed error once `max_attempts`
/// is exhausted or a fatal error is classified.
pub async fn retry<Op, Fut, T, E>(
    pool: &HostPool,
    pin: &HostPin,
    pin_ttl: Duration,
    max_attempts: u32,
    classify: impl Fn(&E) -> RetryOutcome,
    backoff: impl Fn(u32) -> Duration,
    mut op: Op,
) -> Result<T, RetryError<E>>
where
    Op: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_err = None;
    for attempt in 0..max_attempts.max(1) {
        let host = match pin.unpin() {
            Some(host) => host,
            None => pool.select().await?,
        };

        match op(host.clone()).await {
            Ok(value) => {
                pin.pin(host, pin_ttl);
                return Ok(value);
            }
            Err(err) => match classify(&err) {
                RetryOutcome::Fatal => {
                    debug!(host, attempt, "fatal error, not retrying");
                    pin.pin(host, pin_ttl);
                    return Err(RetryError::Operation(err));
                }
                RetryOutcome::Retry => {
                    warn!(host, attempt, "retryable error, punishing host");
                    pool.punish(&host).await;
                    last_err = Some(err);
                    let delay = backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            },
        }
    }

    Err(last_err.map(RetryError::Operation).unwrap_or(RetryError::Pool(HostPoolError::Empty)))
}
