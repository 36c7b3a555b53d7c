//! Bounded concurrency limiter for in-flight upload parts.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, SemaphorePermit};

/// Bounds the number of concurrently in-flight part workers to a configured degree.
///
/// A thin named wrapper over [`tokio::sync::Semaphore`] — the same primitive
/// the download engine already uses for its own concurrency cap — so call
/// sites read in the vocabulary of this crate (`acquire`/`release`) instead of
/// raw semaphore permits.
#[derive(Debug, Clone)]
pub struct PartLimiter {
    semaphore: Arc<Semaphore>,
}

impl PartLimiter {
    /// Creates a limiter allowing up to `concurrency` in-flight workers.
    ///
    /// # Panics
    ///
    /// Panics if `concurrency` is zero — a limiter that can never admit a
    /// worker is a construction error, not a runtime condition to propagate.
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        assert!(concurrency >= 1, "PartLimiter concurrency must be >= 1");
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
        }
    }

    /// Blocks until a slot is available, then holds it until the guard drops.
    ///
    /// # Errors
    ///
    /// Only fails if the limiter itself has been closed, which this type
    /// never does.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, tokio::sync::AcquireError> {
        self.semaphore.acquire().await
    }

    /// Like [`PartLimiter::acquire`], but returns an owned permit so the
    /// caller can move it into a spawned task.
    ///
    /// # Errors
    ///
    /// Only fails if the limiter itself has been closed, which this type
    /// never does.
    pub async fn acquire_owned(
        &self,
    ) -> Result<OwnedSemaphorePermit, tokio::sync::AcquireError> {
        Arc::clone(&self.semaphore).acquire_owned().await
    }
}
