//! Shared cancellation signal for per-part upload workers.
//!
//! Modeled as a small sum type carried by a `watch` channel rather than a
//! full cancellation-token crate: the upload engines only need "has the
//! fatal path fired yet", checked at suspension points and composable with
//! `tokio::select!` for the stream-queue variant's channel receive.

use tokio::sync::watch;

/// Cancels every clone of the paired [`CancelToken`].
#[derive(Debug, Clone)]
pub struct CancelHandle(watch::Sender<bool>);

/// Observes whether the paired [`CancelHandle`] has fired.
#[derive(Debug, Clone)]
pub struct CancelToken(watch::Receiver<bool>);

/// Creates a linked cancel handle/token pair, initially not cancelled.
#[must_use]
pub fn pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), CancelToken(rx))
}

impl CancelHandle {
    /// Signals cancellation to every clone of the paired token.
    pub fn cancel(&self) {
        // A closed receiver side means nobody is listening anymore; not an error.
        let _ = self.0.send(true);
    }
}

impl CancelToken {
    /// Returns the current cancellation state without blocking.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation fires. Safe to use inside `tokio::select!`.
    pub async fn cancelled(&mut self) {
        while !*self.0.borrow() {
            if self.0.changed().await.is_err() {
                // Handle dropped without ever cancelling; treat as "never".
                std::future::pending::<()>().await;
            }
        }
    }
}
