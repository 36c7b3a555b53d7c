//! Shared reqwest client construction for the upload/download engines.
//!
//! Both engines share the same timeout policy: a fixed 10-minute per-request
//! timeout and a short connect timeout. There is deliberately no per-part
//! timeout; a slow part is abandoned only via cancellation, not a clock.

use reqwest::{Client, ClientBuilder};

use crate::constants::{CONNECT_TIMEOUT_SECS, REQUEST_TIMEOUT};

/// Builds the shared HTTP client used by the upload and download engines.
///
/// # Errors
///
/// Returns an error if the underlying TLS backend fails to initialize.
pub fn build_client() -> Result<Client, reqwest::Error> {
    ClientBuilder::new()
        .connect_timeout(std::time::Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(REQUEST_TIMEOUT)
        .build()
}
