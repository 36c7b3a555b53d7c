//! HMAC-SHA1 request signing and base64url-encoded signed tokens.

pub mod token;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use thiserror::Error;

pub use token::{PutPolicy, TokenError};

type HmacSha1 = Hmac<Sha1>;

/// Errors raised by the signing primitives.
#[derive(Debug, Error)]
pub enum SignError {
    /// The secret key was rejected by the HMAC implementation (never empty, but
    /// the underlying crate's key-length invariant is fallible in principle).
    #[error("invalid signing key")]
    InvalidKey,
}

/// base64url-encodes `data` with no padding, matching `encode()` upstream.
#[must_use]
pub fn base64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// base64url-decodes `data` with no padding.
///
/// # Errors
///
/// Returns an error if `data` is not valid base64url.
pub fn base64url_decode(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(data)
}

/// Computes `base64url(HMAC-SHA1(secret_key, message))`.
///
/// # Errors
///
/// Returns [`SignError::InvalidKey`] if `secret_key` is rejected by the MAC
/// implementation.
pub fn sign(secret_key: &[u8], message: &[u8]) -> Result<String, SignError> {
    let mut mac = HmacSha1::new_from_slice(secret_key).map_err(|_| SignError::InvalidKey)?;
    mac.update(message);
    Ok(base64url_encode(&mac.finalize().into_bytes()))
}

/// Verifies that `mac_b64` is the correct `base64url(HMAC-SHA1(secret_key, message))`.
///
/// Constant-time comparison is delegated to the `hmac` crate's `verify_slice`.
#[must_use]
pub fn verify(secret_key: &[u8], message: &[u8], mac_b64: &str) -> bool {
    let Ok(mut mac) = HmacSha1::new_from_slice(secret_key) else {
        return false;
    };
    let Ok(expected) = base64url_decode(mac_b64) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(&expected).is_ok()
}

/// Signs a download URL with a deadline query parameter and an access-key/MAC pair.
///
/// Appends `e=<deadline_unix>` (using `?` or `&` as appropriate), computes the
/// MAC over the resulting URL, and appends `&token=<access_key>:<mac>`.
///
/// # Errors
///
/// Returns [`SignError::InvalidKey`] if `secret_key` is rejected by the MAC
/// implementation.
pub fn sign_download_url(
    base_url: &str,
    deadline_unix: i64,
    access_key: &str,
    secret_key: &[u8],
) -> Result<String, SignError> {
    let separator = if base_url.contains('?') { "&" } else { "?" };
    let url_with_deadline = format!("{base_url}{separator}e={deadline_unix}");
    let mac = sign(secret_key, url_with_deadline.as_bytes())?;
    Ok(format!("{url_with_deadline}&token={access_key}:{mac}"))
}

/// Builds a with-data signed token: `access_key:base64url(HMAC-SHA1(secret,data)):base64url(data)`.
///
/// # Errors
///
/// Returns [`SignError::InvalidKey`] if `secret_key` is rejected by the MAC
/// implementation.
pub fn sign_with_data(
    access_key: &str,
    secret_key: &[u8],
    data: &[u8],
) -> Result<String, SignError> {
    let mac = sign(secret_key, data)?;
    let encoded_data = base64url_encode(data);
    Ok(format!("{access_key}:{mac}:{encoded_data}"))
}
