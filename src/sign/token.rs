//! Upload-token codec: the `PutPolicy` put-policy struct and its parse/build helpers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::constants::DEFAULT_TOKEN_TTL;

use super::{SignError, base64url_decode, sign_with_data};

/// Errors raised while parsing or building upload tokens.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The token did not split into exactly three `:`-separated parts.
    #[error("malformed upload token: expected 3 ':'-separated parts, got {0}")]
    MalformedShape(usize),
    /// The third part was not valid base64url.
    #[error("malformed upload token: invalid base64 in policy segment")]
    InvalidBase64(#[from] base64::DecodeError),
    /// The decoded policy segment was not valid JSON for `PutPolicy`.
    #[error("malformed upload token: invalid put-policy JSON")]
    InvalidJson(#[from] serde_json::Error),
    /// The policy's `scope` field was missing or empty.
    #[error("put-policy scope is required")]
    MissingScope,
    /// Signing the policy failed.
    #[error(transparent)]
    Sign(#[from] SignError),
}

/// The put-policy embedded in an upload token.
///
/// The engine only ever reads `scope` (to derive the bucket name) and
/// `deadline`; every other field is pass-through and must be preserved
/// bit-exactly across a parse/build round trip. Unknown fields — anything
/// not in the recognized pass-through set — are preserved via `extra` rather
/// than silently dropped, so `parse(build(policy)) == policy` holds even as
/// the recognized field set grows over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutPolicy {
    /// Required. `bucket` or `bucket:key`.
    pub scope: String,
    /// Absolute unix-seconds deadline. `None` until normalized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<i64>,

    #[serde(rename = "insertOnly", skip_serializing_if = "Option::is_none")]
    pub insert_only: Option<i32>,
    #[serde(rename = "detectMime", skip_serializing_if = "Option::is_none")]
    pub detect_mime: Option<i32>,
    #[serde(rename = "fsizeLimit", skip_serializing_if = "Option::is_none")]
    pub fsize_limit: Option<i64>,
    #[serde(rename = "mimeLimit", skip_serializing_if = "Option::is_none")]
    pub mime_limit: Option<String>,
    #[serde(rename = "saveKey", skip_serializing_if = "Option::is_none")]
    pub save_key: Option<String>,
    #[serde(rename = "callbackUrl", skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    #[serde(rename = "callbackHost", skip_serializing_if = "Option::is_none")]
    pub callback_host: Option<String>,
    #[serde(rename = "callbackBody", skip_serializing_if = "Option::is_none")]
    pub callback_body: Option<String>,
    #[serde(rename = "callbackBodyType", skip_serializing_if = "Option::is_none")]
    pub callback_body_type: Option<String>,
    #[serde(rename = "returnUrl", skip_serializing_if = "Option::is_none")]
    pub return_url: Option<String>,
    #[serde(rename = "returnBody", skip_serializing_if = "Option::is_none")]
    pub return_body: Option<String>,
    #[serde(rename = "persistentOps", skip_serializing_if = "Option::is_none")]
    pub persistent_ops: Option<String>,
    #[serde(rename = "persistentNotifyUrl", skip_serializing_if = "Option::is_none")]
    pub persistent_notify_url: Option<String>,
    #[serde(rename = "persistentPipeline", skip_serializing_if = "Option::is_none")]
    pub persistent_pipeline: Option<String>,
    #[serde(rename = "endUser", skip_serializing_if = "Option::is_none")]
    pub end_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(rename = "notifyQueue", skip_serializing_if = "Option::is_none")]
    pub notify_queue: Option<String>,
    #[serde(rename = "notifyMessage", skip_serializing_if = "Option::is_none")]
    pub notify_message: Option<String>,
    #[serde(rename = "notifyMessageType", skip_serializing_if = "Option::is_none")]
    pub notify_message_type: Option<String>,
    #[serde(rename = "deleteAfterDays", skip_serializing_if = "Option::is_none")]
    pub delete_after_days: Option<i32>,
    #[serde(rename = "fileType", skip_serializing_if = "Option::is_none")]
    pub file_type: Option<i32>,
    #[serde(rename = "oldFh", skip_serializing_if = "Option::is_none")]
    pub old_fh: Option<String>,
    #[serde(rename = "putTime", skip_serializing_if = "Option::is_none")]
    pub put_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cond: Option<String>,

    /// Fields not in the recognized set above, preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PutPolicy {
    /// Creates a bare policy with only `scope` set; all other fields empty.
    #[must_use]
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            deadline: None,
            insert_only: None,
            detect_mime: None,
            fsize_limit: None,
            mime_limit: None,
            save_key: None,
            callback_url: None,
            callback_host: None,
            callback_body: None,
            callback_body_type: None,
            return_url: None,
            return_body: None,
            persistent_ops: None,
            persistent_notify_url: None,
            persistent_pipeline: None,
            end_user: None,
            checksum: None,
            notify_queue: None,
            notify_message: None,
            notify_message_type: None,
            delete_after_days: None,
            file_type: None,
            old_fh: None,
            put_time: None,
            cond: None,
            extra: Map::new(),
        }
    }

    /// Sets the absolute deadline, normalizing a caller-supplied relative
    /// `expires` (seconds from now) the way the engine does: zero means the
    /// default TTL, any other value is added to `now_unix`.
    #[must_use]
    pub fn with_deadline_from_expires(mut self, expires_relative_secs: i64, now_unix: i64) -> Self {
        self.deadline = Some(normalize_deadline(expires_relative_secs, now_unix));
        self
    }

    /// The bucket name, derived from `scope` (`bucket` or `bucket:key`).
    #[must_use]
    pub fn bucket(&self) -> &str {
        self.scope.split(':').next().unwrap_or(&self.scope)
    }

    /// The key portion of `scope`, if `scope` is of the form `bucket:key`.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.scope.split_once(':').map(|(_, key)| key)
    }
}

/// Normalizes a relative `expires` value into an absolute unix deadline.
///
/// Zero means "use the default TTL"; any other value is `now + expires`.
#[must_use]
pub fn normalize_deadline(expires_relative_secs: i64, now_unix: i64) -> i64 {
    if expires_relative_secs == 0 {
        now_unix + DEFAULT_TOKEN_TTL.as_secs() as i64
    } else {
        now_unix + expires_relative_secs
    }
}

/// A parsed upload token: the access key, MAC, and decoded policy.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadToken {
    pub access_key: String,
    pub mac: String,
    pub policy: PutPolicy,
}

/// Parses an upload token of the form `ak:mac:base64url(policy_json)`.
///
/// # Errors
///
/// Returns [`TokenError::MalformedShape`] if the token doesn't split into
/// exactly three `:`-separated parts, [`TokenError::InvalidBase64`] or
/// [`TokenError::InvalidJson`] if the policy segment can't be decoded, and
/// [`TokenError::MissingScope`] if the decoded policy has an empty scope.
pub fn parse_uptoken(token: &str) -> Result<UploadToken, TokenError> {
    let parts: Vec<&str> = token.splitn(3, ':').collect();
    if parts.len() != 3 {
        return Err(TokenError::MalformedShape(parts.len()));
    }
    let policy_bytes = base64url_decode(parts[2])?;
    let policy: PutPolicy = serde_json::from_slice(&policy_bytes)?;
    if policy.scope.is_empty() {
        return Err(TokenError::MissingScope);
    }
    Ok(UploadToken {
        access_key: parts[0].to_string(),
        mac: parts[1].to_string(),
        policy,
    })
}

/// Builds a signed upload token from an access key, secret key, and policy.
///
/// # Errors
///
/// Returns [`TokenError::MissingScope`] if `policy.scope` is empty, or
/// [`TokenError::Sign`] if signing fails.
pub fn build_uptoken(
    access_key: &str,
    secret_key: &[u8],
    policy: &PutPolicy,
) -> Result<String, TokenError> {
    if policy.scope.is_empty() {
        return Err(TokenError::MissingScope);
    }
    let policy_json = serde_json::to_vec(policy)?;
    Ok(sign_with_data(access_key, secret_key, &policy_json)?)
}
