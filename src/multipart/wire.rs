//! Wire-level request/response shapes and URL construction for the v2 multipart API.

use std::collections::HashMap;

use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sign::base64url_encode;

/// Errors raised constructing or performing a v2 multipart wire call.
#[derive(Debug, Error)]
pub enum MultipartWireError {
    /// The HTTP request itself could not be sent or the response could not be read.
    #[error("network error calling {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// The response body was not valid JSON for the expected type.
    #[error("invalid JSON response from {url}: {source}")]
    InvalidJson {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Response body from `initParts`.
#[derive(Debug, Clone, Deserialize)]
pub struct InitPartsResponse {
    #[serde(rename = "uploadId")]
    pub upload_id: String,
    #[serde(rename = "suggestedPartSize")]
    pub suggested_part_size: u64,
}

/// Response body from `uploadPart`.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadPartResponse {
    pub etag: String,
    pub md5: String,
}

/// One entry in the `completeParts` request body.
#[derive(Debug, Clone, Serialize)]
pub struct PartInfo {
    #[serde(rename = "partNumber")]
    pub part_number: u32,
    pub etag: String,
}

/// Request body for `completeParts`.
#[derive(Debug, Clone, Serialize)]
pub struct CompletePartsRequest {
    pub parts: Vec<PartInfo>,
    pub fname: String,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    #[serde(rename = "customVars", skip_serializing_if = "HashMap::is_empty")]
    pub custom_vars: HashMap<String, String>,
}

/// Response body from a successful `completeParts`.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletePartsResponse {
    pub hash: String,
    pub key: String,
}

/// The key-segment used in a v2 multipart URL path.
///
/// The server treats `has_key=false` inconsistently across endpoints:
/// `init`/`uploadPart`/`deleteParts` expect the base64 of an empty string
/// (i.e. an empty path segment), while `completeParts` expects the literal
/// `~`. Both are reproduced here rather than unified, since this crate's job
/// is to match the wire protocol the server actually expects.
#[must_use]
pub fn key_segment(has_key: bool, key: &str, tilde_if_keyless: bool) -> String {
    if has_key {
        base64url_encode(key.as_bytes())
    } else if tilde_if_keyless {
        "~".to_string()
    } else {
        String::new()
    }
}

fn uploads_prefix(host: &str, bucket: &str, key_seg: &str) -> String {
    format!("{host}/buckets/{bucket}/objects/{key_seg}/uploads")
}

#[must_use]
pub fn init_parts_url(host: &str, bucket: &str, key_seg: &str) -> String {
    uploads_prefix(host, bucket, key_seg)
}

#[must_use]
pub fn upload_part_url(
    host: &str,
    bucket: &str,
    key_seg: &str,
    upload_id: &str,
    part_number: u32,
) -> String {
    format!("{}/{upload_id}/{part_number}", uploads_prefix(host, bucket, key_seg))
}

#[must_use]
pub fn complete_or_delete_parts_url(
    host: &str,
    bucket: &str,
    key_seg: &str,
    upload_id: &str,
) -> String {
    format!("{}/{upload_id}", uploads_prefix(host, bucket, key_seg))
}

/// Calls `initParts`, allocating an `upload_id`.
///
/// # Errors
///
/// Returns [`MultipartWireError`] on transport failure or a non-2xx response.
pub async fn init_parts(
    client: &Client,
    host: &str,
    bucket: &str,
    key_seg: &str,
    token: &str,
) -> Result<InitPartsResponse, HttpOutcome<InitPartsResponse>> {
    let url = init_parts_url(host, bucket, key_seg);
    send_json(client.post(&url), &url, token).await
}

/// Calls `uploadPart`, uploading one part's bytes.
///
/// Returns the raw status alongside a parsed body (when parseable), since
/// the engine's retry classification needs the status code even on
/// nominally-erroneous (4xx/5xx) responses.
pub async fn upload_part(
    client: &Client,
    host: &str,
    bucket: &str,
    key_seg: &str,
    upload_id: &str,
    part_number: u32,
    token: &str,
    body: bytes::Bytes,
) -> Result<(u16, Option<UploadPartResponse>), MultipartWireError> {
    let url = upload_part_url(host, bucket, key_seg, upload_id, part_number);
    let resp = client
        .put(&url)
        .header(AUTHORIZATION, format!("UpToken {token}"))
        .header("Content-Type", "application/octet-stream")
        .body(body)
        .send()
        .await
        .map_err(|source| MultipartWireError::Network {
            url: url.clone(),
            source,
        })?;
    let status = resp.status().as_u16();
    if resp.status().is_success() {
        let parsed = resp
            .json::<UploadPartResponse>()
            .await
            .map_err(|source| MultipartWireError::InvalidJson {
                url: url.clone(),
                source,
            })?;
        Ok((status, Some(parsed)))
    } else {
        Ok((status, None))
    }
}

/// Calls `completeParts`, committing the parts list.
///
/// Returns the raw status alongside the parsed success body, for the same
/// reason as [`upload_part`]: 612/614/579 are not transport failures, they're
/// status codes the commit-retry loop must inspect.
pub async fn complete_parts(
    client: &Client,
    host: &str,
    bucket: &str,
    key_seg: &str,
    upload_id: &str,
    token: &str,
    body: &CompletePartsRequest,
) -> Result<(u16, Option<CompletePartsResponse>), MultipartWireError> {
    let url = complete_or_delete_parts_url(host, bucket, key_seg, upload_id);
    let resp = client
        .post(&url)
        .header(AUTHORIZATION, format!("UpToken {token}"))
        .json(body)
        .send()
        .await
        .map_err(|source| MultipartWireError::Network {
            url: url.clone(),
            source,
        })?;
    let status = resp.status().as_u16();
    if resp.status().is_success() {
        let parsed = resp.json::<CompletePartsResponse>().await.map_err(|source| {
            MultipartWireError::InvalidJson {
                url: url.clone(),
                source,
            }
        })?;
        Ok((status, Some(parsed)))
    } else {
        Ok((status, None))
    }
}

/// Calls `deleteParts`, aborting and cleaning up an in-flight upload.
pub async fn delete_parts(
    client: &Client,
    host: &str,
    bucket: &str,
    key_seg: &str,
    upload_id: &str,
    token: &str,
) -> Result<u16, MultipartWireError> {
    let url = complete_or_delete_parts_url(host, bucket, key_seg, upload_id);
    let resp = client
        .delete(&url)
        .header(AUTHORIZATION, format!("UpToken {token}"))
        .send()
        .await
        .map_err(|source| MultipartWireError::Network {
            url: url.clone(),
            source,
        })?;
    Ok(resp.status().as_u16())
}

/// A non-2xx response to a call that has no retryable-status contract of its
/// own (currently only `initParts`, whose failures propagate immediately
/// rather than entering a per-status retry loop).
#[derive(Debug, Error)]
pub enum HttpOutcome<T> {
    #[error(transparent)]
    Wire(#[from] MultipartWireError),
    #[error("unexpected status {status}")]
    UnexpectedStatus { status: u16, _marker: std::marker::PhantomData<T> },
}

async fn send_json<T: for<'de> Deserialize<'de>>(
    builder: reqwest::RequestBuilder,
    url: &str,
    token: &str,
) -> Result<T, HttpOutcome<T>> {
    let resp = builder
        .header(AUTHORIZATION, format!("UpToken {token}"))
        .send()
        .await
        .map_err(|source| MultipartWireError::Network {
            url: url.to_string(),
            source,
        })?;
    let status = resp.status();
    if !status.is_success() {
        return Err(HttpOutcome::UnexpectedStatus {
            status: status.as_u16(),
            _marker: std::marker::PhantomData,
        });
    }
    resp.json::<T>()
        .await
        .map_err(|source| HttpOutcome::Wire(MultipartWireError::InvalidJson {
            url: url.to_string(),
            source,
        }))
}
