//! Wire-level request/response shapes for the legacy (v1) block-upload API.

use std::collections::HashMap;

use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use thiserror::Error;

use crate::sign::base64url_encode;

/// Errors raised performing a v1 block-upload wire call.
#[derive(Debug, Error)]
pub enum ResumableWireError {
    #[error("network error calling {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid JSON response from {url}: {source}")]
    InvalidJson {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Per-block server-side state, echoed back by `mkblk`/`bput` and threaded
/// through a [`crate::resumable::BlockProgress`] for resume.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlkputRet {
    pub ctx: String,
    pub checksum: String,
    pub crc32: u32,
    pub offset: u64,
    pub host: String,
    /// Unix-seconds expiry of `ctx`, echoed by the server. The engine itself
    /// never checks this proactively — an expired ctx simply surfaces as
    /// `InvalidCtx` on the next `bput` — but it's threaded through so a
    /// caller persisting `progresses` across calls can decide to restart a
    /// block early instead of waiting for a wasted round trip.
    #[serde(rename = "expired_at", default)]
    pub expired_at: i64,
}

/// Outcome of an `mkblk`/`bput` call: the raw status alongside a parsed body
/// (when parseable), since `InvalidCtx` (4xx) is a protocol signal the block
/// loop must inspect, not a transport failure.
pub type BlockCallResult = Result<(u16, Option<BlkputRet>), ResumableWireError>;

fn mkblk_url(host: &str, block_size: u64) -> String {
    format!("{host}/mkblk/{block_size}")
}

fn bput_url(ret_host: &str, ctx: &str, offset: u64) -> String {
    format!("{ret_host}/bput/{ctx}/{offset}")
}

/// Calls `mkblk`, creating a new block from its first chunk.
///
/// # Errors
///
/// Returns [`ResumableWireError`] on transport failure or an unparseable
/// (but successful) JSON body. Non-2xx statuses are returned as `Ok` with
/// `None` so the block loop can classify them (in particular `InvalidCtx`).
pub async fn mkblk(
    client: &Client,
    host: &str,
    block_size: u64,
    token: &str,
    body: bytes::Bytes,
) -> BlockCallResult {
    let url = mkblk_url(host, block_size);
    post_chunk(client, &url, token, body).await
}

/// Calls `bput`, appending a chunk to an in-progress block.
///
/// # Errors
///
/// Same contract as [`mkblk`].
pub async fn bput(
    client: &Client,
    ret_host: &str,
    ctx: &str,
    offset: u64,
    token: &str,
    body: bytes::Bytes,
) -> BlockCallResult {
    let url = bput_url(ret_host, ctx, offset);
    post_chunk(client, &url, token, body).await
}

async fn post_chunk(client: &Client, url: &str, token: &str, body: bytes::Bytes) -> BlockCallResult {
    let resp = client
        .post(url)
        .header(AUTHORIZATION, format!("UpToken {token}"))
        .header("Content-Type", "application/octet-stream")
        .body(body)
        .send()
        .await
        .map_err(|source| ResumableWireError::Network {
            url: url.to_string(),
            source,
        })?;
    let status = resp.status().as_u16();
    if resp.status().is_success() {
        let parsed = resp
            .json::<BlkputRet>()
            .await
            .map_err(|source| ResumableWireError::InvalidJson {
                url: url.to_string(),
                source,
            })?;
        Ok((status, Some(parsed)))
    } else {
        Ok((status, None))
    }
}

/// Builds the `mkfile` URL path, including the optional `mimeType`/`key`
/// segments and arbitrary caller params, `x-qn-meta-` entries last.
///
/// Mirrors `resumable_base.go`'s `mkfile` URL assembly exactly, including
/// the ordering (`mimeType`, then `key`, then `params`, then `x-qn-meta-*`).
#[must_use]
pub fn mkfile_url(
    host: &str,
    fsize: u64,
    mime_type: Option<&str>,
    key: Option<&str>,
    params: &HashMap<String, String>,
    x_meta: &HashMap<String, String>,
) -> String {
    let mut url = format!("{host}/mkfile/{fsize}");
    if let Some(mime) = mime_type {
        url.push_str("/mimeType/");
        url.push_str(&base64url_encode(mime.as_bytes()));
    }
    if let Some(key) = key {
        url.push_str("/key/");
        url.push_str(&base64url_encode(key.as_bytes()));
    }
    for (k, v) in params {
        url.push('/');
        url.push_str(k);
        url.push('/');
        url.push_str(&base64url_encode(v.as_bytes()));
    }
    for (k, v) in x_meta {
        url.push_str("/x-qn-meta-");
        url.push_str(k);
        url.push('/');
        url.push_str(&base64url_encode(v.as_bytes()));
    }
    url
}

/// Calls `mkfile`, committing the block contexts into a finished object.
///
/// The body is the per-block context ids joined by commas, no trailing comma.
///
/// # Errors
///
/// Returns [`ResumableWireError`] on transport failure or an unparseable
/// (but successful) JSON body. Non-2xx is surfaced as `Ok((status, None))`.
pub async fn mkfile(
    client: &Client,
    url: &str,
    token: &str,
    ctxs: &[String],
) -> Result<(u16, Option<MkfileResponse>), ResumableWireError> {
    let body = ctxs.join(",");
    let resp = client
        .post(url)
        .header(AUTHORIZATION, format!("UpToken {token}"))
        .header("Content-Type", "application/octet-stream")
        .body(body)
        .send()
        .await
        .map_err(|source| ResumableWireError::Network {
            url: url.to_string(),
            source,
        })?;
    let status = resp.status().as_u16();
    if resp.status().is_success() {
        let parsed = resp
            .json::<MkfileResponse>()
            .await
            .map_err(|source| ResumableWireError::InvalidJson {
                url: url.to_string(),
                source,
            })?;
        Ok((status, Some(parsed)))
    } else {
        Ok((status, None))
    }
}

/// Response body from a successful `mkfile`.
#[derive(Debug, Clone, Deserialize)]
pub struct MkfileResponse {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mkblk_url_shape() {
        assert_eq!(mkblk_url("https://host", 1 << 22), "https://host/mkblk/4194304");
    }

    #[test]
    fn bput_url_shape() {
        assert_eq!(bput_url("https://host", "ctx123", 1024), "https://host/bput/ctx123/1024");
    }

    #[test]
    fn mkfile_url_includes_mime_and_key_in_order() {
        let url = mkfile_url("https://host", 100, Some("text/plain"), Some("my/key"), &HashMap::new(), &HashMap::new());
        assert_eq!(
            url,
            format!(
                "https://host/mkfile/100/mimeType/{}/key/{}",
                base64url_encode(b"text/plain"),
                base64url_encode(b"my/key")
            )
        );
    }

    #[test]
    fn mkfile_url_without_key_omits_key_segment() {
        let url = mkfile_url("https://host", 100, None, None, &HashMap::new(), &HashMap::new());
        assert_eq!(url, "https://host/mkfile/100");
    }
}
