//! Wire-level request construction for the `getfile` download endpoint.

use reqwest::Client;
use reqwest::header::{ACCEPT_ENCODING, RANGE};
use thiserror::Error;

/// Errors raised performing a download wire call.
#[derive(Debug, Error)]
pub enum DownloadWireError {
    #[error("network error downloading {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("error reading response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Builds the `getfile` URL, stripping a single leading `/` from `key` as
/// the original client does (a leading slash would otherwise double up with
/// the path separator already in the URL template).
#[must_use]
pub fn download_url(host: &str, access_key: &str, bucket: &str, key: &str) -> String {
    let key = key.strip_prefix('/').unwrap_or(key);
    format!("{host}/getfile/{access_key}/{bucket}/{key}")
}

/// Formats a `Range` header value: `bytes=-<size>` for a suffix range
/// (`offset == -1`), otherwise `bytes=<offset>-<offset+size-1>`.
#[must_use]
pub fn format_range(offset: i64, size: u64) -> String {
    if offset == -1 {
        format!("bytes=-{size}")
    } else {
        #[allow(clippy::cast_possible_wrap)]
        let end = offset + size as i64 - 1;
        format!("bytes={offset}-{end}")
    }
}

/// Issues the download GET, with an optional `Range` header.
///
/// Sends `Accept-Encoding: identity` so the reported `Content-Length`/
/// `Content-Range` match the raw bytes on the wire, matching the original
/// client's `Accept-Encoding: ""` (which, in Rust, is better expressed as an
/// explicit `identity` than an empty header value).
///
/// # Errors
///
/// Returns [`DownloadWireError::Network`] if the request cannot be sent.
pub async fn get(client: &Client, url: &str, range: Option<&str>) -> Result<reqwest::Response, DownloadWireError> {
    let mut builder = client.get(url).header(ACCEPT_ENCODING, "identity");
    if let Some(range) = range {
        builder = builder.header(RANGE, range);
    }
    builder.send().await.map_err(|source| DownloadWireError::Network {
        url: url.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_url_strips_one_leading_slash() {
        assert_eq!(
            download_url("https://host", "ak", "bucket", "/a/b.txt"),
            "https://host/getfile/ak/bucket/a/b.txt"
        );
    }

    #[test]
    fn download_url_without_leading_slash_is_unchanged() {
        assert_eq!(
            download_url("https://host", "ak", "bucket", "a/b.txt"),
            "https://host/getfile/ak/bucket/a/b.txt"
        );
    }

    #[test]
    fn format_range_suffix() {
        assert_eq!(format_range(-1, 100), "bytes=-100");
    }

    #[test]
    fn format_range_explicit() {
        assert_eq!(format_range(10, 100), "bytes=10-109");
    }
}
