//! File-mode and range-mode download state machines, sharing the generic
//! pool+pin retry driver.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{instrument, warn};

use crate::classify::{DownloadOutcome, classify_download_status, is_transport_error_retryable};
use crate::host::{HostPin, HostPool, HostPoolError};
use crate::retry::{self, RetryError, RetryOutcome};

use super::wire::{self, DownloadWireError};

/// Errors raised by the download engine.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Wire(#[from] DownloadWireError),
    #[error("unexpected status {status} downloading {key}")]
    UnexpectedStatus { status: u16, key: String },
    /// A retryable (5xx) status, carried so the retry driver can classify it
    /// without the engine's internals leaking into `classify.rs`.
    #[error("retryable status {status} downloading {key}")]
    Retryable { status: u16, key: String },
    #[error("response to a range request had no Content-Range header")]
    MissingContentRange,
    #[error("malformed Content-Range header: {0:?}")]
    MalformedContentRange(String),
    #[error("response buffer would exceed available memory")]
    BufferTooLarge,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn classify(err: &DownloadError) -> RetryOutcome {
    match err {
        DownloadError::Retryable { .. } => RetryOutcome::Retry,
        DownloadError::Wire(DownloadWireError::Network { source, .. } | DownloadWireError::Body { source, .. })
            if is_transport_error_retryable(source) =>
        {
            RetryOutcome::Retry
        }
        _ => RetryOutcome::Fatal,
    }
}

fn fixed_backoff(_attempt: u32) -> Duration {
    Duration::from_secs(1)
}

fn classify_or_err(status: u16, key: &str) -> Result<DownloadOutcome, DownloadError> {
    match classify_download_status(status) {
        outcome @ (DownloadOutcome::Success | DownloadOutcome::Retry) => Ok(outcome),
        DownloadOutcome::Fatal => Err(DownloadError::UnexpectedStatus { status, key: key.to_string() }),
    }
}

/// Outcome of a completed file-mode download.
#[derive(Debug)]
pub struct DownloadFileResult {
    pub path: PathBuf,
    pub bytes_downloaded: u64,
    pub resumed: bool,
}

/// Drives `getfile` downloads against a shared host pool/pin.
pub struct DownloadEngine {
    client: Client,
    pool: Arc<HostPool>,
    pin: Arc<HostPin>,
    pin_ttl: Duration,
    access_key: String,
    bucket: String,
    max_attempts: u32,
}

impl DownloadEngine {
    #[must_use]
    pub fn new(
        client: Client,
        pool: Arc<HostPool>,
        pin: Arc<HostPin>,
        pin_ttl: Duration,
        access_key: impl Into<String>,
        bucket: impl Into<String>,
        max_attempts: u32,
    ) -> Self {
        Self {
            client,
            pool,
            pin,
            pin_ttl,
            access_key: access_key.into(),
            bucket: bucket.into(),
            max_attempts,
        }
    }

    /// Downloads `key` into `path`, resuming from the file's current length
    /// via an HTTP `Range` request if it already has content.
    ///
    /// 416 ("Range Not Satisfiable") is treated as "already complete" rather
    /// than an error — it means the local file already holds everything the
    /// server has.
    ///
    /// # Errors
    ///
    /// Returns the host pool's error if it is empty, or the last download
    /// attempt's error if all retries are exhausted.
    #[instrument(skip(self), fields(key))]
    pub async fn download_file(
        &self,
        key: &str,
        path: impl AsRef<Path>,
    ) -> Result<DownloadFileResult, RetryError<DownloadError>> {
        let path = path.as_ref().to_path_buf();
        let key = key.to_string();

        retry::retry(
            &self.pool,
            &self.pin,
            self.pin_ttl,
            self.max_attempts,
            classify,
            fixed_backoff,
            move |host| {
                let client = self.client.clone();
                let path = path.clone();
                let key = key.clone();
                let access_key = self.access_key.clone();
                let bucket = self.bucket.clone();
                async move { download_file_attempt(&client, &host, &access_key, &bucket, &key, &path).await }
            },
        )
        .await
    }

    /// Downloads an explicit byte range (or, with `offset == -1`, the last
    /// `size` bytes) of `key`. Returns the object's total length alongside
    /// the downloaded bytes, appended onto `initial` (whose capacity is
    /// reused but whose prior content is discarded, matching the "caller
    /// supplied initial buffer to reduce allocations" contract — not a
    /// running accumulation across retries).
    ///
    /// # Errors
    ///
    /// Same as [`DownloadEngine::download_file`], plus
    /// [`DownloadError::MissingContentRange`] /
    /// [`DownloadError::MalformedContentRange`] if the server's response
    /// doesn't carry a parseable `Content-Range`.
    #[instrument(skip(self, initial), fields(key, offset, size))]
    pub async fn download_range(
        &self,
        key: &str,
        offset: i64,
        size: u64,
        initial: &[u8],
    ) -> Result<(u64, Vec<u8>), RetryError<DownloadError>> {
        let key = key.to_string();
        let initial = initial.to_vec();

        retry::retry(
            &self.pool,
            &self.pin,
            self.pin_ttl,
            self.max_attempts,
            classify,
            fixed_backoff,
            move |host| {
                let client = self.client.clone();
                let key = key.clone();
                let initial = initial.clone();
                let access_key = self.access_key.clone();
                let bucket = self.bucket.clone();
                async move {
                    download_range_attempt(&client, &host, &access_key, &bucket, &key, offset, size, &initial).await
                }
            },
        )
        .await
    }
}

async fn download_file_attempt(
    client: &Client,
    host: &str,
    access_key: &str,
    bucket: &str,
    key: &str,
    path: &Path,
) -> Result<DownloadFileResult, DownloadError> {
    let mut file = OpenOptions::new().read(true).write(true).create(true).open(path).await?;
    let length = file.seek(std::io::SeekFrom::End(0)).await?;

    let url = wire::download_url(host, access_key, bucket, key);
    let range = (length > 0).then(|| format!("bytes={length}-"));
    let resp = wire::get(client, &url, range.as_deref()).await?;
    let status = resp.status().as_u16();

    match classify_or_err(status, key)? {
        DownloadOutcome::Retry => return Err(DownloadError::Retryable { status, key: key.to_string() }),
        DownloadOutcome::Fatal => unreachable!("classify_or_err converts Fatal to Err"),
        DownloadOutcome::Success if status == 416 => {
            return Ok(DownloadFileResult { path: path.to_path_buf(), bytes_downloaded: length, resumed: length > 0 });
        }
        DownloadOutcome::Success => {}
    }

    let content_length = resp.content_length();
    let mut stream = resp.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| DownloadWireError::Body { url: url.clone(), source })?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    if let Some(expected) = content_length {
        if expected != written {
            warn!(expected, written, "download length did not match Content-Length");
        }
    }
    file.seek(std::io::SeekFrom::Start(0)).await?;

    Ok(DownloadFileResult {
        path: path.to_path_buf(),
        bytes_downloaded: length + written,
        resumed: length > 0,
    })
}

#[allow(clippy::too_many_arguments)]
async fn download_range_attempt(
    client: &Client,
    host: &str,
    access_key: &str,
    bucket: &str,
    key: &str,
    offset: i64,
    size: u64,
    initial: &[u8],
) -> Result<(u64, Vec<u8>), DownloadError> {
    let url = wire::download_url(host, access_key, bucket, key);
    let range = wire::format_range(offset, size);
    let resp = wire::get(client, &url, Some(&range)).await?;
    let status = resp.status().as_u16();

    match classify_or_err(status, key)? {
        DownloadOutcome::Retry => return Err(DownloadError::Retryable { status, key: key.to_string() }),
        DownloadOutcome::Fatal => unreachable!("classify_or_err converts Fatal to Err"),
        DownloadOutcome::Success if status != 206 => {
            return Err(DownloadError::UnexpectedStatus { status, key: key.to_string() });
        }
        DownloadOutcome::Success => {}
    }

    let content_range = resp
        .headers()
        .get(reqwest::header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .ok_or(DownloadError::MissingContentRange)?
        .to_string();
    let total = parse_total_length(&content_range)?;

    let mut buf = Vec::new();
    buf.try_reserve(initial.len()).map_err(|_| DownloadError::BufferTooLarge)?;
    buf.extend_from_slice(initial);

    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|source| DownloadWireError::Body { url: url.clone(), source })?;
        buf.try_reserve(chunk.len()).map_err(|_| DownloadError::BufferTooLarge)?;
        buf.extend_from_slice(&chunk);
    }

    Ok((total, buf))
}

fn parse_total_length(content_range: &str) -> Result<u64, DownloadError> {
    let (_, total) = content_range
        .rsplit_once('/')
        .ok_or_else(|| DownloadError::MalformedContentRange(content_range.to_string()))?;
    total.trim().parse().map_err(|_| DownloadError::MalformedContentRange(content_range.to_string()))
}
