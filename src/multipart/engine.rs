//! The v2 multipart state machine: random-access, serial-stream, and
//! data-channel upload variants sharing one per-part retry loop.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use md5::{Digest, Md5};
use rand::Rng;
use reqwest::Client;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{instrument, warn};

use crate::cancel::{self, CancelToken};
use crate::classify::{CompleteOutcome, UploadRetryClass, classify_complete_parts_status, classify_upload_status};
use crate::constants::{COMPLETE_PARTS_RETRY_TIMES, DELETE_PARTS_RETRY_TIMES, MIN_PART_SIZE, UPLOAD_PART_RETRY_TIMES};
use crate::host::{HostPin, HostPool, HostPoolError};
use crate::limiter::PartLimiter;
use crate::sign::token::{TokenError, parse_uptoken};

use super::wire::{self, CompletePartsRequest, HttpOutcome, MultipartWireError, PartInfo};
use super::{MultipartUploadConfig, MultipartUploadResult};

/// A random-access byte source the engine reads fixed-size sections from.
///
/// Implemented by callers over whatever backs their upload (a file, a
/// memory-mapped region, ...); this crate only needs range reads and a total
/// size, mirroring the abstract `io.ReaderAt` the original engine carves
/// section readers out of.
#[async_trait]
pub trait PartSource: Send + Sync {
    /// Reads exactly `len` bytes starting at `offset`.
    async fn read_range(&self, offset: u64, len: u64) -> std::io::Result<Bytes>;
    /// Total size of the source.
    fn size(&self) -> u64;
}

/// One part arriving on the bounded channel consumed by [`MultipartEngine::upload_with_data_chan`].
pub struct PartData {
    pub data: Bytes,
    pub size: u64,
    /// Invoked exactly once by whichever worker consumes this part, on every
    /// exit path (success, error, or cancellation).
    pub finish: Box<dyn FnOnce() + Send>,
}

impl std::fmt::Debug for PartData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartData").field("size", &self.size).finish_non_exhaustive()
    }
}

/// Errors raised by the v2 multipart engine.
#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("can't upload empty file")]
    EmptyFile,
    #[error("sum of explicit upload part sizes does not equal fsize")]
    PartSizeMismatch,
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Pool(#[from] HostPoolError),
    #[error(transparent)]
    Wire(#[from] MultipartWireError),
    #[error("unexpected status {status} from {operation}")]
    UnexpectedStatus { status: u16, operation: &'static str },
    #[error("uploaded part MD5 did not match the server's echo")]
    Md5Mismatch,
    #[error("upload cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn http_outcome_into<T>(outcome: HttpOutcome<T>, operation: &'static str) -> MultipartError {
    match outcome {
        HttpOutcome::Wire(w) => MultipartError::Wire(w),
        HttpOutcome::UnexpectedStatus { status, .. } => MultipartError::UnexpectedStatus { status, operation },
    }
}

/// Computes part sizes: explicit sizes if the caller supplied them (must sum
/// to `fsize`), otherwise uniform `part_size` chunks with the remainder as
/// the last part.
fn plan_part_sizes(
    fsize: u64,
    part_size: u64,
    explicit: Option<&[u64]>,
) -> Result<Vec<u64>, MultipartError> {
    if let Some(sizes) = explicit {
        let sum: u64 = sizes.iter().sum();
        if sum != fsize {
            return Err(MultipartError::PartSizeMismatch);
        }
        return Ok(sizes.to_vec());
    }
    let part_size = part_size.max(MIN_PART_SIZE);
    let mut sizes = Vec::new();
    let mut remaining = fsize;
    while remaining > 0 {
        let chunk = remaining.min(part_size);
        sizes.push(chunk);
        remaining -= chunk;
    }
    Ok(sizes)
}

/// Drives the v2 multipart state machine against a chosen host pool/pin.
pub struct MultipartEngine {
    client: Client,
    pool: Arc<HostPool>,
    pin: Arc<HostPin>,
    pin_ttl: Duration,
}

impl MultipartEngine {
    /// Builds an engine over a shared host pool and pin.
    #[must_use]
    pub fn new(client: Client, pool: Arc<HostPool>, pin: Arc<HostPin>, pin_ttl: Duration) -> Self {
        Self {
            client,
            pool,
            pin,
            pin_ttl,
        }
    }

    async fn select_host(&self) -> Result<String, HostPoolError> {
        match self.pin.unpin() {
            Some(host) => Ok(host),
            None => self.pool.select().await,
        }
    }

    /// Uploads a bounded-size random-access source in parallel parts.
    ///
    /// `key` is the destination object key, independent of whatever the
    /// upload token's `scope` encodes; `None` uploads keyless (server assigns
    /// one). Only `bucket` is derived from the token, per spec.
    ///
    /// # Errors
    ///
    /// [`MultipartError::EmptyFile`] if `fsize == 0`;
    /// [`MultipartError::PartSizeMismatch`] if `config.upload_parts` doesn't
    /// sum to `fsize`; wire/status errors if `initParts` or the commit fail;
    /// the first fatal part error if any part worker hits a non-retryable
    /// status.
    #[instrument(skip(self, source), fields(fsize))]
    pub async fn upload(
        &self,
        source: Arc<dyn PartSource>,
        fsize: u64,
        token: &str,
        key: Option<&str>,
        config: &MultipartUploadConfig,
    ) -> Result<MultipartUploadResult, MultipartError> {
        if fsize == 0 {
            return Err(MultipartError::EmptyFile);
        }
        let parsed = parse_uptoken(token)?;
        let bucket = parsed.policy.bucket().to_string();
        let has_key = key.is_some();
        let key = key.unwrap_or("").to_string();

        let part_sizes = plan_part_sizes(fsize, config.part_size, config.upload_parts.as_deref())?;

        let host = self.select_host().await?;
        let init_key_seg = wire::key_segment(has_key, &key, false);
        let init = wire::init_parts(&self.client, &host, &bucket, &init_key_seg, token)
            .await
            .map_err(|e| http_outcome_into(e, "initParts"))?;
        self.pin.pin(host, self.pin_ttl);
        let upload_id = init.upload_id;

        let (cancel_handle, cancel_token) = cancel::pair();
        let fatal: Arc<StdMutex<Option<MultipartError>>> = Arc::new(StdMutex::new(None));
        let limiter = PartLimiter::new(config.concurrency);

        let mut join_set = JoinSet::new();
        let mut offset = 0u64;
        for (i, &size) in part_sizes.iter().enumerate() {
            if cancel_token.is_cancelled() {
                break;
            }
            let Ok(permit) = limiter.acquire_owned().await else {
                break;
            };
            let part_number = (i + 1) as u32;
            let client = self.client.clone();
            let pool = Arc::clone(&self.pool);
            let bucket = bucket.clone();
            let key_seg = wire::key_segment(has_key, &key, false);
            let upload_id = upload_id.clone();
            let token = token.to_string();
            let fatal = Arc::clone(&fatal);
            let cancel_handle = cancel_handle.clone();
            let mut cancel_token = cancel_token.clone();
            let source = Arc::clone(&source);
            let part_offset = offset;

            join_set.spawn(async move {
                let _permit = permit;
                let body = match source.read_range(part_offset, size).await {
                    Ok(b) => b,
                    Err(e) => {
                        record_fatal(&fatal, &cancel_handle, MultipartError::Io(e));
                        return None;
                    }
                };
                match upload_one_part(
                    &client,
                    &pool,
                    &bucket,
                    &key_seg,
                    &upload_id,
                    &token,
                    part_number,
                    body,
                    &mut cancel_token,
                    false,
                )
                .await
                {
                    Ok(info) => Some(info),
                    Err(MultipartError::Cancelled) => None,
                    Err(err) => {
                        record_fatal(&fatal, &cancel_handle, err);
                        None
                    }
                }
            });
            offset += size;
        }

        let mut parts_out = Vec::with_capacity(part_sizes.len());
        while let Some(joined) = join_set.join_next().await {
            if let Ok(Some(info)) = joined {
                parts_out.push(info);
            }
        }

        if let Some(err) = take_fatal(&fatal) {
            self.cleanup_delete(&bucket, &key, has_key, &upload_id, token).await;
            return Err(err);
        }

        parts_out.sort_by_key(|p| p.part_number);
        self.commit(&bucket, &key, has_key, &upload_id, token, parts_out, config).await
    }

    /// Uploads a plain (non-seekable) stream serially, carving it into
    /// `config.part_size` chunks in order. No worker pool: parts are
    /// uploaded one at a time in the order they're read.
    ///
    /// `key` is the destination object key, independent of the upload
    /// token's `scope`; `None` uploads keyless.
    ///
    /// # Errors
    ///
    /// Same as [`MultipartEngine::upload`], plus I/O errors reading `reader`.
    pub async fn stream_upload<R>(
        &self,
        mut reader: R,
        token: &str,
        key: Option<&str>,
        config: &MultipartUploadConfig,
    ) -> Result<MultipartUploadResult, MultipartError>
    where
        R: tokio::io::AsyncRead + Unpin + Send,
    {
        use tokio::io::AsyncReadExt;

        let parsed = parse_uptoken(token)?;
        let bucket = parsed.policy.bucket().to_string();
        let has_key = key.is_some();
        let key = key.unwrap_or("").to_string();

        let host = self.select_host().await?;
        let init_key_seg = wire::key_segment(has_key, &key, false);
        let init = wire::init_parts(&self.client, &host, &bucket, &init_key_seg, token)
            .await
            .map_err(|e| http_outcome_into(e, "initParts"))?;
        self.pin.pin(host, self.pin_ttl);
        let upload_id = init.upload_id;

        let part_size = config.part_size.max(MIN_PART_SIZE);
        let (_cancel_handle, mut cancel_token) = cancel::pair();
        let mut parts_out = Vec::new();
        let mut part_number = 1u32;

        loop {
            #[allow(clippy::cast_possible_truncation)]
            let mut buf = vec![0u8; part_size as usize];
            let mut filled = 0usize;
            while filled < buf.len() {
                let n = reader.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                if part_number == 1 {
                    return Err(MultipartError::EmptyFile);
                }
                break;
            }
            buf.truncate(filled);
            let key_seg = wire::key_segment(has_key, &key, false);
            let info = upload_one_part(
                &self.client,
                &self.pool,
                &bucket,
                &key_seg,
                &upload_id,
                token,
                part_number,
                Bytes::from(buf),
                &mut cancel_token,
                false,
            )
            .await?;
            parts_out.push(info);
            part_number += 1;
            if filled < part_size as usize {
                break; // short read: end of stream
            }
        }

        self.commit(&bucket, &key, has_key, &upload_id, token, parts_out, config).await
    }

    /// Uploads parts arriving on a bounded channel, in parallel.
    ///
    /// Part numbers are assigned monotonically by consumption order (not by
    /// arrival order at the channel's sender, since multiple workers race to
    /// receive). `parts[]` is appended under a lock and sorted once after all
    /// workers join, rather than written at a fixed index — there is no
    /// index to write to until a part is actually consumed.
    ///
    /// `key` is the destination object key, independent of the upload
    /// token's `scope`; `None` uploads keyless.
    ///
    /// # Errors
    ///
    /// Same as [`MultipartEngine::upload`].
    pub async fn upload_with_data_chan(
        &self,
        rx: mpsc::Receiver<PartData>,
        token: &str,
        key: Option<&str>,
        config: &MultipartUploadConfig,
    ) -> Result<MultipartUploadResult, MultipartError> {
        let parsed = parse_uptoken(token)?;
        let bucket = parsed.policy.bucket().to_string();
        let has_key = key.is_some();
        let key = key.unwrap_or("").to_string();

        let host = self.select_host().await?;
        let init_key_seg = wire::key_segment(has_key, &key, false);
        let init = wire::init_parts(&self.client, &host, &bucket, &init_key_seg, token)
            .await
            .map_err(|e| http_outcome_into(e, "initParts"))?;
        self.pin.pin(host, self.pin_ttl);
        let upload_id = init.upload_id;

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let part_counter = Arc::new(AtomicU32::new(1));
        let parts: Arc<StdMutex<Vec<PartInfo>>> = Arc::new(StdMutex::new(Vec::new()));
        let fatal: Arc<StdMutex<Option<MultipartError>>> = Arc::new(StdMutex::new(None));
        let (cancel_handle, cancel_token) = cancel::pair();

        let mut join_set = JoinSet::new();
        for _ in 0..config.concurrency.max(1) {
            let client = self.client.clone();
            let pool = Arc::clone(&self.pool);
            let rx = Arc::clone(&rx);
            let part_counter = Arc::clone(&part_counter);
            let parts = Arc::clone(&parts);
            let fatal = Arc::clone(&fatal);
            let cancel_handle = cancel_handle.clone();
            let mut cancel_token = cancel_token.clone();
            let bucket = bucket.clone();
            let key = key.clone();
            let upload_id = upload_id.clone();
            let token = token.to_string();

            join_set.spawn(async move {
                loop {
                    if cancel_token.is_cancelled() {
                        return;
                    }
                    let mut cancel_for_select = cancel_token.clone();
                    let next = {
                        let mut guard = rx.lock().await;
                        tokio::select! {
                            () = cancel_for_select.cancelled() => None,
                            item = guard.recv() => item,
                        }
                    };
                    let Some(part) = next else { return };
                    let PartData { data, finish, .. } = part;
                    let part_number = part_counter.fetch_add(1, Ordering::SeqCst);
                    let key_seg = wire::key_segment(has_key, &key, false);
                    let result = upload_one_part(
                        &client,
                        &pool,
                        &bucket,
                        &key_seg,
                        &upload_id,
                        &token,
                        part_number,
                        data,
                        &mut cancel_token,
                        true,
                    )
                    .await;
                    finish();
                    match result {
                        Ok(info) => {
                            parts
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push(info);
                        }
                        Err(MultipartError::Cancelled) => {}
                        Err(err) => record_fatal(&fatal, &cancel_handle, err),
                    }
                }
            });
        }

        while join_set.join_next().await.is_some() {}

        if let Some(err) = take_fatal(&fatal) {
            self.cleanup_delete(&bucket, &key, has_key, &upload_id, token).await;
            return Err(err);
        }

        let mut parts_out = Arc::try_unwrap(parts)
            .map(|m| m.into_inner().unwrap_or_default())
            .unwrap_or_default();
        parts_out.sort_by_key(|p| p.part_number);
        self.commit(&bucket, &key, has_key, &upload_id, token, parts_out, config).await
    }

    async fn commit(
        &self,
        bucket: &str,
        key: &str,
        has_key: bool,
        upload_id: &str,
        token: &str,
        parts: Vec<PartInfo>,
        config: &MultipartUploadConfig,
    ) -> Result<MultipartUploadResult, MultipartError> {
        let key_seg = wire::key_segment(has_key, key, true);
        let metadata = config
            .metadata
            .iter()
            .map(|(k, v)| (format!("x-qn-meta-{k}"), v.clone()))
            .collect();
        let body = CompletePartsRequest {
            parts: parts.clone(),
            fname: config.fname.clone(),
            mime_type: config.mime_type.clone(),
            metadata,
            custom_vars: config.custom_vars.clone(),
        };

        let mut tries = COMPLETE_PARTS_RETRY_TIMES;
        loop {
            let host = self.select_host().await?;
            match wire::complete_parts(&self.client, &host, bucket, &key_seg, upload_id, token, &body).await {
                Ok((status, Some(resp))) if (200..300).contains(&status) => {
                    self.pin.pin(host, self.pin_ttl);
                    return Ok(MultipartUploadResult {
                        hash: resp.hash,
                        key: resp.key,
                        upload_id: upload_id.to_string(),
                        parts,
                    });
                }
                Ok((status, _)) => match classify_complete_parts_status(status) {
                    CompleteOutcome::Benign => {
                        self.pin.pin(host, self.pin_ttl);
                        return Ok(MultipartUploadResult {
                            hash: String::new(),
                            key: key.to_string(),
                            upload_id: upload_id.to_string(),
                            parts,
                        });
                    }
                    CompleteOutcome::Fatal => {
                        return Err(MultipartError::UnexpectedStatus { status, operation: "completeParts" });
                    }
                    CompleteOutcome::Retry => {
                        self.pool.punish(&host).await;
                        tries = tries.saturating_sub(1);
                        if tries == 0 {
                            return Err(MultipartError::UnexpectedStatus { status, operation: "completeParts" });
                        }
                        tokio::time::sleep(Duration::from_secs(3)).await;
                    }
                },
                Err(err) => {
                    self.pool.punish(&host).await;
                    tries = tries.saturating_sub(1);
                    if tries == 0 {
                        return Err(err.into());
                    }
                    tokio::time::sleep(Duration::from_secs(3)).await;
                }
            }
        }
    }

    async fn cleanup_delete(&self, bucket: &str, key: &str, has_key: bool, upload_id: &str, token: &str) {
        let key_seg = wire::key_segment(has_key, key, false);
        let mut tries = DELETE_PARTS_RETRY_TIMES;
        loop {
            let Ok(host) = self.select_host().await else { return };
            match wire::delete_parts(&self.client, &host, bucket, &key_seg, upload_id, token).await {
                Ok(status) if (200..300).contains(&status) => return,
                Ok(status) if status / 100 == 4 => {
                    warn!(status, "deleteParts returned a client error, abandoning cleanup");
                    return;
                }
                Ok(status) => {
                    warn!(status, "deleteParts failed, retrying cleanup");
                    tries = tries.saturating_sub(1);
                    if tries == 0 {
                        return;
                    }
                    tokio::time::sleep(Duration::from_secs(3)).await;
                }
                Err(err) => {
                    warn!(%err, "deleteParts network error, retrying cleanup");
                    tries = tries.saturating_sub(1);
                    if tries == 0 {
                        return;
                    }
                    tokio::time::sleep(Duration::from_secs(3)).await;
                }
            }
        }
    }
}

fn record_fatal(
    fatal: &StdMutex<Option<MultipartError>>,
    cancel_handle: &cancel::CancelHandle,
    err: MultipartError,
) {
    let mut slot = fatal.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.is_none() {
        *slot = Some(err);
        cancel_handle.cancel();
    }
}

fn take_fatal(fatal: &StdMutex<Option<MultipartError>>) -> Option<MultipartError> {
    fatal.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Uploads a single part with the shared per-part retry loop.
///
/// `queue_variant` selects the data-channel variant's behavior: 504 is
/// treated as a second rate-limit signal (like 509), and the non-rate-limit
/// retryable backoff is 1s instead of 3s. Both are carried over verbatim
/// from the two variants' observed (and possibly divergent) tuning rather
/// than unified — see `DESIGN.md`.
#[allow(clippy::too_many_arguments)]
async fn upload_one_part(
    client: &Client,
    pool: &HostPool,
    bucket: &str,
    key_seg: &str,
    upload_id: &str,
    token: &str,
    part_number: u32,
    body: Bytes,
    cancel_token: &mut CancelToken,
    queue_variant: bool,
) -> Result<PartInfo, MultipartError> {
    let local_md5 = format!("{:x}", Md5::digest(&body));
    let mut try_times = UPLOAD_PART_RETRY_TIMES;

    loop {
        if cancel_token.is_cancelled() {
            return Err(MultipartError::Cancelled);
        }
        let host = pool.select().await?;

        let mut cancel_for_select = cancel_token.clone();
        let attempt = tokio::select! {
            () = cancel_for_select.cancelled() => return Err(MultipartError::Cancelled),
            result = wire::upload_part(client, &host, bucket, key_seg, upload_id, part_number, token, body.clone()) => result,
        };

        match attempt {
            Ok((status, Some(resp))) if (200..300).contains(&status) => {
                if resp.md5 != local_md5 {
                    // A checksum mismatch is retryable, same as the Go original's
                    // 406-coded ErrMd5NotMatch: punish and retry with backoff,
                    // only surfacing the error once try_times is exhausted.
                    pool.punish(&host).await;
                    if try_times <= 1 {
                        return Err(MultipartError::Md5Mismatch);
                    }
                    try_times -= 1;
                    let backoff = if queue_variant { Duration::from_secs(1) } else { Duration::from_secs(3) };
                    tokio::time::sleep(backoff).await;
                } else {
                    return Ok(PartInfo { part_number, etag: resp.etag });
                }
            }
            Ok((status, _)) => match classify_upload_status(status, queue_variant) {
                UploadRetryClass::RateLimited | UploadRetryClass::StreamRateLimited => {
                    pool.punish(&host).await;
                    let secs = rand::thread_rng().gen_range(1..=10);
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                }
                UploadRetryClass::Retryable => {
                    pool.punish(&host).await;
                    if try_times <= 1 {
                        return Err(MultipartError::UnexpectedStatus { status, operation: "uploadPart" });
                    }
                    try_times -= 1;
                    let backoff = if queue_variant { Duration::from_secs(1) } else { Duration::from_secs(3) };
                    tokio::time::sleep(backoff).await;
                }
                UploadRetryClass::Fatal => {
                    return Err(MultipartError::UnexpectedStatus { status, operation: "uploadPart" });
                }
            },
            Err(wire_err) => {
                pool.punish(&host).await;
                if try_times <= 1 {
                    return Err(wire_err.into());
                }
                try_times -= 1;
                let backoff = if queue_variant { Duration::from_secs(1) } else { Duration::from_secs(3) };
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
