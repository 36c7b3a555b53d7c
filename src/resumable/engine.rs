//! The v1 block-upload state machine: `mkblk -> bput* -> mkfile`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::warn;

use crate::constants::{BLOCK_SIZE, INVALID_CTX_CODE};
use crate::host::{HostPin, HostPool, HostPoolError};
use crate::limiter::PartLimiter;
use crate::multipart::PartSource;
use crate::sign::token::{TokenError, parse_uptoken};

use super::wire::{self, BlkputRet, ResumableWireError};
use super::{ResumableUploadConfig, ResumableUploadResult};

/// Called after every successful server-side state change for a block:
/// `(block_index, block_size, progress)`.
pub type NotifyFn = Arc<dyn Fn(usize, u64, &BlkputRet) + Send + Sync>;

/// Errors raised by the v1 block-upload engine.
#[derive(Debug, Error)]
pub enum ResumableError {
    #[error("can't upload empty file")]
    EmptyFile,
    #[error("block checksum did not match the server's echo")]
    UnmatchedChecksum,
    #[error("block context expired or was never created (invalid ctx)")]
    InvalidCtx,
    #[error("unexpected status {status} from {operation}")]
    UnexpectedStatus { status: u16, operation: &'static str },
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Pool(#[from] HostPoolError),
    #[error(transparent)]
    Wire(#[from] ResumableWireError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn block_sizes(fsize: u64) -> Vec<u64> {
    let mut sizes = Vec::new();
    let mut remaining = fsize;
    while remaining > 0 {
        let chunk = remaining.min(BLOCK_SIZE);
        sizes.push(chunk);
        remaining -= chunk;
    }
    sizes
}

/// Drives the v1 block-upload state machine against a host pool/pin.
pub struct ResumableEngine {
    client: Client,
    pool: Arc<HostPool>,
    pin: Arc<HostPin>,
    pin_ttl: Duration,
}

impl ResumableEngine {
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

    /// Uploads `source` (`fsize` bytes) as fixed 4 MiB blocks, committing via
    /// `mkfile` once every block has a context.
    ///
    /// `key` is the destination object key for the `mkfile` commit,
    /// independent of whatever the upload token's `scope` encodes; `None`
    /// commits keyless.
    ///
    /// # Errors
    ///
    /// [`ResumableError::EmptyFile`] if `fsize == 0`; the first block's fatal
    /// error otherwise (blocks run concurrently; the first one to fail fatally
    /// determines the reported error, mirroring the v2 engine's fatal-wins
    /// behavior rather than introducing a second cancellation mechanism).
    pub async fn upload(
        &self,
        source: Arc<dyn PartSource>,
        fsize: u64,
        token: &str,
        key: Option<&str>,
        config: &ResumableUploadConfig,
    ) -> Result<ResumableUploadResult, ResumableError> {
        if fsize == 0 {
            return Err(ResumableError::EmptyFile);
        }
        parse_uptoken(token)?;
        let bucket_key = key.map(str::to_string);

        let sizes = block_sizes(fsize);
        let limiter = PartLimiter::new(config.concurrency.max(1));
        let fatal = Arc::new(std::sync::Mutex::new(None::<ResumableError>));
        let fatal_set = Arc::new(AtomicBool::new(false));

        let mut join_set = JoinSet::new();
        let mut offset = 0u64;
        for (idx, &size) in sizes.iter().enumerate() {
            if fatal_set.load(Ordering::Acquire) {
                break;
            }
            let Ok(permit) = limiter.acquire_owned().await else {
                break;
            };
            let client = self.client.clone();
            let pool = Arc::clone(&self.pool);
            let source = Arc::clone(&source);
            let token = token.to_string();
            let try_times = config.try_times;
            let chunk_size = config.chunk_size;
            let notify = config.notify.clone();
            let progress = config.progresses.get(idx).cloned().unwrap_or_default();
            let fatal = Arc::clone(&fatal);
            let fatal_set = Arc::clone(&fatal_set);
            let block_offset = offset;

            join_set.spawn(async move {
                let _permit = permit;
                let result = resumable_blockput(
                    &client,
                    &pool,
                    size,
                    source.as_ref(),
                    block_offset,
                    &token,
                    try_times,
                    chunk_size,
                    notify.as_deref(),
                    idx,
                    progress,
                )
                .await;
                match result {
                    Ok(ret) => Some((idx, ret)),
                    Err(err) => {
                        let mut slot = fatal.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                        if slot.is_none() {
                            *slot = Some(err);
                            fatal_set.store(true, Ordering::Release);
                        }
                        None
                    }
                }
            });
            offset += size;
        }

        let mut blocks: Vec<(usize, BlkputRet)> = Vec::with_capacity(sizes.len());
        while let Some(joined) = join_set.join_next().await {
            if let Ok(Some(entry)) = joined {
                blocks.push(entry);
            }
        }

        if let Some(err) = fatal.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take() {
            return Err(err);
        }

        blocks.sort_by_key(|(idx, _)| *idx);
        let ctxs: Vec<String> = blocks.into_iter().map(|(_, ret)| ret.ctx).collect();

        let host = self.select_host().await?;
        let url = wire::mkfile_url(
            &host,
            fsize,
            config.mime_type.as_deref(),
            bucket_key.as_deref(),
            &config.params,
            &config.x_meta,
        );
        match wire::mkfile(&self.client, &url, token, &ctxs).await? {
            (status, Some(resp)) if (200..300).contains(&status) => {
                self.pin.pin(host, self.pin_ttl);
                Ok(ResumableUploadResult { hash: resp.hash, key: resp.key })
            }
            (status, _) => Err(ResumableError::UnexpectedStatus { status, operation: "mkfile" }),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn resumable_blockput(
    client: &Client,
    pool: &HostPool,
    block_size: u64,
    source: &dyn PartSource,
    block_offset: u64,
    token: &str,
    try_times: u32,
    chunk_size: usize,
    notify: Option<&(dyn Fn(usize, u64, &BlkputRet) + Send + Sync)>,
    block_idx: usize,
    mut progress: BlkputRet,
) -> Result<BlkputRet, ResumableError> {
    let chunk_size = chunk_size as u64;

    if progress.ctx.is_empty() {
        let body_len = chunk_size.min(block_size);
        let body = source.read_range(block_offset, body_len).await?;
        let crc = crc32fast::hash(&body);
        let host = pool.select().await?;
        let (status, parsed) = wire::mkblk(client, &host, block_size, token, body).await?;
        if !(200..300).contains(&status) {
            return Err(ResumableError::UnexpectedStatus { status, operation: "mkblk" });
        }
        let Some(ret) = parsed else {
            return Err(ResumableError::UnexpectedStatus { status, operation: "mkblk" });
        };
        if ret.crc32 != crc || ret.offset != body_len {
            return Err(ResumableError::UnmatchedChecksum);
        }
        progress = ret;
        if let Some(notify) = notify {
            notify(block_idx, block_size, &progress);
        }
    }

    while progress.offset < block_size {
        let remaining = block_size - progress.offset;
        let body_len = chunk_size.min(remaining);
        let mut try_times_left = try_times;
        let mut last_err = None;

        loop {
            let body = source.read_range(block_offset + progress.offset, body_len).await?;
            let crc = crc32fast::hash(&body);
            match wire::bput(client, &progress.host, &progress.ctx, progress.offset, token, body).await {
                Ok((status, Some(ret))) if (200..300).contains(&status) => {
                    if ret.crc32 == crc {
                        progress = ret;
                        if let Some(notify) = notify {
                            notify(block_idx, block_size, &progress);
                        }
                        last_err = None;
                        break;
                    }
                    warn!(block_idx, "bput: unmatched checksum, retrying");
                    last_err = Some(ResumableError::UnmatchedChecksum);
                }
                Ok((status, _)) => {
                    if i32::from(status) == INVALID_CTX_CODE {
                        progress.ctx.clear();
                        return Err(ResumableError::InvalidCtx);
                    }
                    warn!(block_idx, status, "bput failed");
                    last_err = Some(ResumableError::UnexpectedStatus { status, operation: "bput" });
                }
                Err(err) => {
                    warn!(block_idx, %err, "bput network error");
                    last_err = Some(ResumableError::Wire(err));
                }
            }

            if try_times_left <= 1 {
                return Err(last_err.unwrap_or(ResumableError::UnexpectedStatus { status: 0, operation: "bput" }));
            }
            try_times_left -= 1;
        }
    }

    Ok(progress)
}
