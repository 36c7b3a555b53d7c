//! Legacy (v1) resumable block-upload engine: `mkblk -> bput* -> mkfile`,
//! with in-memory resume state kept per block across calls.

mod engine;
pub mod wire;

pub use engine::{NotifyFn, ResumableEngine, ResumableError};
pub use wire::BlkputRet;

use std::collections::HashMap;

use crate::constants::{DEFAULT_BLOCK_TRY_TIMES, DEFAULT_CHUNK_SIZE};

/// Construction parameters for a v1 block-upload call.
#[derive(Clone)]
pub struct ResumableUploadConfig {
    /// Bytes read per `mkblk`/`bput` request within a block.
    pub chunk_size: usize,
    /// Retries per chunk before giving up on its block.
    pub try_times: u32,
    /// Number of blocks allowed in flight at once.
    pub concurrency: usize,
    pub mime_type: Option<String>,
    pub params: HashMap<String, String>,
    /// Merged into the `mkfile` URL as `x-qn-meta-<k>/<base64url(v)>` segments.
    pub x_meta: HashMap<String, String>,
    /// Per-block resume state from a previous attempt; empty entries (or a
    /// shorter vec than the block count) start that block fresh.
    pub progresses: Vec<BlkputRet>,
    /// Called after every successful server-side state change for a block,
    /// so the caller can persist `progresses` for a later resume.
    pub notify: Option<NotifyFn>,
}

impl Default for ResumableUploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            try_times: DEFAULT_BLOCK_TRY_TIMES,
            concurrency: 4,
            mime_type: None,
            params: HashMap::new(),
            x_meta: HashMap::new(),
            progresses: Vec::new(),
            notify: None,
        }
    }
}

/// Caller-facing result of a completed v1 block upload.
#[derive(Debug, Clone, Default)]
pub struct ResumableUploadResult {
    pub hash: String,
    pub key: String,
}
