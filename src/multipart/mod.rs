//! Resumable multipart upload engine (v2): `initParts → uploadPart* →
//! completeParts`, with parallel random-access, serial stream, and
//! data-channel worker variants.

mod engine;
pub mod wire;

pub use engine::{MultipartEngine, MultipartError, PartData, PartSource};

use std::collections::HashMap;

use async_trait::async_trait;

use crate::constants::{DEFAULT_CONCURRENCY, DEFAULT_UPLOAD_PART_SIZE};
use wire::PartInfo;

/// Construction parameters for a multipart upload call.
///
/// A plain struct passed to the engine's upload methods, the way
/// `kodocli.UploadConfig` is a plain struct passed to `Uploader.Upload` —
/// no file or environment loading.
#[derive(Debug, Clone)]
pub struct MultipartUploadConfig {
    /// Size of every part except the last. Minimum 4 MiB.
    pub part_size: u64,
    /// Number of part workers allowed in flight at once.
    pub concurrency: usize,
    /// Upstream tuning knob carried for API compatibility: in the original
    /// engine this toggles whether a worker buffers its section into memory
    /// before the PUT (to tolerate a non-seekable section). [`PartSource`]
    /// here only ever hands back an owned [`bytes::Bytes`], so every worker
    /// is already buffered — this field has no effect.
    pub use_buffer: bool,
    /// Explicit per-part sizes; when set, must sum to `fsize`.
    pub upload_parts: Option<Vec<u64>>,
    /// Destination file name recorded at commit time.
    pub fname: String,
    pub mime_type: Option<String>,
    /// Merged into the commit body's `metadata` with an `x-qn-meta-` prefix.
    pub metadata: HashMap<String, String>,
    pub custom_vars: HashMap<String, String>,
}

impl Default for MultipartUploadConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_UPLOAD_PART_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            use_buffer: false,
            upload_parts: None,
            fname: String::new(),
            mime_type: None,
            metadata: HashMap::new(),
            custom_vars: HashMap::new(),
        }
    }
}

/// Caller-facing result of a completed multipart upload: the server-assigned
/// object identifier plus enough detail (`upload_id`, per-part etags) for a
/// caller to log or audit the transfer after the fact.
#[derive(Debug, Clone)]
pub struct MultipartUploadResult {
    pub hash: String,
    pub key: String,
    pub upload_id: String,
    pub parts: Vec<PartInfo>,
}

/// A [`PartSource`] backed by a file opened fresh for each range read.
///
/// Deliberately simple (open + seek + read per call) rather than holding one
/// shared file handle behind a mutex: part reads are infrequent relative to
/// the PUT they precede, and this avoids serializing concurrent workers on a
/// single handle.
pub struct FileSource {
    path: std::path::PathBuf,
    size: u64,
}

impl FileSource {
    /// Opens `path` once to record its size; subsequent reads reopen it.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` cannot be stat'd.
    pub async fn open(path: impl Into<std::path::PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let metadata = tokio::fs::metadata(&path).await?;
        Ok(Self {
            path,
            size: metadata.len(),
        })
    }
}

#[async_trait]
impl PartSource for FileSource {
    async fn read_range(&self, offset: u64, len: u64) -> std::io::Result<bytes::Bytes> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        #[allow(clippy::cast_possible_truncation)]
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf).await?;
        Ok(bytes::Bytes::from(buf))
    }

    fn size(&self) -> u64 {
        self.size
    }
}
