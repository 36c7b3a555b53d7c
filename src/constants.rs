//! Crate-wide timing and sizing constants.

use std::time::Duration;

/// Default HTTP connect timeout for upload/download clients.
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Per-request timeout for upload/download clients.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default host-pool refresh period.
pub const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(300);

/// Default host-pool punishment period.
pub const DEFAULT_PUNISH_PERIOD: Duration = Duration::from_secs(30);

/// Minimum multipart (v2) part size and legacy (v1) block size: 4 MiB.
pub const MIN_PART_SIZE: u64 = 1 << 22;

/// Default multipart (v2) part size: 8 MiB (`minUploadPartSize * 2` upstream).
pub const DEFAULT_UPLOAD_PART_SIZE: u64 = MIN_PART_SIZE * 2;

/// Default bounded-parallelism degree for multipart workers.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default upload-token deadline when the caller leaves it unset.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);

/// Legacy (v1) block size: 4 MiB, fixed.
pub const BLOCK_SIZE: u64 = 1 << 22;

/// Retry counters used by the multipart v2 engine. `initParts` itself has no
/// retry loop at this layer (spec.md §4.F step 3): a failure propagates
/// immediately instead of being absorbed here.
pub const UPLOAD_PART_RETRY_TIMES: u32 = 10;
pub const DELETE_PARTS_RETRY_TIMES: u32 = 5;
pub const COMPLETE_PARTS_RETRY_TIMES: u32 = 20;

/// Default per-chunk retry count for the legacy (v1) block-upload engine.
pub const DEFAULT_BLOCK_TRY_TIMES: u32 = 3;

/// Default chunk size within a block for the legacy (v1) engine: 256 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Server error code for "invalid upload context" — the block's server-side
/// state expired or was never created; the caller must restart the block
/// from `mkblk`.
pub const INVALID_CTX_CODE: i32 = 701;
