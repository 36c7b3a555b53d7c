//! GET-based download engine: file-mode resume via HTTP `Range`, and
//! explicit range reads into a caller-supplied buffer.

mod engine;
pub mod wire;

pub use engine::{DownloadEngine, DownloadError, DownloadFileResult};
