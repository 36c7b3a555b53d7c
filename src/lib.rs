//! Concurrent transfer engine for a cloud object-storage client SDK.
//!
//! This crate is the core of an upload/download engine, not a full SDK: it
//! turns application-level upload/download requests into a reliable sequence
//! of HTTP operations against a fleet of storage endpoints, tolerating
//! transient endpoint failures, rate limiting, and partial data loss. The
//! surrounding collaborators a full SDK would add on top — configuration
//! loading, process-wide globals, bucket listing/stat/delete RPCs, a quota
//! query endpoint, and a local HTTP facade — live outside this crate.
//!
//! # Architecture
//!
//! - [`host`] — round-robin host pool with time-decaying punishment
//!   ([`host::HostPool`]) and a short-lived affinity pin ([`host::HostPin`]).
//! - [`discovery`] — the [`discovery::HostDiscovery`] trait the pool's
//!   background refresh consults for fresh host lists.
//! - [`limiter`] — [`limiter::PartLimiter`], a named semaphore wrapper
//!   bounding in-flight part workers.
//! - [`sign`] — HMAC-SHA1 request/token signing and the [`sign::PutPolicy`]
//!   upload-token codec.
//! - [`retry`] — the generic pool/pin-aware retry driver both engines and the
//!   download engine are built on.
//! - [`multipart`] — the v2 multipart upload state machine (random-access,
//!   serial-stream, and data-channel variants).
//! - [`resumable`] — the legacy v1 block-upload state machine
//!   (`mkblk`/`bput`/`mkfile`).
//! - [`download`] — file-mode and range-mode GET downloads with resume.
//! - [`classify`] — pure HTTP-status classification shared by the engines
//!   above.
//! - [`client`] — the shared `reqwest::Client` builder both engines use.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod cancel;
pub mod classify;
pub mod client;
pub mod constants;
pub mod discovery;
pub mod download;
pub mod host;
pub mod limiter;
pub mod multipart;
pub mod resumable;
pub mod retry;
pub mod sign;

pub use client::build_client;
pub use discovery::{DiscoveryError, HostDiscovery, StaticHosts};
pub use download::{DownloadEngine, DownloadError, DownloadFileResult};
pub use host::{HostPin, HostPool, HostPoolConfig, HostPoolError};
pub use limiter::PartLimiter;
pub use multipart::{
    FileSource, MultipartEngine, MultipartError, MultipartUploadConfig, MultipartUploadResult,
    PartData, PartSource,
};
pub use resumable::{
    BlkputRet, NotifyFn, ResumableEngine, ResumableError, ResumableUploadConfig,
    ResumableUploadResult,
};
pub use retry::{RetryError, RetryOutcome};
pub use sign::{PutPolicy, SignError, TokenError, base64url_decode, base64url_encode, sign, verify};
