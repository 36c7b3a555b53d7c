//! Per-surface error classification.
//!
//! The retryable-code set differs per operation (406 is retryable for
//! uploads but not modeled for downloads at all; `completeParts` has its own
//! benign-code set), so this module is a handful of pure functions rather
//! than one polymorphic classifier.

/// Outcome of classifying a per-part upload attempt's HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadRetryClass {
    /// 509: retry indefinitely with randomized backoff, without decrementing
    /// the caller's retry counter.
    RateLimited,
    /// 504, but only in stream-queue mode: treated like `RateLimited`.
    StreamRateLimited,
    /// 406, or any non-4xx status: retry with backoff, decrementing the
    /// caller's retry counter.
    Retryable,
    /// Any other 4xx: not retryable.
    Fatal,
}

/// Classifies a per-part upload HTTP status code.
///
/// `stream_mode` selects whether 504 is treated as a second rate-limit
/// signal (the stream-queue variant) or falls through to the general
/// non-4xx-is-retryable rule (the random-access and data-channel variants,
/// where 504 is simply another retryable status).
#[must_use]
pub fn classify_upload_status(status: u16, stream_mode: bool) -> UploadRetryClass {
    match status {
        509 => UploadRetryClass::RateLimited,
        504 if stream_mode => UploadRetryClass::StreamRateLimited,
        406 => UploadRetryClass::Retryable,
        s if s / 100 != 4 => UploadRetryClass::Retryable,
        _ => UploadRetryClass::Fatal,
    }
}

/// Outcome of classifying a `completeParts` commit attempt's HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteOutcome {
    /// Treated as success: the object exists or is in flux server-side, but
    /// completion is acceptable. The caller should clear the error.
    Benign,
    /// Reported to the caller as-is; the commit loop stops retrying.
    Fatal,
    /// Sleep and retry the commit.
    Retry,
}

/// Classifies a `completeParts` HTTP status code.
#[must_use]
pub fn classify_complete_parts_status(status: u16) -> CompleteOutcome {
    match status {
        612 | 614 => CompleteOutcome::Benign,
        s if s / 100 == 4 => CompleteOutcome::Fatal,
        579 => CompleteOutcome::Fatal,
        _ => CompleteOutcome::Retry,
    }
}

/// Outcome of classifying a download HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The response should be treated as a successful (partial or full) body.
    Success,
    /// Transient: retry the request.
    Retry,
    /// Not retryable.
    Fatal,
}

/// Classifies a download HTTP status code.
///
/// 416 ("Range Not Satisfiable") is treated as success for a resumed file
/// download: it means the local file already holds everything the server has.
#[must_use]
pub fn classify_download_status(status: u16) -> DownloadOutcome {
    match status {
        200 | 206 | 416 => DownloadOutcome::Success,
        s if s >= 500 => DownloadOutcome::Retry,
        _ => DownloadOutcome::Fatal,
    }
}

/// Whether a transport-level (non-HTTP-status) error is retryable.
///
/// True for connection failures and timeouts; false for request-construction
/// errors, which indicate a caller bug rather than a transient condition.
#[must_use]
pub fn is_transport_error_retryable(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_509_is_rate_limited_in_both_modes() {
        assert_eq!(
            classify_upload_status(509, false),
            UploadRetryClass::RateLimited
        );
        assert_eq!(
            classify_upload_status(509, true),
            UploadRetryClass::RateLimited
        );
    }

    #[test]
    fn status_504_is_stream_rate_limited_only_in_stream_mode() {
        assert_eq!(
            classify_upload_status(504, true),
            UploadRetryClass::StreamRateLimited
        );
        assert_eq!(
            classify_upload_status(504, false),
            UploadRetryClass::Retryable
        );
    }

    #[test]
    fn status_406_is_retryable() {
        assert_eq!(
            classify_upload_status(406, false),
            UploadRetryClass::Retryable
        );
    }

    #[test]
    fn other_4xx_is_fatal() {
        assert_eq!(
            classify_upload_status(403, false),
            UploadRetryClass::Fatal
        );
        assert_eq!(
            classify_upload_status(400, false),
            UploadRetryClass::Fatal
        );
    }

    #[test]
    fn complete_parts_612_and_614_are_benign() {
        assert_eq!(classify_complete_parts_status(612), CompleteOutcome::Benign);
        assert_eq!(classify_complete_parts_status(614), CompleteOutcome::Benign);
    }

    #[test]
    fn complete_parts_579_and_4xx_are_fatal() {
        assert_eq!(classify_complete_parts_status(579), CompleteOutcome::Fatal);
        assert_eq!(classify_complete_parts_status(403), CompleteOutcome::Fatal);
    }

    #[test]
    fn complete_parts_5xx_retries() {
        assert_eq!(classify_complete_parts_status(500), CompleteOutcome::Retry);
    }

    #[test]
    fn download_416_is_success() {
        assert_eq!(classify_download_status(416), DownloadOutcome::Success);
    }

    #[test]
    fn download_5xx_retries() {
        assert_eq!(classify_download_status(503), DownloadOutcome::Retry);
    }

    #[test]
    fn download_other_4xx_is_fatal() {
        assert_eq!(classify_download_status(403), DownloadOutcome::Fatal);
    }
}
