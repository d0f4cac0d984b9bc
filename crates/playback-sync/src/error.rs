//! Unified crate-level error types.
//!
//! This module provides a single [`SyncError`] type used across the crate and
//! a convenient [`SyncResult`] alias.
//!
//! Note: network-facing variants intentionally remain string-based to avoid
//! pulling concrete HTTP client error types into the public API.

/// Result type used by this crate.
pub type SyncResult<T> = Result<T, SyncError>;

/// Unified error type for the `playback-sync` crate.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The media backend reported an unrecoverable playback error.
    #[error("fatal media error: {message}")]
    MediaFatal {
        /// Backend-provided description.
        message: String,
    },

    /// The browser/platform refused to start playback without a user
    /// gesture. Recoverable: callers advance to the next track or retry.
    #[error("autoplay rejected by the media backend")]
    AutoplayRejected,

    /// The background manifest probe failed to learn the media duration.
    #[error("manifest probe failed: {0}")]
    ProbeFailed(String),

    /// The track catalog could not be fetched or parsed. Recoverable via
    /// deterministic fallback durations.
    #[error("track catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// HTTP request failed.
    #[error("HTTP error: {status} for {url}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// URL that failed.
        url: String,
    },
}
