//! Error types for blocksync operations.

use thiserror::Error;

/// Errors that can occur while reconstructing a file.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Open, seek, or read failure on the local file during scanning or reuse.
    #[error("local file I/O error: {0}")]
    Local(#[source] std::io::Error),

    /// Seek or write failure on the output sink.
    #[error("output I/O error: {0}")]
    Output(#[source] std::io::Error),

    /// The remote URL returned 404.
    #[error("URL not found: {0}")]
    UrlNotFound(String),

    /// The server answered a range request with a status other than 206.
    #[error("ranged request not supported (status {status})")]
    RangeNotSupported {
        /// HTTP status returned instead of 206.
        status: u16,
    },

    /// The server applied a content coding to a ranged response.
    /// Ranges over coded representations are ambiguous, so they are refused.
    #[error("response from server was gzipped")]
    CompressedResponse,

    /// The range response body did not have the requested length.
    #[error("range size mismatch: got {got}, expected {expected}")]
    RangeSizeMismatch {
        /// Bytes actually received.
        got: u64,
        /// Bytes requested.
        expected: u64,
    },

    /// HTTP transport failure (connect, send, or body read).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The control metadata is unusable.
    #[error("invalid control: {0}")]
    InvalidControl(String),

    /// SHA-1 of the reconstructed output does not match the control.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Hex digest declared by the control.
        expected: String,
        /// Hex digest of the assembled output.
        actual: String,
    },

    /// The planner produced chunks that do not partition the target.
    /// This indicates a bug, not bad input.
    #[error("plan invariant violation: {0}")]
    PlanInvariant(String),
}

impl SyncError {
    /// Classify an `io::Error` raised while reading from a chunk source.
    ///
    /// The HTTP range source wraps its own `SyncError` inside `io::Error`
    /// to satisfy the `Read` contract; this unwraps it back so transport
    /// failures are not misreported as local file errors.
    #[must_use]
    pub fn from_source_read(err: std::io::Error) -> Self {
        match err.downcast::<SyncError>() {
            Ok(inner) => inner,
            Err(err) => SyncError::Local(err),
        }
    }
}

/// Result type for blocksync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
