//! Errors surfaced by the filesystem facade.

use thiserror::Error;

use crate::classify::ClassifyError;
use crate::config::SettingsError;
use crate::worker::WorkerError;

/// Result type for facade operations.
pub type FsResult<T> = Result<T, FsError>;

/// Errors returned by [`FsAdapter`](super::FsAdapter).
#[derive(Error, Debug)]
pub enum FsError {
    /// The operation is not available on this backend. No worker was called.
    #[error("operation not supported: {operation}")]
    NotSupported { operation: &'static str },

    /// Bad caller input, rejected before any worker call.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Pool, transport or provider failure, passed through unchanged.
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// A listing entry could not be classified.
    #[error(transparent)]
    Classify(#[from] ClassifyError),

    /// File contents in a response were not valid base64.
    #[error("failed to decode file contents: {0}")]
    Decode(#[from] base64::DecodeError),

    /// A response payload did not have the expected shape.
    #[error("unexpected response payload: {0}")]
    Payload(#[source] serde_json::Error),

    /// A response carried a timestamp outside the representable range.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    /// The producer side of a stream went away before finishing.
    #[error("stream closed before completion")]
    StreamClosed,

    /// Local I/O while feeding or draining a stream.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings could not be turned into a running adapter.
    #[error(transparent)]
    Config(#[from] SettingsError),
}

impl FsError {
    pub(crate) fn not_supported(operation: &'static str) -> Self {
        Self::NotSupported { operation }
    }

    pub fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported { .. })
    }
}
