//! Worker-specific error types.

use std::io;
use thiserror::Error;

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors that can occur during worker communication.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Failed to spawn the worker process.
    #[error("failed to spawn worker process: {0}")]
    SpawnFailed(#[source] io::Error),

    /// Failed to write to worker stdin.
    #[error("failed to write to worker: {0}")]
    WriteFailed(#[source] io::Error),

    /// Failed to serialize request to JSON.
    #[error("failed to serialize request: {0}")]
    SerializeFailed(#[source] serde_json::Error),

    /// Failed to deserialize response from JSON.
    #[error("failed to deserialize response: {0}")]
    DeserializeFailed(#[source] serde_json::Error),

    /// Worker process exited unexpectedly.
    #[error("worker process exited unexpectedly")]
    WorkerExited,

    /// Response channel was closed (internal error).
    #[error("response channel closed unexpectedly")]
    ChannelClosed,

    /// Pool sizing that cannot hold `min_size <= live <= max_size`.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// The pool has been shut down.
    #[error("worker pool is shut down")]
    PoolClosed,

    /// Worker returned an error response.
    #[error("worker error: {message} (code: {code})")]
    Remote {
        /// Error code from worker.
        code: String,
        /// Error message from worker.
        message: String,
    },

    /// A call arrived before the worker received its provider.
    #[error("worker has no provider: {0}")]
    ProviderNotSet(String),

    /// The provider reported an error.
    #[error("provider error: {0}")]
    Provider(String),

    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Method not found.
    #[error("method not found: {0}")]
    MethodNotFound(String),
}

impl WorkerError {
    /// Create a remote error from an error response.
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Map a wire error code to the matching variant.
    pub fn from_code(code: &str, message: &str) -> Self {
        use super::protocol::codes;

        match code {
            codes::PROVIDER_NOT_SET => Self::ProviderNotSet(message.to_string()),
            codes::PROVIDER_ERROR => Self::Provider(message.to_string()),
            codes::INVALID_REQUEST => Self::InvalidRequest(message.to_string()),
            codes::METHOD_NOT_FOUND => Self::MethodNotFound(message.to_string()),
            codes::WORKER_EXITED => Self::WorkerExited,
            _ => Self::remote(code, message),
        }
    }

    /// Check if this error indicates the worker is gone.
    ///
    /// The pool discards a worker after any call failing this way.
    pub fn is_worker_exited(&self) -> bool {
        matches!(
            self,
            Self::WorkerExited
                | Self::ChannelClosed
                | Self::WriteFailed(_)
                | Self::SpawnFailed(_)
        )
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for WorkerError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::ChannelClosed
    }
}
