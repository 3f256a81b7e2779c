//! Protocol types for worker communication.
//!
//! Requests and responses travel as one JSON object per line. Parameters and
//! results are flat field maps; file contents are base64 strings.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::provider::ProviderHandle;

/// Untyped request or response body.
pub type Payload = serde_json::Value;

// ============================================================================
// Request/Response Envelope
// ============================================================================

/// Request envelope sent to the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation.
    pub id: String,
    /// Method name (e.g., "readdir").
    pub method: String,
    /// Method-specific parameters.
    #[serde(default)]
    pub params: Payload,
}

/// Response envelope received from the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Request ID this response corresponds to.
    pub id: String,
    /// Whether the request succeeded.
    pub success: bool,
    /// Result data (present if success = true).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Payload>,
    /// Error information (present if success = false).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl ResponseEnvelope {
    pub fn ok(id: impl Into<String>, result: Payload) -> Self {
        Self {
            id: id.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: ErrorInfo) -> Self {
        Self {
            id: id.into(),
            success: false,
            result: None,
            error: Some(error),
        }
    }
}

/// Error information in a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code, one of [`codes`].
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Request Parameters
// ============================================================================

/// Parameters for `setFlysystem`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetProviderParams {
    pub provider: ProviderHandle,
}

/// Parameters for single-path methods (`stat`, `unlink`, `read`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathParams {
    pub path: String,
}

/// Ordering applied to a directory listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListOrder {
    /// Whatever order the provider returns.
    #[default]
    None,
    Ascending,
    Descending,
}

/// Parameters for `readdir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaddirParams {
    pub path: String,
    #[serde(default)]
    pub flags: ListOrder,
}

/// Parameters for `write`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteParams {
    pub path: String,
    /// Base64-encoded file contents.
    pub contents: String,
}

/// Parameters for `rename`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameParams {
    pub from: String,
    pub to: String,
}

// ============================================================================
// Response Types
// ============================================================================

/// Response from `stat`. All three times carry the provider's single
/// modification timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatResponse {
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

/// Response from `read`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResponse {
    /// Base64-encoded file contents.
    pub contents: String,
}

/// Response from `write`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WriteResponse {
    pub written: bool,
}

/// Response from `rename`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RenameResponse {
    pub renamed: bool,
}

/// Response from `unlink`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UnlinkResponse {
    pub deleted: bool,
}

/// Encode binary content for a payload field.
pub fn encode_contents(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a payload content field.
pub fn decode_contents(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(encoded)
}

// ============================================================================
// Method Names
// ============================================================================

/// Worker method names.
pub mod methods {
    pub const SET_PROVIDER: &str = "setFlysystem";
    pub const UNLINK: &str = "unlink";
    pub const STAT: &str = "stat";
    pub const READDIR: &str = "readdir";
    pub const READ: &str = "read";
    pub const WRITE: &str = "write";
    pub const RENAME: &str = "rename";
}

/// Error codes carried in [`ErrorInfo::code`].
pub mod codes {
    pub const PROVIDER_NOT_SET: &str = "PROVIDER_NOT_SET";
    pub const PROVIDER_ERROR: &str = "PROVIDER_ERROR";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
    pub const WORKER_EXITED: &str = "WORKER_EXITED";
}
