//! Synchronous storage providers.
//!
//! A [`Provider`] is the blocking backend that workers drive. It is never
//! called from the async side directly: the pool ships a [`ProviderHandle`]
//! to every worker, and the worker rebuilds its own provider from it.
//!
//! ```ignore
//! use fsbridge::provider::{Provider, ProviderHandle};
//!
//! let handle = ProviderHandle::local("/srv/data");
//! let mut provider = handle.connect()?;
//! provider.write("notes.txt", b"hello")?;
//! ```

mod local;
mod memory;

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use local::LocalProvider;
pub use memory::MemoryProvider;

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors raised by a provider.
///
/// A provider that merely *declines* an operation (e.g. renaming onto an
/// existing file) returns `Ok(false)` instead.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The path does not exist.
    #[error("path not found: {0}")]
    NotFound(String),

    /// The path is malformed or escapes the provider root.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Underlying I/O failure.
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl ProviderError {
    pub(crate) fn io(path: impl Into<String>, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            return Self::NotFound(path.into());
        }
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Size and modification time of a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Size in bytes.
    pub size: u64,
    /// Last modification, seconds since the Unix epoch.
    pub timestamp: i64,
}

/// One entry returned by [`Provider::list_contents`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    /// Path relative to the provider root.
    pub path: String,
    /// Entry type as the provider reports it (`"file"`, `"dir"`, ...).
    #[serde(rename = "type")]
    pub entry_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl ListEntry {
    pub fn file(path: impl Into<String>, meta: Metadata) -> Self {
        Self {
            path: path.into(),
            entry_type: "file".to_string(),
            size: Some(meta.size),
            timestamp: Some(meta.timestamp),
        }
    }

    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            entry_type: "dir".to_string(),
            size: None,
            timestamp: None,
        }
    }
}

/// A synchronous, blocking storage backend.
///
/// Implementations are owned by exactly one worker and are never shared
/// across concurrent calls.
pub trait Provider: Send {
    /// Delete a file. Returns `false` if nothing was deleted.
    fn delete(&mut self, path: &str) -> ProviderResult<bool>;

    /// Read size and modification time.
    fn get_metadata(&self, path: &str) -> ProviderResult<Metadata>;

    /// List the direct children of a directory.
    fn list_contents(&self, path: &str) -> ProviderResult<Vec<ListEntry>>;

    /// Read a whole file.
    fn read(&self, path: &str) -> ProviderResult<Vec<u8>>;

    /// Write a whole file, replacing any previous content.
    fn write(&mut self, path: &str, contents: &[u8]) -> ProviderResult<bool>;

    /// Rename a file. Returns `false` if the source is missing or the
    /// destination already exists.
    fn rename(&mut self, from: &str, to: &str) -> ProviderResult<bool>;
}

/// Serializable configuration that rebuilds a provider inside a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "adapter", rename_all = "snake_case")]
pub enum ProviderHandle {
    /// Files under a directory on the local disk.
    Local { root: PathBuf },
    /// A named in-memory store, shared by every worker of the same process.
    Memory { name: String },
}

impl ProviderHandle {
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self::Local { root: root.into() }
    }

    pub fn memory(name: impl Into<String>) -> Self {
        Self::Memory { name: name.into() }
    }

    /// Build a live provider from this handle.
    pub fn connect(&self) -> ProviderResult<Box<dyn Provider>> {
        match self {
            Self::Local { root } => Ok(Box::new(LocalProvider::new(root)?)),
            Self::Memory { name } => Ok(Box::new(MemoryProvider::named(name))),
        }
    }
}

/// Split a provider path into normalized, non-empty segments.
///
/// Rejects `..` so no path can leave the provider root.
pub(crate) fn normalize(path: &str) -> ProviderResult<Vec<&str>> {
    let mut segments = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return Err(ProviderError::InvalidPath(path.to_string())),
            s => segments.push(s),
        }
    }
    Ok(segments)
}
