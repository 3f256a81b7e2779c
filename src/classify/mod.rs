//! Listing entry classification.
//!
//! A [`ClassifierChain`] turns a raw `{path, type, ...}` entry into a typed
//! [`Node`]. Rules are consulted in order; the first one to claim the entry
//! wins, and an exhausted chain is reported as [`ClassifyError::NoMatch`].
//!
//! ```ignore
//! let chain = ClassifierChain::default();
//! let node = chain.detect(&RawEntry::typed("b", "dir")).await?;
//! assert_eq!(node.kind, NodeKind::Directory);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Result type for classification.
pub type ClassifyResult<T> = Result<T, ClassifyError>;

/// Errors raised while classifying an entry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    /// No rule in the chain claimed the entry.
    #[error("no classifier matched `{path}`")]
    NoMatch { path: String },

    /// A rule refused the entry outright.
    #[error("classifier rejected `{path}`: {reason}")]
    Rejected { path: String, reason: String },
}

/// What a node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Directory,
    Other,
}

/// A classified listing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub path: String,
    pub kind: NodeKind,
    /// Every extra field of the raw entry (size, timestamp, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl Node {
    pub fn new(path: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            metadata: None,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }
}

/// An unclassified entry as it comes off the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEntry {
    pub path: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawEntry {
    /// An entry that only carries a path.
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn typed(path: impl Into<String>, entry_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            entry_type: Some(entry_type.into()),
            extra: Map::new(),
        }
    }

    /// Build a node of `kind` from this entry, carrying its extra fields.
    pub fn to_node(&self, kind: NodeKind) -> Node {
        Node {
            path: self.path.clone(),
            kind,
            metadata: (!self.extra.is_empty()).then(|| self.extra.clone()),
        }
    }
}

/// One classification rule.
///
/// Return `Ok(Some(node))` to claim the entry, `Ok(None)` to pass it to the
/// next rule, or `Err` to fail its classification.
#[async_trait]
pub trait Classify: Send + Sync {
    async fn classify(&self, entry: &RawEntry) -> ClassifyResult<Option<Node>>;
}

/// Maps the entry's reported `type` string to a kind.
#[derive(Debug, Clone)]
pub struct MappedTypes {
    map: HashMap<String, NodeKind>,
}

impl Default for MappedTypes {
    fn default() -> Self {
        Self::new()
            .with("file", NodeKind::File)
            .with("dir", NodeKind::Directory)
            .with("directory", NodeKind::Directory)
            .with("link", NodeKind::Other)
            .with("symlink", NodeKind::Other)
    }
}

impl MappedTypes {
    /// An empty mapping.
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    pub fn with(mut self, entry_type: impl Into<String>, kind: NodeKind) -> Self {
        self.map.insert(entry_type.into(), kind);
        self
    }
}

#[async_trait]
impl Classify for MappedTypes {
    async fn classify(&self, entry: &RawEntry) -> ClassifyResult<Option<Node>> {
        Ok(entry
            .entry_type
            .as_deref()
            .and_then(|t| self.map.get(t))
            .map(|kind| entry.to_node(*kind)))
    }
}

/// Claims paths ending in `/` as directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrailingSlash;

#[async_trait]
impl Classify for TrailingSlash {
    async fn classify(&self, entry: &RawEntry) -> ClassifyResult<Option<Node>> {
        Ok(entry
            .path
            .ends_with('/')
            .then(|| entry.to_node(NodeKind::Directory)))
    }
}

/// Ordered, first-match-wins list of rules.
#[derive(Clone)]
pub struct ClassifierChain {
    rules: Vec<Arc<dyn Classify>>,
}

impl fmt::Debug for ClassifierChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassifierChain")
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl Default for ClassifierChain {
    fn default() -> Self {
        Self::empty()
            .with_rule(MappedTypes::default())
            .with_rule(TrailingSlash)
    }
}

impl ClassifierChain {
    /// A chain with no rules; every entry fails with `NoMatch`.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule at the end of the chain.
    pub fn with_rule(mut self, rule: impl Classify + 'static) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }

    /// Insert a rule ahead of every existing one.
    pub fn with_first_rule(mut self, rule: impl Classify + 'static) -> Self {
        self.rules.insert(0, Arc::new(rule));
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Classify `entry` with the first rule that claims it.
    pub async fn detect(&self, entry: &RawEntry) -> ClassifyResult<Node> {
        for rule in &self.rules {
            if let Some(node) = rule.classify(entry).await? {
                return Ok(node);
            }
        }
        Err(ClassifyError::NoMatch {
            path: entry.path.clone(),
        })
    }
}
