//! Non-blocking filesystem facade.
//!
//! [`FsAdapter`] turns filesystem-style calls into worker calls on a
//! [`WorkerPool`] and hands results back as futures and streams. Operations
//! the storage model has no counterpart for fail with
//! [`FsError::NotSupported`] without touching a worker.
//!
//! ```ignore
//! let fs = FsAdapter::connect(&Settings::load()?).await?;
//!
//! let mut nodes = fs.ls("");
//! while let Some(node) = nodes.next().await {
//!     println!("{:?}", node?);
//! }
//!
//! let mut file = fs.open("notes.txt", "w").await?.into_write().unwrap();
//! file.write_all(b"hello").await?;
//! assert!(file.finish().await?);
//! ```

mod error;
mod stream;

pub use error::{FsError, FsResult};
pub use stream::{FileDescriptor, NodeStream, OpenedFile, ReadStream, WriteStream};

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::classify::{ClassifierChain, Node, RawEntry};
use crate::config::{Settings, WorkerMode};
use crate::pool::{PoolEvent, WorkerPool};
use crate::worker::protocol::{
    decode_contents, methods, ListOrder, Payload, ReadResponse, RenameResponse, StatResponse,
};
use crate::worker::{ProcessSpawner, Spawner, ThreadSpawner};

/// File status. All three times carry the provider's modification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub size: u64,
    pub atime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
    pub ctime: DateTime<Utc>,
}

impl TryFrom<StatResponse> for Stat {
    type Error = FsError;

    fn try_from(resp: StatResponse) -> FsResult<Self> {
        let time = |secs: i64| DateTime::from_timestamp(secs, 0).ok_or(FsError::InvalidTimestamp(secs));
        Ok(Self {
            size: resp.size,
            atime: time(resp.atime)?,
            mtime: time(resp.mtime)?,
            ctime: time(resp.ctime)?,
        })
    }
}

/// How a file is opened. Parsed from an fopen-style flag string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlags {
    Read,
    Write,
}

impl OpenFlags {
    /// `r` anywhere means read; otherwise `w` anywhere means write.
    pub fn parse(flags: &str) -> FsResult<Self> {
        if flags.contains('r') {
            Ok(Self::Read)
        } else if flags.contains('w') {
            Ok(Self::Write)
        } else {
            Err(FsError::InvalidArgument(format!(
                "open flags `{flags}` request neither read nor write"
            )))
        }
    }
}

impl FromStr for OpenFlags {
    type Err = FsError;

    fn from_str(s: &str) -> FsResult<Self> {
        Self::parse(s)
    }
}

/// Async filesystem over a pool of provider workers.
#[derive(Debug)]
pub struct FsAdapter {
    pool: WorkerPool,
    classifier: Arc<ClassifierChain>,
    list_order: ListOrder,
    next_fd: AtomicU64,
}

impl FsAdapter {
    /// Wrap a running pool with the default classifier chain.
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            pool,
            classifier: Arc::new(ClassifierChain::default()),
            list_order: ListOrder::None,
            next_fd: AtomicU64::new(1),
        }
    }

    /// Start a pool from settings and wrap it.
    ///
    /// Returns once `pool.min_size` workers have received the provider.
    pub async fn connect(settings: &Settings) -> FsResult<Self> {
        settings.validate()?;
        let config = settings.pool.to_pool_config()?;
        let handle = settings.provider.to_handle()?;
        let spawner: Arc<dyn Spawner> = match settings.worker.mode {
            WorkerMode::Process => Arc::new(ProcessSpawner::from_settings(settings)?),
            WorkerMode::Thread => Arc::new(ThreadSpawner),
        };
        debug!(mode = ?settings.worker.mode, provider = ?handle, "starting adapter");

        let pool = WorkerPool::start(config, spawner, handle).await?;
        Ok(Self::new(pool).with_list_order(settings.listing.order))
    }

    pub fn with_classifier(mut self, classifier: ClassifierChain) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Order requested from workers for every `ls`.
    pub fn with_list_order(mut self, order: ListOrder) -> Self {
        self.list_order = order;
        self
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn classifier(&self) -> &ClassifierChain {
        &self.classifier
    }

    /// Subscribe to pool events, including worker failures.
    pub fn events(&self) -> broadcast::Receiver<PoolEvent> {
        self.pool.events()
    }

    /// Call a worker method directly and return its raw payload.
    pub async fn call(&self, method: &str, params: Payload) -> FsResult<Payload> {
        Ok(self.pool.call(method, params).await?)
    }

    async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Payload) -> FsResult<T> {
        let payload = self.call(method, params).await?;
        serde_json::from_value(payload).map_err(FsError::Payload)
    }

    fn next_fd(&self) -> FileDescriptor {
        FileDescriptor(self.next_fd.fetch_add(1, Ordering::Relaxed))
    }

    pub async fn stat(&self, path: &str) -> FsResult<Stat> {
        let resp: StatResponse = self.call_as(methods::STAT, json!({ "path": path })).await?;
        resp.try_into()
    }

    /// List a directory.
    ///
    /// The stream is returned at once; the listing and the classification of
    /// each entry happen in a background task. Nodes arrive as their
    /// classification completes. If the listing or any classification fails,
    /// the stream yields that error and ends.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn ls(&self, path: &str) -> NodeStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let pool = self.pool.clone();
        let classifier = self.classifier.clone();
        let params = json!({ "path": path, "flags": self.list_order });
        let path = path.to_string();

        tokio::spawn(async move {
            let entries = match list_entries(&pool, params).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path, error = %e, "listing failed");
                    let _ = tx.send(Err(e));
                    return;
                }
            };

            let mut pending: FuturesUnordered<_> =
                entries.iter().map(|entry| classifier.detect(entry)).collect();
            while let Some(result) = pending.next().await {
                let item = result.map_err(|e| {
                    warn!(path = %path, error = %e, "could not classify entry");
                    FsError::from(e)
                });
                let failed = item.is_err();
                if tx.send(item).is_err() || failed {
                    return;
                }
            }
        });

        NodeStream::new(rx)
    }

    /// Open a file for whole-file reading or writing.
    ///
    /// A read is dispatched immediately and its contents arrive through the
    /// returned stream. A write buffers locally until the stream is shut
    /// down.
    ///
    /// # Panics
    ///
    /// Panics if a read is opened outside a Tokio runtime.
    pub async fn open(&self, path: &str, flags: &str) -> FsResult<OpenedFile> {
        let fd = self.next_fd();
        match OpenFlags::parse(flags)? {
            OpenFlags::Read => {
                let (tx, rx) = oneshot::channel();
                let pool = self.pool.clone();
                let params = json!({ "path": path });
                tokio::spawn(async move {
                    let _ = tx.send(read_contents(&pool, params).await);
                });
                debug!(%fd, path, "opened for reading");
                Ok(OpenedFile::Read(ReadStream::new(fd, rx)))
            }
            OpenFlags::Write => {
                debug!(%fd, path, "opened for writing");
                Ok(OpenedFile::Write(WriteStream::new(
                    fd,
                    path.to_string(),
                    self.pool.clone(),
                )))
            }
        }
    }

    /// Rename a file. `false` means the provider declined; it is not an error.
    pub async fn rename(&self, from: &str, to: &str) -> FsResult<bool> {
        let resp: RenameResponse = self
            .call_as(methods::RENAME, json!({ "from": from, "to": to }))
            .await?;
        Ok(resp.renamed)
    }

    /// Classify a bare path locally, without asking a worker.
    pub async fn detect_type(&self, path: &str) -> FsResult<Node> {
        Ok(self.classifier.detect(&RawEntry::path(path)).await?)
    }

    /// Streams hold nothing open on a worker, so there is nothing to close.
    pub async fn close(&self, fd: FileDescriptor) -> FsResult<()> {
        debug!(%fd, "close");
        Ok(())
    }

    pub async fn mkdir(&self, _path: &str, _mode: u32) -> FsResult<()> {
        Err(FsError::not_supported("mkdir"))
    }

    pub async fn rmdir(&self, _path: &str) -> FsResult<()> {
        Err(FsError::not_supported("rmdir"))
    }

    /// Use [`call`](Self::call) with `unlink` to delete through the provider.
    pub async fn unlink(&self, _path: &str) -> FsResult<()> {
        Err(FsError::not_supported("unlink"))
    }

    pub async fn chmod(&self, _path: &str, _mode: u32) -> FsResult<()> {
        Err(FsError::not_supported("chmod"))
    }

    pub async fn chown(&self, _path: &str, _uid: u32, _gid: u32) -> FsResult<()> {
        Err(FsError::not_supported("chown"))
    }

    pub async fn touch(&self, _path: &str, _mode: u32) -> FsResult<()> {
        Err(FsError::not_supported("touch"))
    }

    pub async fn readlink(&self, _path: &str) -> FsResult<String> {
        Err(FsError::not_supported("readlink"))
    }

    pub async fn symlink(&self, _from: &str, _to: &str) -> FsResult<()> {
        Err(FsError::not_supported("symlink"))
    }

    /// Positional reads; use [`open`](Self::open) instead.
    pub async fn read(&self, _fd: FileDescriptor, _length: usize, _offset: u64) -> FsResult<Bytes> {
        Err(FsError::not_supported("read"))
    }

    /// Positional writes; use [`open`](Self::open) instead.
    pub async fn write(
        &self,
        _fd: FileDescriptor,
        _data: &[u8],
        _length: usize,
        _offset: u64,
    ) -> FsResult<usize> {
        Err(FsError::not_supported("write"))
    }

    /// Stop the pool. Calls in flight finish; new ones fail.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

async fn list_entries(pool: &WorkerPool, params: Payload) -> FsResult<Vec<RawEntry>> {
    let payload = pool.call(methods::READDIR, params).await?;
    serde_json::from_value(payload).map_err(FsError::Payload)
}

async fn read_contents(pool: &WorkerPool, params: Payload) -> FsResult<Bytes> {
    let payload = pool.call(methods::READ, params).await?;
    let resp: ReadResponse = serde_json::from_value(payload).map_err(FsError::Payload)?;
    Ok(Bytes::from(decode_contents(&resp.contents)?))
}
