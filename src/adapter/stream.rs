//! Streams handed out by the facade.
//!
//! None of these keep anything open on a worker: reads arrive as one whole
//! buffer, and writes are buffered locally and sent as one call on shutdown.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use serde_json::json;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};

use super::error::{FsError, FsResult};
use crate::classify::Node;
use crate::pool::WorkerPool;
use crate::worker::protocol::{encode_contents, methods, WriteResponse};

/// Client-side label for an open stream. Never sent to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileDescriptor(pub(crate) u64);

impl FileDescriptor {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for FileDescriptor {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for FileDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd-{}", self.0)
    }
}

/// Nodes of a directory listing, in classification-completion order.
///
/// Ends after the last node. A failed listing or classification yields one
/// `Err` item and then ends.
#[derive(Debug)]
pub struct NodeStream {
    rx: mpsc::UnboundedReceiver<FsResult<Node>>,
}

impl NodeStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<FsResult<Node>>) -> Self {
        Self { rx }
    }

    /// Drain the stream, failing on the first error.
    pub async fn collect_nodes(mut self) -> FsResult<Vec<Node>> {
        let mut nodes = Vec::new();
        while let Some(node) = self.next().await {
            nodes.push(node?);
        }
        Ok(nodes)
    }
}

impl Stream for NodeStream {
    type Item = FsResult<Node>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Whole-file contents, delivered as a single chunk.
#[derive(Debug)]
pub struct ReadStream {
    fd: FileDescriptor,
    rx: Option<oneshot::Receiver<FsResult<Bytes>>>,
}

impl ReadStream {
    pub(crate) fn new(fd: FileDescriptor, rx: oneshot::Receiver<FsResult<Bytes>>) -> Self {
        Self { fd, rx: Some(rx) }
    }

    pub fn fd(&self) -> FileDescriptor {
        self.fd
    }

    /// Wait for the contents.
    pub async fn contents(mut self) -> FsResult<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl Stream for ReadStream {
    type Item = FsResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Ready(None);
        };
        let result = ready!(rx.poll_unpin(cx));
        self.rx = None;
        Poll::Ready(Some(result.unwrap_or(Err(FsError::StreamClosed))))
    }
}

enum WriteState {
    Buffering(BytesMut),
    Flushing(BoxFuture<'static, FsResult<bool>>),
    Done(bool),
    Failed,
}

/// Buffers everything written to it and stores the whole file on shutdown.
///
/// Dropping the stream without shutting it down (or calling
/// [`finish`](WriteStream::finish)) discards the buffer.
pub struct WriteStream {
    fd: FileDescriptor,
    path: String,
    pool: WorkerPool,
    state: WriteState,
}

impl fmt::Debug for WriteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            WriteState::Buffering(buf) => format!("buffering({} bytes)", buf.len()),
            WriteState::Flushing(_) => "flushing".to_string(),
            WriteState::Done(written) => format!("done(written={written})"),
            WriteState::Failed => "failed".to_string(),
        };
        f.debug_struct("WriteStream")
            .field("fd", &self.fd)
            .field("path", &self.path)
            .field("state", &state)
            .finish()
    }
}

async fn store(pool: WorkerPool, path: String, contents: Bytes) -> FsResult<bool> {
    let payload = pool
        .call(
            methods::WRITE,
            json!({ "path": path, "contents": encode_contents(&contents) }),
        )
        .await?;
    let response: WriteResponse = serde_json::from_value(payload).map_err(FsError::Payload)?;
    Ok(response.written)
}

impl WriteStream {
    pub(crate) fn new(fd: FileDescriptor, path: String, pool: WorkerPool) -> Self {
        Self {
            fd,
            path,
            pool,
            state: WriteState::Buffering(BytesMut::new()),
        }
    }

    pub fn fd(&self) -> FileDescriptor {
        self.fd
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Bytes buffered so far, if the stream is still accepting writes.
    pub fn buffered(&self) -> Option<usize> {
        match &self.state {
            WriteState::Buffering(buf) => Some(buf.len()),
            _ => None,
        }
    }

    /// The provider's answer once the stream has been shut down.
    pub fn written(&self) -> Option<bool> {
        match self.state {
            WriteState::Done(written) => Some(written),
            _ => None,
        }
    }

    fn begin_flush(&mut self) {
        if let WriteState::Buffering(buf) = &mut self.state {
            let contents = std::mem::take(buf).freeze();
            let fut = store(self.pool.clone(), self.path.clone(), contents).boxed();
            self.state = WriteState::Flushing(fut);
        }
    }

    /// Send the buffered contents and return whether the provider wrote them.
    pub async fn finish(mut self) -> FsResult<bool> {
        self.begin_flush();
        match std::mem::replace(&mut self.state, WriteState::Failed) {
            WriteState::Flushing(fut) => fut.await,
            WriteState::Done(written) => Ok(written),
            WriteState::Buffering(_) | WriteState::Failed => Err(FsError::StreamClosed),
        }
    }
}

impl AsyncWrite for WriteStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.state {
            WriteState::Buffering(contents) => {
                contents.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
            _ => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write after shutdown",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.begin_flush();
        let result = match &mut self.state {
            WriteState::Flushing(fut) => ready!(fut.poll_unpin(cx)),
            WriteState::Done(_) => return Poll::Ready(Ok(())),
            WriteState::Buffering(_) | WriteState::Failed => {
                return Poll::Ready(Err(io::Error::other(FsError::StreamClosed)))
            }
        };
        match result {
            Ok(written) => {
                self.state = WriteState::Done(written);
                Poll::Ready(Ok(()))
            }
            Err(e) => {
                self.state = WriteState::Failed;
                Poll::Ready(Err(io::Error::other(e)))
            }
        }
    }
}

/// A stream returned by [`FsAdapter::open`](super::FsAdapter::open).
#[derive(Debug)]
pub enum OpenedFile {
    Read(ReadStream),
    Write(WriteStream),
}

impl OpenedFile {
    pub fn fd(&self) -> FileDescriptor {
        match self {
            Self::Read(stream) => stream.fd(),
            Self::Write(stream) => stream.fd(),
        }
    }

    pub fn into_read(self) -> Option<ReadStream> {
        match self {
            Self::Read(stream) => Some(stream),
            Self::Write(_) => None,
        }
    }

    pub fn into_write(self) -> Option<WriteStream> {
        match self {
            Self::Write(stream) => Some(stream),
            Self::Read(_) => None,
        }
    }
}
