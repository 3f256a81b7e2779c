//! Async client for communicating with a worker process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use super::connection::{Connection, Spawner};
use super::error::{WorkerError, WorkerResult};
use super::protocol::{codes, ErrorInfo, Payload, RequestEnvelope, ResponseEnvelope};
use crate::config::Settings;

/// Name of the worker binary built alongside this crate.
pub const WORKER_BINARY: &str = "fsbridge-worker";

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<ResponseEnvelope>>>>;

/// Async client for one worker process.
///
/// The client spawns the worker as a child process and communicates via
/// NDJSON (newline-delimited JSON) over stdin/stdout. Each request has a
/// unique ID for correlation with responses.
///
/// There is no request timeout: a stalled worker stalls its call until the
/// process exits, at which point every pending call fails with
/// [`WorkerError::WorkerExited`].
///
/// # Example
///
/// ```ignore
/// use fsbridge::worker::{WorkerClient, protocol::*};
///
/// let client = WorkerClient::spawn("./fsbridge-worker").await?;
///
/// let response: RenameResponse = client.request(
///     methods::RENAME,
///     RenameParams { from: "a".into(), to: "b".into() },
/// ).await?;
/// ```
pub struct WorkerClient {
    /// Writer for sending requests to worker stdin.
    stdin: Arc<Mutex<BufWriter<ChildStdin>>>,

    /// Map of pending request IDs to response channels.
    pending: PendingMap,

    /// Cleared by the reader task once stdout closes.
    alive: Arc<AtomicBool>,

    /// Handle to the worker child process.
    _child: Child,

    /// Handle to the background reader task.
    _reader_task: tokio::task::JoinHandle<()>,
}

impl WorkerClient {
    /// Spawn a new worker process.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker process cannot be spawned.
    pub async fn spawn<P: AsRef<Path>>(worker_path: P) -> WorkerResult<Self> {
        Self::spawn_with_args(worker_path, &[]).await
    }

    /// Spawn a worker with extra command-line arguments.
    pub async fn spawn_with_args<P: AsRef<Path>>(
        worker_path: P,
        args: &[String],
    ) -> WorkerResult<Self> {
        let mut child = Command::new(worker_path.as_ref())
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(WorkerError::SpawnFailed)?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                return Err(WorkerError::SpawnFailed(std::io::Error::other(
                    "worker stdio not captured",
                )))
            }
        };

        let stdin = Arc::new(Mutex::new(BufWriter::new(stdin)));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        // Spawn background reader task
        let reader_task = Self::spawn_reader_task(stdout, pending.clone(), alive.clone());

        debug!(pid = ?child.id(), "spawned worker process");

        Ok(Self {
            stdin,
            pending,
            alive,
            _child: child,
            _reader_task: reader_task,
        })
    }

    /// Resolve the worker binary path from settings.
    ///
    /// Order: configured `worker.path`, then next to the current executable,
    /// then a few common locations.
    pub fn resolve_worker_path(settings: &Settings) -> WorkerResult<PathBuf> {
        if let Some(path) = settings.worker_path() {
            return Ok(path);
        }

        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let sibling = dir.join(WORKER_BINARY);
                if sibling.exists() {
                    return Ok(sibling);
                }
                // Test binaries live one level down, in target/<profile>/deps.
                if let Some(profile_dir) = dir.parent() {
                    let sibling = profile_dir.join(WORKER_BINARY);
                    if sibling.exists() {
                        return Ok(sibling);
                    }
                }
            }
        }

        let candidates = [
            "./fsbridge-worker",
            "./target/release/fsbridge-worker",
            "./target/debug/fsbridge-worker",
        ];

        for candidate in candidates {
            let path = PathBuf::from(candidate);
            if path.exists() {
                return Ok(path);
            }
        }

        Err(WorkerError::SpawnFailed(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Worker binary not found. Set worker.path in config or build the fsbridge-worker binary",
        )))
    }

    /// Spawn the background task that reads responses from the worker.
    fn spawn_reader_task(
        stdout: ChildStdout,
        pending: PendingMap,
        alive: Arc<AtomicBool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => match serde_json::from_str::<ResponseEnvelope>(&line) {
                        Ok(resp) => {
                            let mut pending = pending.lock().await;
                            if let Some(tx) = pending.remove(&resp.id) {
                                let _ = tx.send(resp);
                            }
                        }
                        Err(e) => warn!(error = %e, "failed to parse worker response"),
                    },
                    Err(e) => {
                        warn!(error = %e, "worker read error");
                        break;
                    }
                }
            }

            alive.store(false, Ordering::SeqCst);

            // Worker exited - fail every pending request
            let mut pending = pending.lock().await;
            for (id, tx) in pending.drain() {
                let _ = tx.send(ResponseEnvelope::err(
                    id,
                    ErrorInfo::new(codes::WORKER_EXITED, "Worker process exited unexpectedly"),
                ));
            }
        })
    }

    /// Send a request to the worker and wait for a typed response.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Serialization fails
    /// - Writing to the worker fails
    /// - The worker exits before answering
    /// - The worker returns an error response
    /// - Deserialization of the response fails
    pub async fn request<P, R>(&self, method: &str, params: P) -> WorkerResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params).map_err(WorkerError::SerializeFailed)?;
        let result = self.send(method, params).await?;
        serde_json::from_value(result).map_err(WorkerError::DeserializeFailed)
    }

    async fn send(&self, method: &str, params: Payload) -> WorkerResult<Payload> {
        if !self.is_alive() {
            return Err(WorkerError::WorkerExited);
        }

        let id = uuid::Uuid::new_v4().to_string();

        let request = RequestEnvelope {
            id: id.clone(),
            method: method.to_string(),
            params,
        };

        // Register response channel
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id.clone(), tx);
        }

        // The reader may have drained the map just before our insert.
        if !self.is_alive() {
            self.pending.lock().await.remove(&id);
            return Err(WorkerError::WorkerExited);
        }

        // Send request
        let written = async {
            let mut stdin = self.stdin.lock().await;
            let line =
                serde_json::to_string(&request).map_err(WorkerError::SerializeFailed)? + "\n";
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(WorkerError::WriteFailed)?;
            stdin.flush().await.map_err(WorkerError::WriteFailed)
        }
        .await;

        if let Err(e) = written {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let response = rx.await?;

        if response.success {
            Ok(response.result.unwrap_or(Payload::Null))
        } else {
            let error = response
                .error
                .unwrap_or_else(|| ErrorInfo::new("UNKNOWN", "Unknown error"));
            Err(WorkerError::from_code(&error.code, &error.message))
        }
    }
}

#[async_trait]
impl Connection for WorkerClient {
    async fn call(&self, method: &str, params: Payload) -> WorkerResult<Payload> {
        self.send(method, params).await
    }

    /// Returns `false` once the reader task has seen the worker's stdout close.
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// Spawns `fsbridge-worker` processes.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    worker_path: PathBuf,
    args: Vec<String>,
}

impl ProcessSpawner {
    pub fn new(worker_path: impl Into<PathBuf>) -> Self {
        Self {
            worker_path: worker_path.into(),
            args: Vec::new(),
        }
    }

    /// Build a spawner from settings, resolving the worker binary.
    pub fn from_settings(settings: &Settings) -> WorkerResult<Self> {
        let path = WorkerClient::resolve_worker_path(settings)?;
        Ok(Self::new(path).with_args(settings.worker.args.clone()))
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn worker_path(&self) -> &Path {
        &self.worker_path
    }
}

#[async_trait]
impl Spawner for ProcessSpawner {
    async fn spawn(&self) -> WorkerResult<Box<dyn Connection>> {
        let client = WorkerClient::spawn_with_args(&self.worker_path, &self.args).await?;
        Ok(Box::new(client))
    }
}
