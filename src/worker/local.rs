//! In-process workers.
//!
//! Thread mode skips the child process: each connection owns a [`Worker`]
//! and runs every call on Tokio's blocking thread pool. A panicking provider
//! is treated like a crashed worker process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::warn;

use super::connection::{Connection, Spawner};
use super::error::{WorkerError, WorkerResult};
use super::protocol::Payload;
use super::server::Worker;

/// A worker living in this process.
#[derive(Debug)]
pub struct ThreadConnection {
    worker: Arc<Mutex<Worker>>,
    alive: AtomicBool,
}

impl ThreadConnection {
    pub fn new() -> Self {
        Self {
            worker: Arc::new(Mutex::new(Worker::new())),
            alive: AtomicBool::new(true),
        }
    }
}

impl Default for ThreadConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for ThreadConnection {
    async fn call(&self, method: &str, params: Payload) -> WorkerResult<Payload> {
        if !self.is_alive() {
            return Err(WorkerError::WorkerExited);
        }

        let worker = self.worker.clone();
        let method = method.to_string();
        let joined = tokio::task::spawn_blocking(move || {
            let mut worker = worker.lock().unwrap_or_else(|e| e.into_inner());
            worker.handle(&method, params)
        })
        .await;

        match joined {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(info)) => Err(WorkerError::from_code(&info.code, &info.message)),
            Err(e) => {
                warn!(error = %e, "in-process worker panicked");
                self.alive.store(false, Ordering::SeqCst);
                Err(WorkerError::WorkerExited)
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// Spawns [`ThreadConnection`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSpawner;

#[async_trait]
impl Spawner for ThreadSpawner {
    async fn spawn(&self) -> WorkerResult<Box<dyn Connection>> {
        Ok(Box::new(ThreadConnection::new()))
    }
}
