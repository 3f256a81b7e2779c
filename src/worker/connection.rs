//! The seam between the pool and whatever carries calls to a worker.

use async_trait::async_trait;

use super::error::WorkerResult;
use super::protocol::Payload;

/// One live worker, able to answer one call at a time.
///
/// The pool guarantees it never issues a second call on a connection before
/// the first has returned.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send `method` with `params` and wait for the correlated response.
    async fn call(&self, method: &str, params: Payload) -> WorkerResult<Payload>;

    /// Whether the worker behind this connection is still running.
    fn is_alive(&self) -> bool {
        true
    }
}

/// Creates new worker connections for the pool.
#[async_trait]
pub trait Spawner: Send + Sync {
    async fn spawn(&self) -> WorkerResult<Box<dyn Connection>>;
}
