//! Worker communication module.
//!
//! Workers hold one synchronous [`Provider`](crate::provider::Provider) each
//! and answer calls from the pool one at a time. Two substrates carry those
//! calls:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      WorkerPool (Tokio)                      │
//! │        Connection::call(method, params) -> Payload           │
//! └──────────────────────────────────────────────────────────────┘
//!          │ process mode                      │ thread mode
//!          ▼                                   ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │ WorkerClient             │   │ ThreadConnection             │
//! │ NDJSON over stdin/stdout │   │ spawn_blocking per call      │
//! └──────────────────────────┘   └──────────────────────────────┘
//!          │                                   │
//!          ▼                                   ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │            Worker (method table -> Provider calls)           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use fsbridge::worker::{Connection, WorkerClient, protocol::methods};
//!
//! let client = WorkerClient::spawn("./fsbridge-worker").await?;
//! client.call(methods::SET_PROVIDER, json!({"provider": handle})).await?;
//! let stat = client.call(methods::STAT, json!({"path": "a.txt"})).await?;
//! ```

mod client;
mod connection;
mod error;
mod local;
pub mod protocol;
mod server;

pub use client::{ProcessSpawner, WorkerClient, WORKER_BINARY};
pub use connection::{Connection, Spawner};
pub use error::{WorkerError, WorkerResult};
pub use local::{ThreadConnection, ThreadSpawner};
pub use server::Worker;
