//! # fsbridge
//!
//! Non-blocking filesystem access over a blocking storage provider.
//!
//! ## Architecture
//!
//! Provider calls block, so they never run on the async runtime. They run in
//! an elastic pool of workers, each owning one provider instance:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                  FsAdapter (facade)                      │
//! │   stat / ls / open / rename / detect_type / close ...    │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [call(method, params)]
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WorkerPool                           │
//! │     min_size..=max_size workers, FIFO queue beyond       │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [NDJSON or spawn_blocking]
//! ┌─────────────────────────────────────────────────────────┐
//! │                       Worker                             │
//! │          setFlysystem, then one call at a time           │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │              Provider (local dir / memory)               │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Listing entries are typed on the caller's side by a
//! [`ClassifierChain`](classify::ClassifierChain).

pub mod adapter;
pub mod classify;
pub mod config;
pub mod logging;
pub mod pool;
pub mod provider;
pub mod worker;

pub use adapter::{FsAdapter, FsError, FsResult, OpenFlags, OpenedFile, Stat};
pub use classify::{ClassifierChain, Node, NodeKind};
pub use config::Settings;
pub use pool::{PoolConfig, PoolEvent, WorkerPool};
pub use provider::ProviderHandle;
