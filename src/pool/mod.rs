//! Elastic pool of worker connections.
//!
//! The pool keeps between `min_size` and `max_size` workers alive, hands every
//! call to one idle worker, and spawns new workers lazily while below
//! `max_size`. Callers beyond `max_size` wait in FIFO order for a free slot.
//!
//! ```text
//!   call() ──► Semaphore (max_size permits, FIFO)
//!                 │
//!                 ▼
//!           idle worker? ──yes──► Connection::call ──► check back in
//!                 │ no
//!                 ▼
//!           live < max? ──yes──► spawn + setFlysystem handshake
//!                 │ no
//!                 ▼
//!           wait for a check-in
//! ```
//!
//! A worker whose call fails with a transport error is dropped, the failure is
//! broadcast as [`PoolEvent::Error`], and replacements are spawned until the
//! pool is back at `min_size`. The failed call itself is not retried.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::{broadcast, Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::provider::ProviderHandle;
use crate::worker::protocol::{methods, Payload};
use crate::worker::{Connection, Spawner, WorkerError, WorkerResult};

const EVENT_CAPACITY: usize = 64;

/// Identity of a worker, unique within one pool.
pub type WorkerId = u64;

/// Pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Workers kept alive even when idle.
    pub min_size: usize,
    /// Upper bound on live (and therefore busy) workers.
    pub max_size: usize,
    /// Idle workers above `min_size` are retired after this long.
    /// `Duration::ZERO` keeps them forever.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 50,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    /// Check that the sizing can hold `min_size <= live <= max_size`.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.max_size == 0 {
            return Err(WorkerError::InvalidConfig(
                "max_size must be at least 1".to_string(),
            ));
        }
        if self.min_size > self.max_size {
            return Err(WorkerError::InvalidConfig(format!(
                "min_size ({}) exceeds max_size ({})",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }
}

/// Pool lifecycle notifications.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// A worker finished its provider handshake.
    Ready { worker: WorkerId },
    /// An idle worker was retired.
    Retired { worker: WorkerId },
    /// A worker failed to spawn or crashed.
    Error {
        worker: Option<WorkerId>,
        message: String,
    },
}

/// Snapshot of pool membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Workers spawned and not yet retired (includes ones still spawning).
    pub live: usize,
    pub idle: usize,
    pub busy: usize,
}

struct PooledWorker {
    id: WorkerId,
    conn: Box<dyn Connection>,
    idle_since: Instant,
}

#[derive(Default)]
struct Slots {
    idle: VecDeque<PooledWorker>,
    live: usize,
    closed: bool,
}

struct Inner {
    config: PoolConfig,
    spawner: Arc<dyn Spawner>,
    handle: ProviderHandle,
    permits: Arc<Semaphore>,
    slots: Mutex<Slots>,
    checked_in: Notify,
    busy: AtomicUsize,
    next_id: AtomicU64,
    events: broadcast::Sender<PoolEvent>,
}

/// Shared handle to a worker pool. Cloning is cheap.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish()
    }
}

impl WorkerPool {
    /// Start a pool and wait until `min_size` workers are ready.
    ///
    /// Every worker receives `handle` through a `setFlysystem` call before it
    /// serves anything else. Fails with [`WorkerError::InvalidConfig`] before
    /// spawning anything if `config` does not validate.
    pub async fn start(
        config: PoolConfig,
        spawner: Arc<dyn Spawner>,
        handle: ProviderHandle,
    ) -> WorkerResult<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(Inner {
            config,
            spawner,
            handle,
            permits: Arc::new(Semaphore::new(config.max_size)),
            slots: Mutex::new(Slots::default()),
            checked_in: Notify::new(),
            busy: AtomicUsize::new(0),
            next_id: AtomicU64::new(0),
            events,
        });

        inner.lock().live = config.min_size;
        let spawned =
            futures::future::join_all((0..config.min_size).map(|_| inner.spawn_worker())).await;
        let mut workers = Vec::with_capacity(spawned.len());
        for result in spawned {
            workers.push(result?);
        }
        for worker in workers {
            inner.check_in(worker);
        }

        if !config.idle_timeout.is_zero() {
            tokio::spawn(reap_idle(Arc::downgrade(&inner)));
        }

        info!(
            min_size = config.min_size,
            max_size = config.max_size,
            "worker pool ready"
        );
        Ok(Self { inner })
    }

    /// Run one call on a worker and return its payload.
    pub async fn call(&self, method: &str, params: Payload) -> WorkerResult<Payload> {
        let lease = self.lease().await?;
        let result = lease.conn().call(method, params).await;

        match result {
            Err(e) if e.is_worker_exited() || !lease.conn().is_alive() => {
                lease.discard(Some(&e));
                Err(e)
            }
            other => {
                lease.release();
                other
            }
        }
    }

    async fn lease(&self) -> WorkerResult<Lease> {
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::PoolClosed)?;

        let worker = self.inner.check_out().await?;
        self.inner.busy.fetch_add(1, Ordering::SeqCst);
        Ok(Lease {
            inner: self.inner.clone(),
            worker: Some(worker),
            _permit: permit,
        })
    }

    /// Subscribe to pool events.
    pub fn events(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events.subscribe()
    }

    pub fn status(&self) -> PoolStatus {
        let slots = self.inner.lock();
        PoolStatus {
            live: slots.live,
            idle: slots.idle.len(),
            busy: self.inner.busy.load(Ordering::SeqCst),
        }
    }

    pub fn config(&self) -> PoolConfig {
        self.inner.config
    }

    pub fn provider(&self) -> &ProviderHandle {
        &self.inner.handle
    }

    /// Retire every idle worker and reject further calls.
    ///
    /// Busy workers finish their current call and are dropped on check-in.
    pub fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut slots = self.inner.lock();
            slots.closed = true;
            let drained: Vec<_> = slots.idle.drain(..).collect();
            slots.live -= drained.len();
            drained
        };
        self.inner.permits.close();
        self.inner.checked_in.notify_waiters();
        info!(retired = drained.len(), "worker pool shut down");
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: PoolEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Take an idle worker, or spawn one if below `max_size`, or wait.
    async fn check_out(self: &Arc<Self>) -> WorkerResult<PooledWorker> {
        loop {
            let notified = self.checked_in.notified();
            let reserved = {
                let mut slots = self.lock();
                if slots.closed {
                    return Err(WorkerError::PoolClosed);
                }
                if let Some(worker) = slots.idle.pop_back() {
                    return Ok(worker);
                }
                let room = slots.live < self.config.max_size;
                if room {
                    slots.live += 1;
                }
                room
            };
            if reserved {
                return self.spawn_worker().await;
            }
            // Every slot is taken by a worker still spawning for the
            // replenisher; wait for it to be checked in.
            notified.await;
        }
    }

    fn check_in(&self, mut worker: PooledWorker) {
        {
            let mut slots = self.lock();
            if slots.closed {
                slots.live -= 1;
                return;
            }
            worker.idle_since = Instant::now();
            slots.idle.push_back(worker);
        }
        self.checked_in.notify_one();
    }

    /// Drop a worker that will never be checked in again.
    fn forget(self: &Arc<Self>, worker: PooledWorker, error: Option<&WorkerError>) {
        self.lock().live -= 1;
        self.checked_in.notify_one();

        match error {
            Some(error) => {
                warn!(worker = worker.id, error = %error, "worker failed, dropping it");
                self.emit(PoolEvent::Error {
                    worker: Some(worker.id),
                    message: error.to_string(),
                });
            }
            None => debug!(worker = worker.id, "call cancelled, dropping worker"),
        }
        drop(worker);
        self.replenish();
    }

    /// Spawn workers in the background until `live` reaches `min_size`.
    fn replenish(self: &Arc<Self>) {
        let deficit = {
            let mut slots = self.lock();
            if slots.closed {
                return;
            }
            let deficit = self.config.min_size.saturating_sub(slots.live);
            slots.live += deficit;
            deficit
        };
        if deficit == 0 {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.lock().live -= deficit;
            return;
        };
        for _ in 0..deficit {
            let inner = self.clone();
            runtime.spawn(async move {
                if let Ok(worker) = inner.spawn_worker().await {
                    inner.check_in(worker);
                }
            });
        }
    }

    /// Spawn and handshake one worker. The caller must already have counted
    /// it in `live`; on failure the reservation is released here.
    async fn spawn_worker(&self) -> WorkerResult<PooledWorker> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut reservation = Reservation {
            inner: self,
            armed: true,
        };
        match self.connect(id).await {
            Ok(conn) => {
                reservation.armed = false;
                debug!(worker = id, "worker ready");
                self.emit(PoolEvent::Ready { worker: id });
                Ok(PooledWorker {
                    id,
                    conn,
                    idle_since: Instant::now(),
                })
            }
            Err(e) => {
                drop(reservation);
                warn!(worker = id, error = %e, "failed to start worker");
                self.emit(PoolEvent::Error {
                    worker: Some(id),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn connect(&self, id: WorkerId) -> WorkerResult<Box<dyn Connection>> {
        let conn = self.spawner.spawn().await?;
        debug!(worker = id, "sending provider to worker");
        conn.call(methods::SET_PROVIDER, json!({ "provider": &self.handle }))
            .await?;
        Ok(conn)
    }

    /// Retire idle workers above `min_size` that have idled past the timeout.
    fn retire_expired(&self) -> Vec<WorkerId> {
        let expired: Vec<PooledWorker> = {
            let mut slots = self.lock();
            let mut expired = Vec::new();
            while slots.live > self.config.min_size {
                match slots.idle.front() {
                    Some(w) if w.idle_since.elapsed() >= self.config.idle_timeout => {
                        if let Some(worker) = slots.idle.pop_front() {
                            slots.live -= 1;
                            expired.push(worker);
                        }
                    }
                    _ => break,
                }
            }
            expired
        };

        expired
            .into_iter()
            .map(|worker| {
                debug!(worker = worker.id, "retiring idle worker");
                self.emit(PoolEvent::Retired { worker: worker.id });
                worker.id
            })
            .collect()
    }
}

/// A `live` slot held by a spawn in progress. Released on drop unless the
/// spawn produced a worker, so a cancelled spawn does not leak its slot.
struct Reservation<'a> {
    inner: &'a Inner,
    armed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.lock().live -= 1;
            self.inner.checked_in.notify_one();
        }
    }
}

async fn reap_idle(inner: Weak<Inner>) {
    let period = match inner.upgrade() {
        Some(inner) => (inner.config.idle_timeout / 2).max(Duration::from_millis(1)),
        None => return,
    };
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else { return };
        if inner.lock().closed {
            return;
        }
        inner.retire_expired();
    }
}

/// A checked-out worker plus the permit that allowed it.
///
/// Dropping a lease without [`release`](Lease::release) (e.g. the caller's
/// future was cancelled mid-call) discards the worker, since its connection
/// may still be answering the abandoned call.
struct Lease {
    inner: Arc<Inner>,
    worker: Option<PooledWorker>,
    _permit: OwnedSemaphorePermit,
}

impl Lease {
    fn conn(&self) -> &dyn Connection {
        match &self.worker {
            Some(worker) => worker.conn.as_ref(),
            None => unreachable!("lease used after release"),
        }
    }

    fn release(mut self) {
        if let Some(worker) = self.worker.take() {
            self.inner.check_in(worker);
        }
    }

    fn discard(mut self, error: Option<&WorkerError>) {
        if let Some(worker) = self.worker.take() {
            self.inner.forget(worker, error);
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.inner.busy.fetch_sub(1, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            self.inner.forget(worker, None);
        }
    }
}
