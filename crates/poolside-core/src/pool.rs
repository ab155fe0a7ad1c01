//! Bounded resource pool with FIFO demand queuing and idle reaping.
//!
//! The pool bounds concurrent connection usage between `min` and `max`:
//! acquires are served from the idle set when possible, trigger a
//! factory creation while capacity remains, and otherwise queue FIFO
//! until a connection is released or a slot frees up. A background
//! reaper destroys connections that have sat idle past the configured
//! timeout, never dropping the live count below `min`.
//!
//! # Accounting invariant
//!
//! At every observation point, `using + available == size`,
//! `size <= max`, and `size >= min` once warm-up has completed. A
//! creation in flight reserves a slot against `max` but is not
//! observable as live, so a failed attempt never appears in the
//! counts. All bookkeeping lives behind one mutex that is never held
//! across an await.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use poolside_types::{Connection, ConnectionId};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::config::PoolSettings;
use crate::factory::{ConnectionError, ConnectionFactory};

/// Errors that can occur while acquiring a connection from the pool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    /// The factory failed to produce a connection for this request.
    #[error("connection error: {source}")]
    Connection {
        /// The underlying factory error.
        #[from]
        source: ConnectionError,
    },

    /// The pool has been closed.
    #[error("pool is closed")]
    Closed,
}

/// A consistent observation of the pool's counters.
///
/// Taken under the accounting lock, so the invariant documented on the
/// module holds for every value returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Total live connections (in use + idle).
    pub size: usize,
    /// Connections currently checked out.
    pub using: usize,
    /// Idle connections available for checkout.
    pub available: usize,
    /// Acquire requests queued for a connection.
    pub waiting: usize,
}

/// An idle connection with the instant it went idle, for reaping.
struct IdleConnection {
    conn: Connection,
    idle_since: Instant,
}

/// A queued acquire waiting for a connection or a failure.
type Waiter = oneshot::Sender<Result<Connection, AcquireError>>;

/// Mutable pool accounting, guarded by [`PoolShared::state`].
struct PoolState {
    idle: VecDeque<IdleConnection>,
    using: usize,
    /// Creations in flight. Each reserves a slot against `max` and
    /// covers one queued waiter.
    pending: usize,
    waiters: VecDeque<Waiter>,
    closed: bool,
}

impl PoolState {
    /// Live connections: checked out plus idle.
    fn live(&self) -> usize {
        self.using.saturating_add(self.idle.len())
    }
}

/// State shared between the pool handle, its guards, and its tasks.
struct PoolShared<F> {
    factory: F,
    settings: PoolSettings,
    state: Mutex<PoolState>,
}

impl<F: ConnectionFactory> PoolShared<F> {
    /// Lock the accounting state, recovering from poisoning.
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serve queued waiters: idle connections first (oldest waiter gets
    /// the next validated connection), then spawn creations for the
    /// shortfall while capacity remains.
    fn dispense(shared: &Arc<Self>, state: &mut PoolState) {
        while !state.waiters.is_empty() {
            let Some(idle) = state.idle.pop_front() else {
                break;
            };
            if !shared.factory.validate(&idle.conn) {
                debug!(id = %idle.conn.id(), "discarding invalid idle connection");
                Self::destroy_later(shared, idle.conn);
                continue;
            }
            let Some(waiter) = state.waiters.pop_front() else {
                state.idle.push_front(idle);
                break;
            };
            state.using = state.using.saturating_add(1);
            let idle_since = idle.idle_since;
            if let Err(returned) = waiter.send(Ok(idle.conn)) {
                // The acquire future was dropped before the handoff.
                state.using = state.using.saturating_sub(1);
                if let Ok(conn) = returned {
                    state.idle.push_front(IdleConnection { conn, idle_since });
                }
            }
        }

        let mut shortfall = state.waiters.len().saturating_sub(state.pending);
        while shortfall > 0 && state.live().saturating_add(state.pending) < shared.settings.max {
            Self::spawn_create(shared, state);
            shortfall = shortfall.saturating_sub(1);
        }
    }

    /// Reserve a slot and spawn one factory creation.
    fn spawn_create(shared: &Arc<Self>, state: &mut PoolState) {
        state.pending = state.pending.saturating_add(1);
        let task_shared = Arc::clone(shared);
        tokio::spawn(async move {
            let result = task_shared.factory.create().await;
            Self::finish_create(&task_shared, result);
        });
    }

    /// Book a finished creation attempt: a success goes idle and is
    /// dispensed; a failure surfaces to the oldest waiter and frees the
    /// reserved slot for the remaining ones.
    fn finish_create(shared: &Arc<Self>, result: Result<Connection, ConnectionError>) {
        let mut state = shared.lock_state();
        state.pending = state.pending.saturating_sub(1);
        match result {
            Ok(conn) => {
                if state.closed {
                    drop(state);
                    Self::destroy_later(shared, conn);
                    return;
                }
                state.idle.push_back(IdleConnection {
                    conn,
                    idle_since: Instant::now(),
                });
                Self::dispense(shared, &mut state);
            }
            Err(err) => {
                debug!(error = %err, "connection creation failed");
                if let Some(waiter) = state.waiters.pop_front() {
                    if waiter.send(Err(AcquireError::from(err))).is_err() {
                        debug!("acquire abandoned before failure delivery");
                    }
                }
                Self::dispense(shared, &mut state);
            }
        }
    }

    /// Return a checked-out connection. Queued waiters are served
    /// before the connection is allowed to go idle.
    fn release(shared: &Arc<Self>, conn: Connection) {
        let mut state = shared.lock_state();
        state.using = state.using.saturating_sub(1);
        if state.closed {
            drop(state);
            Self::destroy_later(shared, conn);
            return;
        }
        state.idle.push_back(IdleConnection {
            conn,
            idle_since: Instant::now(),
        });
        Self::dispense(shared, &mut state);
    }

    /// Destroy idle connections older than the idle timeout, keeping at
    /// least `min` live connections.
    fn reap_once(shared: &Arc<Self>) {
        let now = Instant::now();
        let mut reaped = Vec::new();
        {
            let mut state = shared.lock_state();
            while let Some(oldest) = state.idle.front() {
                if state.live() <= shared.settings.min {
                    break;
                }
                if now.duration_since(oldest.idle_since) < shared.settings.idle_timeout() {
                    break;
                }
                if let Some(idle) = state.idle.pop_front() {
                    reaped.push(idle.conn);
                }
            }
        }
        if !reaped.is_empty() {
            debug!(count = reaped.len(), "reaping idle connections");
        }
        for conn in reaped {
            Self::destroy_later(shared, conn);
        }
    }

    /// Hand a connection to the factory's destroy on a background task.
    /// During runtime shutdown the handle may be gone; the connection
    /// is then dropped without the (no-op) destroy call.
    fn destroy_later(shared: &Arc<Self>, conn: Connection) {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let task_shared = Arc::clone(shared);
            handle.spawn(async move {
                task_shared.factory.destroy(conn).await;
            });
        }
    }
}

/// Bounded pool of [`Connection`] resources.
///
/// Cheap handles are obtained by wrapping the pool in an [`Arc`]; the
/// pool itself owns the factory and the background reaper.
pub struct ResourcePool<F: ConnectionFactory> {
    shared: Arc<PoolShared<F>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl<F: ConnectionFactory> ResourcePool<F> {
    /// Create a pool over the given factory, start the idle reaper, and
    /// begin warming the pool to `min` connections in the background.
    ///
    /// Must be called from within a Tokio runtime. A zero reap interval
    /// disables the reaper.
    pub fn new(settings: PoolSettings, factory: F) -> Self {
        let shared = Arc::new(PoolShared {
            factory,
            settings,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                using: 0,
                pending: 0,
                waiters: VecDeque::new(),
                closed: false,
            }),
        });

        let reaper = if shared.settings.reap_interval_ms == 0 {
            None
        } else {
            let reap_shared = Arc::clone(&shared);
            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(reap_shared.settings.reap_interval());
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    PoolShared::reap_once(&reap_shared);
                }
            }))
        };

        let pool = Self {
            shared,
            reaper: Mutex::new(reaper),
        };
        pool.warm_up();
        pool
    }

    /// Spawn creations until live plus in-flight reaches `min`
    /// (clamped to `max`).
    fn warm_up(&self) {
        let mut state = self.shared.lock_state();
        let target = self.shared.settings.min.min(self.shared.settings.max);
        let deficit = target.saturating_sub(state.live().saturating_add(state.pending));
        for _ in 0..deficit {
            PoolShared::spawn_create(&self.shared, &mut state);
        }
    }

    /// Acquire a connection.
    ///
    /// Served immediately from the idle set when possible; otherwise a
    /// creation is started while `size` (including creations in flight)
    /// is below `max`; otherwise the request queues FIFO until a
    /// connection is released or a slot frees up. A factory failure
    /// surfaces here as [`AcquireError::Connection`] without ever
    /// counting the failed attempt as live.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::Connection`] when the factory fails this
    /// request, or [`AcquireError::Closed`] once the pool is closed.
    pub async fn acquire(&self) -> Result<PooledConnection<F>, AcquireError> {
        let receiver = {
            let mut state = self.shared.lock_state();
            if state.closed {
                return Err(AcquireError::Closed);
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            PoolShared::dispense(&self.shared, &mut state);
            rx
        };

        match receiver.await {
            Ok(Ok(conn)) => Ok(PooledConnection {
                conn: Some(conn),
                shared: Arc::clone(&self.shared),
            }),
            Ok(Err(err)) => Err(err),
            Err(_closed) => Err(AcquireError::Closed),
        }
    }

    /// The factory this pool creates connections through.
    pub fn factory(&self) -> &F {
        &self.shared.factory
    }

    /// Take a consistent observation of the pool counters.
    pub fn status(&self) -> PoolStatus {
        let state = self.shared.lock_state();
        PoolStatus {
            size: state.live(),
            using: state.using,
            available: state.idle.len(),
            waiting: state.waiters.len(),
        }
    }

    /// Close the pool: stop the reaper, fail queued waiters, and
    /// destroy idle connections. Checked-out connections are destroyed
    /// as their guards drop. Calling close twice is a no-op.
    pub async fn close(&self) {
        let (idle, waiters) = {
            let mut state = self.shared.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            (
                std::mem::take(&mut state.idle),
                std::mem::take(&mut state.waiters),
            )
        };

        let handle = {
            let mut reaper = self
                .reaper
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            reaper.take()
        };
        if let Some(handle) = handle {
            handle.abort();
        }

        for waiter in waiters {
            if waiter.send(Err(AcquireError::Closed)).is_err() {
                debug!("acquire abandoned before close delivery");
            }
        }
        for idle_conn in idle {
            self.shared.factory.destroy(idle_conn.conn).await;
        }
    }
}

impl<F: ConnectionFactory> Drop for ResourcePool<F> {
    fn drop(&mut self) {
        // The reaper task holds the shared state alive; without this it
        // would outlive a pool that was dropped without close().
        let handle = {
            let mut reaper = self
                .reaper
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            reaper.take()
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// A connection checked out of the pool.
///
/// Scoped acquisition: dropping the guard returns the connection on
/// every exit path, handing it to the oldest queued waiter before it
/// is allowed to go idle.
pub struct PooledConnection<F: ConnectionFactory> {
    conn: Option<Connection>,
    shared: Arc<PoolShared<F>>,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    /// The identifier of the held connection. `None` only after the
    /// guard has released it (never observable before drop).
    pub fn id(&self) -> Option<ConnectionId> {
        self.conn.as_ref().map(Connection::id)
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            PoolShared::release(&self.shared, conn);
        }
    }
}
