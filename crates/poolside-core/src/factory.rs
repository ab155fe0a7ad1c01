//! Connection factory trait and the simulated implementation.
//!
//! The factory is the seam where a real backend would attach: the pool
//! only ever creates, destroys, and validates connections through the
//! [`ConnectionFactory`] capability. The bench ships one implementation,
//! [`SimulatedConnectionManager`], which imitates a database that accepts
//! every initial connection but starts refusing slow connect attempts
//! once demand has pushed past the configured maximum pool size.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use poolside_types::{Connection, ConnectionId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::config::FactorySettings;

/// Errors that can occur while creating a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The simulated backend refused the connection attempt.
    #[error("failed to connect")]
    FailedToConnect,
}

/// Capability for creating, destroying, and validating connections.
///
/// The pool drives the whole connection lifecycle through this trait,
/// so a production deployment could slot in a factory that opens real
/// sockets and runs real health checks without touching pool code.
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Create a new connection. Suspends for the backend's connect
    /// latency and may fail.
    fn create(&self) -> impl Future<Output = Result<Connection, ConnectionError>> + Send;

    /// Tear down a connection that is leaving the pool.
    fn destroy(&self, conn: Connection) -> impl Future<Output = ()> + Send;

    /// Report whether a connection is still healthy.
    fn validate(&self, conn: &Connection) -> bool;

    /// Total connection attempts ever made, successful or not.
    fn total_attempts(&self) -> u64;
}

/// Imitation of a connection manager for a database backend.
///
/// Every attempt draws a uniformly random connect latency in
/// `[0, connect_latency_max_ms)`. The attempt counter is bumped before
/// the simulated connect, so it reflects attempts rather than
/// successes. Once the attempt number exceeds the maximum pool size,
/// attempts whose drawn latency exceeded the failure threshold are
/// refused -- all initial connections succeed, and only the churn
/// beyond the pool's capacity is flaky.
#[derive(Debug)]
pub struct SimulatedConnectionManager {
    settings: FactorySettings,
    max_pool: u64,
    total_attempts: AtomicU64,
    rng: Mutex<StdRng>,
}

impl SimulatedConnectionManager {
    /// Create a manager for a pool bounded at `max_pool` connections,
    /// with latency draws seeded by `seed`.
    pub fn new(settings: FactorySettings, max_pool: usize, seed: u64) -> Self {
        Self {
            settings,
            max_pool: u64::try_from(max_pool).unwrap_or(u64::MAX),
            total_attempts: AtomicU64::new(0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Draw a connect latency in `[0, connect_latency_max_ms)`.
    fn draw_latency_ms(&self) -> u64 {
        let max = self.settings.connect_latency_max_ms;
        if max == 0 {
            return 0;
        }
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        rng.random_range(0..max)
    }
}

impl ConnectionFactory for SimulatedConnectionManager {
    async fn create(&self) -> Result<Connection, ConnectionError> {
        // Count the attempt up front, successful or not.
        let attempt = self
            .total_attempts
            .fetch_add(1, Ordering::Relaxed)
            .saturating_add(1);

        let latency_ms = self.draw_latency_ms();
        tokio::time::sleep(Duration::from_millis(latency_ms)).await;

        if attempt > self.max_pool && latency_ms > self.settings.failure_latency_threshold_ms {
            debug!(attempt, latency_ms, "connect attempt refused");
            return Err(ConnectionError::FailedToConnect);
        }

        Ok(Connection::new(ConnectionId(attempt)))
    }

    async fn destroy(&self, conn: Connection) {
        // Nothing to tear down in the simulated backend.
        debug!(id = %conn.id(), "connection destroyed");
    }

    fn validate(&self, _conn: &Connection) -> bool {
        true
    }

    fn total_attempts(&self) -> u64 {
        self.total_attempts.load(Ordering::Relaxed)
    }
}
