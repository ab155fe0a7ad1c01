//! Simulated query execution against pool-acquired connections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use rand::rngs::StdRng;

use crate::config::QuerySettings;
use crate::factory::ConnectionFactory;
use crate::pool::{AcquireError, ResourcePool};

/// Issues simulated queries and counts the completed ones.
///
/// Each query acquires a connection from the pool (which may suspend),
/// holds it for a uniformly random execution latency, bumps the query
/// counter, and releases the connection. The release rides on the
/// acquisition guard's drop, so it happens on every exit path --
/// execution never fails after acquisition in this domain, but a real
/// backend would, and the guard already covers that.
pub struct QueryRepository<F: ConnectionFactory> {
    pool: Arc<ResourcePool<F>>,
    settings: QuerySettings,
    rng: Mutex<StdRng>,
    query_count: AtomicU64,
}

impl<F: ConnectionFactory> QueryRepository<F> {
    /// Create a repository over the given pool, with query latency
    /// draws seeded by `seed`.
    pub fn new(pool: Arc<ResourcePool<F>>, settings: QuerySettings, seed: u64) -> Self {
        Self {
            pool,
            settings,
            rng: Mutex::new(rand::SeedableRng::seed_from_u64(seed)),
            query_count: AtomicU64::new(0),
        }
    }

    /// Successfully completed queries since creation. Monotonic;
    /// unaffected by failed acquires.
    pub fn query_count(&self) -> u64 {
        self.query_count.load(Ordering::Relaxed)
    }

    /// The pool this repository issues queries against.
    pub const fn pool(&self) -> &Arc<ResourcePool<F>> {
        &self.pool
    }

    /// Draw an execution latency in `[latency_min_ms, latency_max_ms)`.
    fn draw_latency_ms(&self) -> u64 {
        let min = self.settings.latency_min_ms;
        let max = self.settings.latency_max_ms;
        if max <= min {
            return min;
        }
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        rng.random_range(min..max)
    }

    /// Execute one simulated query.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError`] when no connection could be acquired;
    /// the query counter is not touched in that case.
    pub async fn execute_query(&self) -> Result<(), AcquireError> {
        let conn = self.pool.acquire().await?;

        let latency_ms = self.draw_latency_ms();
        tokio::time::sleep(Duration::from_millis(latency_ms)).await;

        self.query_count.fetch_add(1, Ordering::Relaxed);
        drop(conn);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use poolside_types::Connection;

    use super::*;
    use crate::config::{FactorySettings, PoolSettings};
    use crate::factory::{ConnectionError, SimulatedConnectionManager};

    fn quick_queries() -> QuerySettings {
        QuerySettings {
            latency_min_ms: 10,
            latency_max_ms: 30,
        }
    }

    fn reliable_pool(min: usize, max: usize) -> Arc<ResourcePool<SimulatedConnectionManager>> {
        let factory = SimulatedConnectionManager::new(
            FactorySettings {
                connect_latency_max_ms: 5,
                failure_latency_threshold_ms: 5,
            },
            max,
            42,
        );
        Arc::new(ResourcePool::new(
            PoolSettings {
                min,
                max,
                idle_timeout_ms: 60_000,
                reap_interval_ms: 0,
            },
            factory,
        ))
    }

    /// A factory whose backend is permanently unreachable.
    struct NeverConnects;

    impl ConnectionFactory for NeverConnects {
        async fn create(&self) -> Result<Connection, ConnectionError> {
            Err(ConnectionError::FailedToConnect)
        }

        async fn destroy(&self, _conn: Connection) {}

        fn validate(&self, _conn: &Connection) -> bool {
            true
        }

        fn total_attempts(&self) -> u64 {
            0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn completed_queries_bump_the_counter_once_each() {
        let repository = QueryRepository::new(reliable_pool(0, 4), quick_queries(), 7);
        for expected in 1..=3_u64 {
            repository.execute_query().await.unwrap();
            assert_eq!(repository.query_count(), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connection_returns_to_the_pool_after_the_query() {
        let repository = QueryRepository::new(reliable_pool(0, 4), quick_queries(), 7);
        repository.execute_query().await.unwrap();
        let status = repository.pool().status();
        assert_eq!(status.using, 0);
        assert_eq!(status.available, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_queries_share_the_pool() {
        let repository = Arc::new(QueryRepository::new(reliable_pool(0, 2), quick_queries(), 7));
        let results = futures::future::join_all(
            (0..5).map(|_| repository.execute_query()),
        )
        .await;
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(repository.query_count(), 5);
        // Never more connections than the pool bound.
        assert!(repository.pool().status().size <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_acquire_leaves_the_counter_untouched() {
        let pool = Arc::new(ResourcePool::new(
            PoolSettings {
                min: 0,
                max: 4,
                idle_timeout_ms: 60_000,
                reap_interval_ms: 0,
            },
            NeverConnects,
        ));
        let repository = QueryRepository::new(pool, quick_queries(), 7);
        let result = repository.execute_query().await;
        assert!(result.is_err());
        assert_eq!(repository.query_count(), 0);
    }
}
