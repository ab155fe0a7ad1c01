//! Self-pacing workload chains issuing parallel query batches.
//!
//! A chain imitates one client of the service: it paces itself, draws a
//! weighted random band deciding how much work to issue, fires that
//! many queries concurrently as one batch, and repeats until it draws
//! the rest band or a batch fails. The bands are mutually exclusive --
//! each iteration issues exactly one batch size.
//!
//! A batch is the unit of failure: if any query in it fails, the
//! simulation's error counter is bumped exactly once and the chain
//! terminates with a [`BatchError`] for its supervisor to report. The
//! chain itself never swallows failures.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use poolside_types::SimulationId;
use rand::Rng;

use crate::config::{LoadSettings, PoolSettings};
use crate::factory::ConnectionFactory;
use crate::repository::QueryRepository;

/// One or more queries in a parallel batch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{failed} of {total} queries in the batch failed")]
pub struct BatchError {
    /// Number of queries in the batch that failed.
    pub failed: usize,
    /// Total queries issued in the batch.
    pub total: usize,
}

/// Weighted workload bands drawn each chain iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadBand {
    /// 20%: a burst sized for the full pool (`max / 5` queries).
    Spike,
    /// 20%: steady moderate usage (`min / 2` queries).
    Moderate,
    /// 30%: light usage (2 queries).
    Light,
    /// 30%: no work; the chain ends and leaves rescheduling to the
    /// idle-nudge timer.
    Rest,
}

impl WorkloadBand {
    /// Map a roll in `1..=10` onto its band.
    pub const fn from_roll(roll: u32) -> Self {
        match roll {
            1 | 2 => Self::Spike,
            3 | 4 => Self::Moderate,
            5..=7 => Self::Light,
            _ => Self::Rest,
        }
    }

    /// Draw a band with the weighted distribution.
    pub fn draw(rng: &mut impl Rng) -> Self {
        Self::from_roll(rng.random_range(1..=10))
    }
}

/// Parallel-query counts for each band, derived from pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandSizes {
    /// Batch size for [`WorkloadBand::Spike`].
    pub spike: usize,
    /// Batch size for [`WorkloadBand::Moderate`].
    pub moderate: usize,
    /// Batch size for [`WorkloadBand::Light`].
    pub light: usize,
}

impl BandSizes {
    /// Derive band sizes from the pool bounds: a spike issues
    /// `ceil(max / 5)` queries, moderate load `ceil(min / 2)`, light
    /// load a fixed 2.
    pub const fn from_pool(pool: &PoolSettings) -> Self {
        Self {
            spike: pool.max.div_ceil(5),
            moderate: pool.min.div_ceil(2),
            light: 2,
        }
    }

    /// The batch size for the given band, or `None` when the band
    /// issues no work.
    pub const fn for_band(&self, band: WorkloadBand) -> Option<usize> {
        match band {
            WorkloadBand::Spike => Some(self.spike),
            WorkloadBand::Moderate => Some(self.moderate),
            WorkloadBand::Light => Some(self.light),
            WorkloadBand::Rest => None,
        }
    }
}

/// One simulation: identity, run state, and the error counter shared
/// by all of its chains.
///
/// The `running -> stopped` transition is one-way; a restarted world
/// creates a fresh `Simulation` with the next ID rather than reviving
/// this one.
#[derive(Debug)]
pub struct Simulation {
    id: SimulationId,
    running: AtomicBool,
    error_count: AtomicU64,
}

impl Simulation {
    /// Create a running simulation with the given identity.
    pub const fn new(id: SimulationId) -> Self {
        Self {
            id,
            running: AtomicBool::new(true),
            error_count: AtomicU64::new(0),
        }
    }

    /// This simulation's identity.
    pub const fn id(&self) -> SimulationId {
        self.id
    }

    /// Whether chains should keep scheduling work.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop the simulation. In-flight queries are not cancelled; only
    /// future chain iterations cease. Stopping twice is harmless.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Failed batches since creation.
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Issue `count` queries concurrently and await them all as one
    /// batch.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] if any query failed; the error counter is
    /// bumped exactly once for the whole batch, however many queries
    /// failed.
    pub async fn parallel_queries<F: ConnectionFactory>(
        &self,
        repository: &QueryRepository<F>,
        count: usize,
    ) -> Result<(), BatchError> {
        let results =
            futures::future::join_all((0..count).map(|_| repository.execute_query())).await;
        let failed = results.iter().filter(|result| result.is_err()).count();
        if failed > 0 {
            self.error_count.fetch_add(1, Ordering::Relaxed);
            return Err(BatchError {
                failed,
                total: count,
            });
        }
        Ok(())
    }

    /// Run one workload chain to completion.
    ///
    /// Each iteration paces, draws a band, and issues that band's batch.
    /// The chain ends cleanly when the simulation stops or the rest
    /// band is drawn, and ends with an error when a batch fails.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] from the first failed batch; the chain
    /// does not continue past a failure.
    pub async fn run_chain<F: ConnectionFactory>(
        &self,
        repository: &QueryRepository<F>,
        load: &LoadSettings,
        sizes: BandSizes,
        rng: &mut (impl Rng + Send),
    ) -> Result<(), BatchError> {
        loop {
            if !self.is_running() {
                return Ok(());
            }
            tokio::time::sleep(load.pace()).await;
            // The simulation may have stopped during the pacing sleep;
            // don't issue a batch against a world being torn down.
            if !self.is_running() {
                return Ok(());
            }

            let band = WorkloadBand::draw(rng);
            match sizes.for_band(band) {
                Some(count) => self.parallel_queries(repository, count).await?,
                None => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use poolside_types::Connection;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::config::{FactorySettings, PoolSettings, QuerySettings};
    use crate::factory::{ConnectionError, ConnectionFactory, SimulatedConnectionManager};
    use crate::pool::ResourcePool;

    fn quick_load() -> LoadSettings {
        LoadSettings { pace_ms: 5 }
    }

    fn reliable_repository() -> Arc<QueryRepository<SimulatedConnectionManager>> {
        let factory = SimulatedConnectionManager::new(
            FactorySettings {
                connect_latency_max_ms: 5,
                failure_latency_threshold_ms: 5,
            },
            8,
            42,
        );
        let pool = Arc::new(ResourcePool::new(
            PoolSettings {
                min: 0,
                max: 8,
                idle_timeout_ms: 60_000,
                reap_interval_ms: 0,
            },
            factory,
        ));
        Arc::new(QueryRepository::new(
            pool,
            QuerySettings {
                latency_min_ms: 5,
                latency_max_ms: 10,
            },
            7,
        ))
    }

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

    fn unreachable_repository() -> Arc<QueryRepository<NeverConnects>> {
        let pool = Arc::new(ResourcePool::new(
            PoolSettings {
                min: 0,
                max: 4,
                idle_timeout_ms: 60_000,
                reap_interval_ms: 0,
            },
            NeverConnects,
        ));
        Arc::new(QueryRepository::new(
            pool,
            QuerySettings {
                latency_min_ms: 5,
                latency_max_ms: 10,
            },
            7,
        ))
    }

    #[test]
    fn rolls_map_onto_weighted_bands() {
        assert_eq!(WorkloadBand::from_roll(1), WorkloadBand::Spike);
        assert_eq!(WorkloadBand::from_roll(2), WorkloadBand::Spike);
        assert_eq!(WorkloadBand::from_roll(3), WorkloadBand::Moderate);
        assert_eq!(WorkloadBand::from_roll(4), WorkloadBand::Moderate);
        assert_eq!(WorkloadBand::from_roll(5), WorkloadBand::Light);
        assert_eq!(WorkloadBand::from_roll(6), WorkloadBand::Light);
        assert_eq!(WorkloadBand::from_roll(7), WorkloadBand::Light);
        assert_eq!(WorkloadBand::from_roll(8), WorkloadBand::Rest);
        assert_eq!(WorkloadBand::from_roll(9), WorkloadBand::Rest);
        assert_eq!(WorkloadBand::from_roll(10), WorkloadBand::Rest);
    }

    #[test]
    fn every_band_shows_up_in_a_seeded_draw_sequence() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = [false; 4];
        for _ in 0..200 {
            let index = match WorkloadBand::draw(&mut rng) {
                WorkloadBand::Spike => 0,
                WorkloadBand::Moderate => 1,
                WorkloadBand::Light => 2,
                WorkloadBand::Rest => 3,
            };
            if let Some(slot) = seen.get_mut(index) {
                *slot = true;
            }
        }
        assert_eq!(seen, [true; 4]);
    }

    #[test]
    fn band_sizes_derive_from_pool_bounds() {
        let sizes = BandSizes::from_pool(&PoolSettings {
            min: 10,
            max: 100,
            idle_timeout_ms: 2_000,
            reap_interval_ms: 500,
        });
        assert_eq!(sizes.spike, 20);
        assert_eq!(sizes.moderate, 5);
        assert_eq!(sizes.light, 2);

        // Odd bounds round up, never down to zero work.
        let odd = BandSizes::from_pool(&PoolSettings {
            min: 3,
            max: 7,
            idle_timeout_ms: 2_000,
            reap_interval_ms: 500,
        });
        assert_eq!(odd.spike, 2);
        assert_eq!(odd.moderate, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_batch_counts_no_errors() {
        let repository = reliable_repository();
        let simulation = Simulation::new(SimulationId(1));
        simulation.parallel_queries(&repository, 4).await.unwrap();
        assert_eq!(simulation.error_count(), 0);
        assert_eq!(repository.query_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batch_counts_one_error_regardless_of_size() {
        let repository = unreachable_repository();
        let simulation = Simulation::new(SimulationId(1));

        let err = simulation
            .parallel_queries(&repository, 5)
            .await
            .unwrap_err();
        // All five queries failed, one error counted.
        assert_eq!(err.failed, 5);
        assert_eq!(err.total, 5);
        assert_eq!(simulation.error_count(), 1);

        let _second = simulation.parallel_queries(&repository, 3).await;
        assert_eq!(simulation.error_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_simulation_ends_the_chain_immediately() {
        let repository = reliable_repository();
        let simulation = Simulation::new(SimulationId(2));
        simulation.stop();
        assert!(!simulation.is_running());

        let mut rng = StdRng::seed_from_u64(1);
        let sizes = BandSizes {
            spike: 4,
            moderate: 2,
            light: 2,
        };
        simulation
            .run_chain(&repository, &quick_load(), sizes, &mut rng)
            .await
            .unwrap();
        assert_eq!(repository.query_count(), 0);

        // Stopping again is harmless.
        simulation.stop();
        assert!(!simulation.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn chain_terminates_on_batch_failure() {
        let repository = unreachable_repository();
        let simulation = Simulation::new(SimulationId(3));
        let sizes = BandSizes {
            spike: 4,
            moderate: 2,
            light: 2,
        };

        // Some seed in this range draws a working band before a rest
        // band; the first such chain fails its batch and terminates.
        let mut failed = false;
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            if simulation
                .run_chain(&repository, &quick_load(), sizes, &mut rng)
                .await
                .is_err()
            {
                failed = true;
                break;
            }
        }
        assert!(failed);
        assert!(simulation.error_count() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn chain_issues_work_until_rest() {
        let repository = reliable_repository();
        let simulation = Simulation::new(SimulationId(4));
        let sizes = BandSizes {
            spike: 4,
            moderate: 2,
            light: 2,
        };

        // Run a handful of chains; the reliable factory never fails, so
        // every chain must end cleanly at a rest band with work done
        // along the way (over 20 seeds the odds of all-rest draws are
        // negligible).
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            simulation
                .run_chain(&repository, &quick_load(), sizes, &mut rng)
                .await
                .unwrap();
        }
        assert!(repository.query_count() > 0);
        assert_eq!(simulation.error_count(), 0);
    }
}
