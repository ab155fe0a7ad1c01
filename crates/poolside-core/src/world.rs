//! The world orchestrator: one complete, independently stoppable
//! instance of pool, repository, simulation, and timers.
//!
//! Starting a world warms the pool, notifies the publisher, seeds the
//! initial workload chains, and starts two recurring timers: an
//! idle-nudge that launches a fresh chain whenever the pool has gone
//! completely quiet, and a metrics sampler that snapshots the counters
//! and publishes them. Stopping a world is the reverse: the simulation
//! stops scheduling, the publisher is notified, the timers are aborted,
//! and the pool is closed.
//!
//! Stop is request-level, not operation-level: queries already in
//! flight complete, and their counter updates may land after stop.
//! Nothing reads the counters after stop, so this is harmless.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use poolside_types::{MetricsSnapshot, SimulationId};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::config::{BenchConfig, LoadSettings};
use crate::factory::ConnectionFactory;
use crate::pool::ResourcePool;
use crate::publisher::Publisher;
use crate::repository::QueryRepository;
use crate::simulator::{BandSizes, Simulation};

/// Sample a metrics snapshot from the given components.
///
/// Read-only: sampling never mutates pool, repository, or simulation
/// state. `max_pool` is the configured maximum pool size used to
/// derive `new_connections_count` from the factory's attempt counter.
pub fn sample_metrics<F: ConnectionFactory>(
    pool: &ResourcePool<F>,
    repository: &QueryRepository<F>,
    simulation: &Simulation,
    max_pool: usize,
) -> MetricsSnapshot {
    let status = pool.status();
    let attempts = pool.factory().total_attempts();
    let max = u64::try_from(max_pool).unwrap_or(u64::MAX);
    MetricsSnapshot {
        timestamp: Utc::now().timestamp_millis(),
        pool_size: status.size,
        pool_used: status.using,
        pool_available: status.available,
        pool_queue: status.waiting,
        queries_count: repository.query_count(),
        errors_count: simulation.error_count(),
        new_connections_count: attempts.saturating_sub(max),
    }
}

/// Spawns workload chains and supervises their outcomes.
///
/// Each chain gets its own RNG stream (base seed plus chain index) and
/// runs as an independent task. A chain that ends with a batch failure
/// reports it here, to the publisher, rather than dying silently.
struct ChainSpawner<F: ConnectionFactory, P: Publisher> {
    simulation: Arc<Simulation>,
    repository: Arc<QueryRepository<F>>,
    publisher: Arc<P>,
    load: LoadSettings,
    sizes: BandSizes,
    base_seed: u64,
    next_chain: Arc<AtomicU64>,
}

impl<F: ConnectionFactory, P: Publisher> Clone for ChainSpawner<F, P> {
    fn clone(&self) -> Self {
        Self {
            simulation: Arc::clone(&self.simulation),
            repository: Arc::clone(&self.repository),
            publisher: Arc::clone(&self.publisher),
            load: self.load.clone(),
            sizes: self.sizes,
            base_seed: self.base_seed,
            next_chain: Arc::clone(&self.next_chain),
        }
    }
}

impl<F: ConnectionFactory, P: Publisher> ChainSpawner<F, P> {
    /// Launch one self-pacing chain task.
    fn spawn_chain(&self) {
        let simulation = Arc::clone(&self.simulation);
        let repository = Arc::clone(&self.repository);
        let publisher = Arc::clone(&self.publisher);
        let load = self.load.clone();
        let sizes = self.sizes;
        let chain_index = self.next_chain.fetch_add(1, Ordering::Relaxed);
        let seed = self.base_seed.wrapping_add(chain_index);

        tokio::spawn(async move {
            let mut rng = StdRng::seed_from_u64(seed);
            if let Err(err) = simulation
                .run_chain(&repository, &load, sizes, &mut rng)
                .await
            {
                debug!(simulation = %simulation.id(), error = %err, "chain ended in failure");
                publisher.error(&err.to_string());
            }
        });
    }
}

/// One running world.
pub struct World<F: ConnectionFactory, P: Publisher> {
    pool: Arc<ResourcePool<F>>,
    repository: Arc<QueryRepository<F>>,
    simulation: Arc<Simulation>,
    publisher: Arc<P>,
    max_pool: usize,
    timers: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl<F: ConnectionFactory, P: Publisher> World<F, P> {
    /// Start a world: build the pool (warming to `min`), repository,
    /// and simulation; notify the publisher; seed `max / 5 + 1`
    /// workload chains; and start the idle-nudge and metrics timers.
    ///
    /// A zero nudge or metrics interval disables that timer.
    pub fn start(config: &BenchConfig, id: SimulationId, factory: F, publisher: Arc<P>) -> Self {
        let pool = Arc::new(ResourcePool::new(config.pool.clone(), factory));
        let repository = Arc::new(QueryRepository::new(
            Arc::clone(&pool),
            config.query.clone(),
            config.world.seed.wrapping_add(1),
        ));
        let simulation = Arc::new(Simulation::new(id));

        info!(simulation = %id, name = config.world.name, "world starting");
        publisher.start();

        let spawner = ChainSpawner {
            simulation: Arc::clone(&simulation),
            repository: Arc::clone(&repository),
            publisher: Arc::clone(&publisher),
            load: config.load.clone(),
            sizes: BandSizes::from_pool(&config.pool),
            base_seed: config.world.seed,
            next_chain: Arc::new(AtomicU64::new(0)),
        };

        // Seed the initial concurrent load.
        let initial_chains = config
            .pool
            .max
            .checked_div(5)
            .unwrap_or(0)
            .saturating_add(1);
        for _ in 0..initial_chains {
            spawner.spawn_chain();
        }
        debug!(simulation = %id, chains = initial_chains, "initial load seeded");

        let mut timers = Vec::new();

        // Idle nudge: if every chain happened to land on a rest band,
        // the pool goes quiet; launch one more chain to keep the bench
        // alive.
        if config.sampling.nudge_interval_ms > 0 {
            let nudge_pool = Arc::clone(&pool);
            let nudge_spawner = spawner.clone();
            let interval = config.sampling.nudge_interval();
            timers.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick fires immediately; skip it so nudges
                // start one full interval after world start.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if nudge_pool.status().using == 0 {
                        debug!("pool idle, nudging the simulation");
                        nudge_spawner.spawn_chain();
                    }
                }
            }));
        }

        // Metrics sampler.
        if config.sampling.metrics_interval_ms > 0 {
            let sample_pool = Arc::clone(&pool);
            let sample_repository = Arc::clone(&repository);
            let sample_simulation = Arc::clone(&simulation);
            let sample_publisher = Arc::clone(&publisher);
            let max_pool = config.pool.max;
            let interval = config.sampling.metrics_interval();
            timers.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let snapshot = sample_metrics(
                        &sample_pool,
                        &sample_repository,
                        &sample_simulation,
                        max_pool,
                    );
                    sample_publisher.metrics(snapshot);
                }
            }));
        }

        Self {
            pool,
            repository,
            simulation,
            publisher,
            max_pool: config.pool.max,
            timers: Mutex::new(timers),
            stopped: AtomicBool::new(false),
        }
    }

    /// The world's simulation (identity, run state, error counter).
    pub const fn simulation(&self) -> &Arc<Simulation> {
        &self.simulation
    }

    /// The world's pool.
    pub const fn pool(&self) -> &Arc<ResourcePool<F>> {
        &self.pool
    }

    /// Sample a metrics snapshot of this world's current counters.
    pub fn sample(&self) -> MetricsSnapshot {
        sample_metrics(&self.pool, &self.repository, &self.simulation, self.max_pool)
    }

    /// Stop the world: stop the simulation, notify the publisher (and
    /// report `err` when supplied), abort the timers, and close the
    /// pool. In-flight queries finish on their own. Stopping twice is
    /// tolerated and does nothing the second time.
    pub async fn stop(&self, err: Option<&str>) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!(simulation = %self.simulation.id(), "stop requested again, already stopped");
            return;
        }

        self.simulation.stop();
        self.publisher.stop();

        let timers = {
            let mut guard = self
                .timers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        for timer in timers {
            timer.abort();
        }

        if let Some(message) = err {
            self.publisher.error(message);
        }

        self.pool.close().await;
        info!(simulation = %self.simulation.id(), "world stopped");
    }
}
