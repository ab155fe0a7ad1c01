//! Control-event handling: named events start and stop worlds.
//!
//! The handler owns at most one running world at a time plus the
//! simulation ID sequence, so restarted worlds always get fresh
//! identities. Inbound control events are plain names: `"start"` tears
//! down the current world (if any) and boots a new one, `"stop"` tears
//! down the current world, and anything else is logged and ignored.

use std::sync::Arc;

use poolside_core::config::BenchConfig;
use poolside_core::factory::SimulatedConnectionManager;
use poolside_core::publisher::Publisher;
use poolside_core::world::World;
use poolside_types::{SimulationId, SimulationIdSequence};
use tracing::{info, warn};

/// Owns the current world and reacts to named control events.
pub struct SimulationHandler<P: Publisher> {
    config: BenchConfig,
    publisher: Arc<P>,
    ids: SimulationIdSequence,
    world: Option<World<SimulatedConnectionManager, P>>,
}

impl<P: Publisher> SimulationHandler<P> {
    /// Create a handler with no world running yet.
    pub const fn new(config: BenchConfig, publisher: Arc<P>) -> Self {
        Self {
            config,
            publisher,
            ids: SimulationIdSequence::new(),
            world: None,
        }
    }

    /// Whether a world is currently running.
    pub const fn is_running(&self) -> bool {
        self.world.is_some()
    }

    /// The ID of the current world's simulation, if one is running.
    pub fn current_simulation(&self) -> Option<SimulationId> {
        self.world.as_ref().map(|world| world.simulation().id())
    }

    /// React to one named control event.
    pub async fn handle_event(&mut self, name: &str) {
        match name {
            "start" => {
                self.teardown().await;
                self.spin_up();
            }
            "stop" => self.teardown().await,
            other => warn!(event = other, "unknown control event, ignoring"),
        }
    }

    /// Tear down whatever is running. Used for clean shutdown.
    pub async fn shutdown(&mut self) {
        self.teardown().await;
    }

    /// Boot a fresh world with the next simulation ID. Each world gets
    /// its own factory (the attempt counter starts over) and an RNG
    /// stream offset by its ID, so two worlds never replay the same
    /// latency sequence.
    fn spin_up(&mut self) {
        let id = self.ids.next_id();
        let factory = SimulatedConnectionManager::new(
            self.config.factory.clone(),
            self.config.pool.max,
            self.config.world.seed.wrapping_add(id.into_inner()),
        );
        info!(simulation = %id, "starting world");
        self.world = Some(World::start(
            &self.config,
            id,
            factory,
            Arc::clone(&self.publisher),
        ));
    }

    async fn teardown(&mut self) {
        if let Some(world) = self.world.take() {
            world.stop(None).await;
        }
    }
}
