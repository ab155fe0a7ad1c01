//! The transport adapter: a broadcast event stream plus structured logs.
//!
//! [`EventStreamPublisher`] is the one production implementation of the
//! core [`Publisher`] capability. Every notification becomes a
//! [`WorldEvent`] on a [`tokio::sync::broadcast`] channel -- the
//! in-process seam where a socket transport would attach -- and a
//! structured log line. Sends never block; if a subscriber falls
//! behind, it skips ahead to the newest events.

use poolside_core::publisher::Publisher;
use poolside_types::{MetricsSnapshot, WorldEvent};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

/// Capacity of the broadcast channel for world events.
///
/// A subscriber that falls behind by more than this many messages
/// receives a lag notice and resumes from the newest event.
const BROADCAST_CAPACITY: usize = 256;

/// Publisher that fans world events out to broadcast subscribers.
#[derive(Debug)]
pub struct EventStreamPublisher {
    tx: broadcast::Sender<WorldEvent>,
}

impl EventStreamPublisher {
    /// Create a publisher with the default channel capacity.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<WorldEvent> {
        self.tx.subscribe()
    }

    /// Push one event to all subscribers. An error just means nobody
    /// is listening right now; the stream is fire-and-forget.
    fn publish(&self, event: WorldEvent) {
        if self.tx.send(event).is_err() {
            trace!("no event stream subscribers");
        }
    }
}

impl Default for EventStreamPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher for EventStreamPublisher {
    fn start(&self) {
        info!("simulation started");
        self.publish(WorldEvent::Start);
    }

    fn stop(&self) {
        info!("simulation stopped");
        self.publish(WorldEvent::Stop);
    }

    fn error(&self, message: &str) {
        warn!(message, "simulation error");
        self.publish(WorldEvent::Error {
            message: message.to_owned(),
        });
    }

    fn metrics(&self, snapshot: MetricsSnapshot) {
        debug!(
            pool_size = snapshot.pool_size,
            pool_used = snapshot.pool_used,
            pool_available = snapshot.pool_available,
            pool_queue = snapshot.pool_queue,
            queries = snapshot.queries_count,
            errors = snapshot.errors_count,
            new_connections = snapshot.new_connections_count,
            "pool metrics"
        );
        self.publish(WorldEvent::PoolMetrics(snapshot));
    }
}
