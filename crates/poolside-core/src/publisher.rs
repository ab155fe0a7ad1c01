//! The publisher capability consumed by the world.
//!
//! The world reports lifecycle transitions and metrics snapshots
//! through this trait without knowing where they go. All four
//! operations are fire-and-forget and must not block the caller --
//! the transport adapter in the engine binary satisfies the capability
//! with a broadcast channel, and [`NoOpPublisher`] satisfies it for
//! tests and headless use.

use poolside_types::MetricsSnapshot;

/// Sink for world lifecycle events and metrics snapshots.
pub trait Publisher: Send + Sync + 'static {
    /// A world started.
    fn start(&self);

    /// A world stopped.
    fn stop(&self);

    /// A workload chain or batch failed out-of-band.
    fn error(&self, message: &str);

    /// A metrics snapshot was sampled.
    fn metrics(&self, snapshot: MetricsSnapshot);
}

/// A publisher that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpPublisher;

impl NoOpPublisher {
    /// Create a new no-op publisher.
    pub const fn new() -> Self {
        Self
    }
}

impl Publisher for NoOpPublisher {
    fn start(&self) {}

    fn stop(&self) {}

    fn error(&self, _message: &str) {}

    fn metrics(&self, _snapshot: MetricsSnapshot) {}
}
